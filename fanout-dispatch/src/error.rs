//! Typed errors for dispatch queue operations

use fanout_common::{TaskId, TaskStatus};
use thiserror::Error;

/// Errors returned by the dispatch queue's control surface.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The task id is not (or no longer) in the registry.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// A status flip was requested that the task's current state forbids,
    /// e.g. resuming a task that is not paused.
    #[error("task {id} is {status}, cannot {operation}")]
    InvalidTransition {
        id: TaskId,
        status: TaskStatus,
        operation: &'static str,
    },

    /// The task was submitted with no recipients or no message variants.
    #[error("task {0} has nothing to send")]
    EmptyTask(TaskId),
}
