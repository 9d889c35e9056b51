//! Progress reporting types
//!
//! The dispatch queue and campaign workers report progress through a caller
//! supplied callback after every unit of work; the chat front-end renders the
//! snapshots as live status.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{TaskId, status::TaskStatus};

/// Point-in-time progress of a mailing task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: TaskId,
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
    /// Completion percentage over `sent + failed`, in `[0.0, 100.0]`.
    pub percent: f64,
    pub status: TaskStatus,
}

impl ProgressSnapshot {
    /// Build a snapshot, deriving `percent` from the counters.
    #[must_use]
    pub fn new(task_id: TaskId, sent: u64, failed: u64, total: u64, status: TaskStatus) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let percent = if total == 0 {
            100.0
        } else {
            ((sent + failed) as f64 / total as f64 * 100.0).min(100.0)
        };

        Self {
            task_id,
            sent,
            failed,
            total,
            percent,
            status,
        }
    }
}

/// Callback invoked after each unit of progress.
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_derivation() {
        let id = TaskId::generate();
        let snap = ProgressSnapshot::new(id, 3, 1, 10, TaskStatus::Running);
        assert!((snap.percent - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percent_empty_task_is_complete() {
        let id = TaskId::generate();
        let snap = ProgressSnapshot::new(id, 0, 0, 0, TaskStatus::Completed);
        assert!((snap.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percent_never_exceeds_hundred() {
        let id = TaskId::generate();
        let snap = ProgressSnapshot::new(id, 11, 1, 10, TaskStatus::Running);
        assert!((snap.percent - 100.0).abs() < f64::EPSILON);
    }
}
