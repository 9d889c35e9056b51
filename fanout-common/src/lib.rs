//! Shared vocabulary for the fanout engine
//!
//! Everything that crosses a crate boundary lives here: id newtypes, status
//! enums, the transport boundary trait, progress reporting types, and the
//! logging/tracing setup.

pub mod id;
pub mod logging;
pub mod progress;
pub mod status;
pub mod transport;

pub use tracing;

pub use id::{CampaignId, JobId, TaskId};
pub use progress::{ProgressCallback, ProgressSnapshot};
pub use status::{BotId, CampaignStatus, JobStatus, RecipientId, TaskStatus, UserId};
pub use transport::{SendError, Transport};

/// Process-level control signal broadcast to every long-running loop.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
