//! Dispatch queue and worker pool
//!
//! A FIFO queue of mailing tasks drained by a fixed pool of workers. Each
//! worker drives one task at a time: it consults the rate limiter before
//! every send, resolves the message variant, calls the external transport,
//! advances the task's cursor, reports progress, and sleeps a randomized
//! interval between recipients. Pause, resume, and cancel are status flips
//! observed cooperatively by the owning worker between recipients.

mod cursor;
mod error;
mod queue;
mod task;

pub use cursor::{CursorStore, MemoryCursorStore};
pub use error::DispatchError;
pub use queue::{DispatchConfig, DispatchQueue};
pub use task::MailingTask;
