//! Background job registry
//!
//! Generic fire-and-forget work tracker: callers submit a unit of work and
//! get an id back immediately; a counting semaphore bounds how many units run
//! at once, status transitions are observable at any time, cancellation is
//! cooperative, and a periodic sweep reaps old finished jobs.

mod job;
mod registry;

pub use job::{Job, JobConfig};
pub use registry::{JobRegistry, OnComplete};
