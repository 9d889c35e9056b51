//! Mailing task model

use chrono::{DateTime, Utc};
use fanout_common::{BotId, ProgressSnapshot, RecipientId, TaskId, TaskStatus, UserId};
use serde::{Deserialize, Serialize};

/// A bulk-messaging task in the dispatch queue.
///
/// Mutated only by its owning worker while running; the cursor is the
/// resumption point, so a paused task continues where it left off instead of
/// restarting from the first recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailingTask {
    pub id: TaskId,
    /// Owner of the task (the user whose rate budget it spends)
    pub owner: UserId,
    /// Sender identity used for every send in this task
    pub bot: BotId,
    /// Message text variants; one is chosen at random per recipient.
    /// A single-element list means every recipient gets the same text.
    pub variants: Vec<String>,
    /// Ordered recipient list
    pub recipients: Vec<RecipientId>,
    pub status: TaskStatus,
    pub sent: u64,
    pub failed: u64,
    /// Index of the next recipient to process
    pub cursor: usize,
    /// Lower bound of the randomized inter-message sleep (seconds)
    pub interval_min_secs: f64,
    /// Upper bound of the randomized inter-message sleep (seconds)
    pub interval_max_secs: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Whether a worker currently owns this task. Runtime state, never
    /// serialized; a resume while the owner is still attached must not hand
    /// the task to a second worker.
    #[serde(skip)]
    pub(crate) claimed: bool,
}

impl MailingTask {
    /// Create a new pending task with default interval bounds (1–3 s).
    #[must_use]
    pub fn new(
        owner: UserId,
        bot: BotId,
        variants: Vec<String>,
        recipients: Vec<RecipientId>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            owner,
            bot,
            variants,
            recipients,
            status: TaskStatus::Pending,
            sent: 0,
            failed: 0,
            cursor: 0,
            interval_min_secs: 1.0,
            interval_max_secs: 3.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
            claimed: false,
        }
    }

    /// Override the inter-message sleep bounds.
    #[must_use]
    pub fn with_interval(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.interval_min_secs = min_secs.max(0.0);
        self.interval_max_secs = max_secs.max(self.interval_min_secs);
        self
    }

    /// Total number of recipients.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.recipients.len() as u64
    }

    /// Number of recipients not yet processed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.recipients.len().saturating_sub(self.cursor)
    }

    /// Current progress snapshot for reporting.
    #[must_use]
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(self.id, self.sent, self.failed, self.total(), self.status)
    }
}
