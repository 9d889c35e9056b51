//! Composite send gate
//!
//! The dispatch path requires the calling user's bucket, the sender
//! identity's bucket, and the single global bucket to all grant before a send
//! proceeds. First denial wins, and a denial consumes nothing from the other
//! buckets: all three locks are taken in a fixed order, every bucket is
//! checked, and tokens are only subtracted once all three have granted.

use fanout_common::{BotId, UserId};

use crate::bucket::{LimitKey, RateLimiter};

/// Outcome of a composite gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// All gates granted; one token was consumed from each bucket.
    Ok,
    /// The calling user's bucket is empty.
    UserLimit,
    /// The sender identity's bucket is empty.
    BotLimit,
    /// The global bucket is empty.
    GlobalLimit,
    /// The caller tripped the spam tracker and is temporarily blocked.
    SpamBlocked,
    /// The caller is on the hard blocklist.
    Blocked,
}

impl Verdict {
    /// Whether the send may proceed.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::UserLimit => "user_limit",
            Self::BotLimit => "bot_limit",
            Self::GlobalLimit => "global_limit",
            Self::SpamBlocked => "spam_blocked",
            Self::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

impl RateLimiter {
    /// Composite gate for one send keyed by `(user, bot)`.
    ///
    /// Never errors; callers are expected to back off and retry on any
    /// denial. The limiter holds no retry logic of its own.
    pub fn check_send(&self, user: UserId, bot: BotId) -> Verdict {
        self.gate(user, bot, true)
    }

    /// One logical send attempt records one spam-tracker call; retry polls
    /// pass `record_call = false` and only observe an existing block, so a
    /// throttled wait can never trip the tracker by itself.
    fn gate(&self, user: UserId, bot: BotId, record_call: bool) -> Verdict {
        if self.blocklist.contains(&user) {
            return Verdict::Blocked;
        }

        if record_call {
            if !self.spam.record(user) {
                return Verdict::SpamBlocked;
            }
        } else if self.spam.is_blocked(user) {
            return Verdict::SpamBlocked;
        }

        let user_bucket = self.get_bucket(LimitKey::User(user));
        let bot_bucket = self.get_bucket(LimitKey::Bot(bot));
        let global_bucket = self.get_bucket(LimitKey::Global);

        // Fixed lock order: user, bot, global. All three guards stay held
        // so the check-then-consume below is atomic across buckets.
        let mut user_guard = user_bucket.lock();
        let mut bot_guard = bot_bucket.lock();
        let mut global_guard = global_bucket.lock();

        user_guard.refill();
        bot_guard.refill();
        global_guard.refill();

        if !user_guard.has(1) {
            return Verdict::UserLimit;
        }
        if !bot_guard.has(1) {
            return Verdict::BotLimit;
        }
        if !global_guard.has(1) {
            return Verdict::GlobalLimit;
        }

        user_guard.consume(1);
        bot_guard.consume(1);
        global_guard.consume(1);

        Verdict::Ok
    }

    /// Poll the send gate with short sleeps until it grants or `timeout`
    /// elapses. Returns the last verdict either way.
    ///
    /// The whole wait counts as a single call against the spam tracker, no
    /// matter how many polls it takes.
    pub async fn wait_for_send(
        &self,
        user: UserId,
        bot: BotId,
        timeout: std::time::Duration,
    ) -> Verdict {
        const POLL: std::time::Duration = std::time::Duration::from_millis(50);

        let deadline = std::time::Instant::now() + timeout;
        let mut recorded = false;
        loop {
            let verdict = self.gate(user, bot, !recorded);
            recorded = true;
            if verdict.is_ok() {
                return verdict;
            }

            let now = std::time::Instant::now();
            if now >= deadline {
                return verdict;
            }

            tokio::time::sleep(POLL.min(deadline - now)).await;
        }
    }
}
