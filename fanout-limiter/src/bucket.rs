//! Token buckets and the per-key limiter

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, DashSet};
use fanout_common::{BotId, UserId};
use serde::{Deserialize, Serialize};

use crate::spam::{SpamConfig, SpamTracker};

/// Configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Messages per second allowed per user
    #[serde(default = "default_user_rate")]
    pub user_rate: f64,

    /// Burst size (max tokens) per user bucket
    #[serde(default = "default_user_burst")]
    pub user_burst: u32,

    /// Messages per second allowed per sender identity
    #[serde(default = "default_bot_rate")]
    pub bot_rate: f64,

    /// Burst size per sender-identity bucket
    #[serde(default = "default_bot_burst")]
    pub bot_burst: u32,

    /// Messages per second allowed process-wide
    #[serde(default = "default_global_rate")]
    pub global_rate: f64,

    /// Burst size for the global bucket
    #[serde(default = "default_global_burst")]
    pub global_burst: u32,

    /// Spam tracker settings
    #[serde(default)]
    pub spam: SpamConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user_rate: default_user_rate(),
            user_burst: default_user_burst(),
            bot_rate: default_bot_rate(),
            bot_burst: default_bot_burst(),
            global_rate: default_global_rate(),
            global_burst: default_global_burst(),
            spam: SpamConfig::default(),
        }
    }
}

const fn default_user_rate() -> f64 {
    1.0 // 1 message per second per user
}

const fn default_user_burst() -> u32 {
    5
}

const fn default_bot_rate() -> f64 {
    2.0 // sender identities tolerate a little more
}

const fn default_bot_burst() -> u32 {
    20
}

const fn default_global_rate() -> f64 {
    30.0
}

const fn default_global_burst() -> u32 {
    100
}

/// Token bucket for a single key
#[derive(Debug)]
pub(crate) struct TokenBucket {
    /// Current number of tokens
    tokens: f64,
    /// Maximum tokens (burst size)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32) -> Self {
        let capacity = f64::from(burst);
        Self {
            tokens: capacity, // Start with full bucket
            capacity,
            refill_rate: rate,
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time
    pub(crate) fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Whether `cost` tokens are available right now (call after `refill`)
    pub(crate) fn has(&self, cost: u32) -> bool {
        self.tokens >= f64::from(cost)
    }

    /// Unconditionally subtract `cost` tokens (call after `has` returned true)
    pub(crate) fn consume(&mut self, cost: u32) {
        self.tokens = (self.tokens - f64::from(cost)).max(0.0);
    }

    /// Try to consume `cost` tokens, returns true if successful
    fn try_consume(&mut self, cost: u32) -> bool {
        self.refill();

        if self.has(cost) {
            self.consume(cost);
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    fn backdate(&mut self, by: Duration) {
        if let Some(earlier) = Instant::now().checked_sub(by) {
            self.last_refill = earlier;
        }
    }
}

/// Which bucket an [`RateLimiter::acquire`] call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKey {
    User(UserId),
    Bot(BotId),
    Global,
}

/// Statistics for a single bucket (for monitoring/debugging)
#[derive(Debug, Clone)]
pub struct BucketStats {
    /// Currently available tokens
    pub available_tokens: f64,
    /// Maximum capacity (burst size)
    pub capacity: f64,
    /// Refill rate (tokens per second)
    pub refill_rate: f64,
}

/// Per-key rate limiter manager
///
/// One bucket per distinct key, created on first use and never removed; the
/// population is bounded by the number of distinct users/identities active
/// in-process. All mutation of a bucket happens under its own mutex.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    user_buckets: DashMap<UserId, Arc<parking_lot::Mutex<TokenBucket>>>,
    bot_buckets: DashMap<BotId, Arc<parking_lot::Mutex<TokenBucket>>>,
    global: Arc<parking_lot::Mutex<TokenBucket>>,
    pub(crate) spam: SpamTracker,
    pub(crate) blocklist: DashSet<UserId>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let global = Arc::new(parking_lot::Mutex::new(TokenBucket::new(
            config.global_rate,
            config.global_burst,
        )));
        let spam = SpamTracker::new(config.spam.clone());

        Self {
            config,
            user_buckets: DashMap::new(),
            bot_buckets: DashMap::new(),
            global,
            spam,
            blocklist: DashSet::new(),
        }
    }

    /// Get or create the bucket behind a key
    pub(crate) fn get_bucket(&self, key: LimitKey) -> Arc<parking_lot::Mutex<TokenBucket>> {
        match key {
            LimitKey::User(user) => self
                .user_buckets
                .entry(user)
                .or_insert_with(|| {
                    Arc::new(parking_lot::Mutex::new(TokenBucket::new(
                        self.config.user_rate,
                        self.config.user_burst,
                    )))
                })
                .clone(),
            LimitKey::Bot(bot) => self
                .bot_buckets
                .entry(bot)
                .or_insert_with(|| {
                    Arc::new(parking_lot::Mutex::new(TokenBucket::new(
                        self.config.bot_rate,
                        self.config.bot_burst,
                    )))
                })
                .clone(),
            LimitKey::Global => self.global.clone(),
        }
    }

    /// Try to take `cost` tokens from the bucket behind `key`.
    ///
    /// Never blocks and never errors; a denial just means "try again later".
    pub fn acquire(&self, key: LimitKey, cost: u32) -> bool {
        let bucket = self.get_bucket(key);
        let granted = bucket.lock().try_consume(cost);

        if !granted {
            tracing::debug!(key = ?key, cost, "rate limit denied");
        }

        granted
    }

    /// Poll [`Self::acquire`] with short sleeps until granted or `timeout`
    /// elapses. Returns `false` on timeout rather than blocking forever.
    pub async fn wait_and_acquire(&self, key: LimitKey, cost: u32, timeout: Duration) -> bool {
        const POLL: Duration = Duration::from_millis(50);

        let deadline = Instant::now() + timeout;
        loop {
            if self.acquire(key, cost) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            tokio::time::sleep(POLL.min(deadline - now)).await;
        }
    }

    /// Add a user to the hard blocklist. Every gate check fails with
    /// [`crate::Verdict::Blocked`] until unblocked.
    pub fn block_user(&self, user: UserId) {
        tracing::warn!(user = %user, "user blocklisted");
        self.blocklist.insert(user);
    }

    /// Remove a user from the hard blocklist.
    pub fn unblock_user(&self, user: UserId) -> bool {
        self.blocklist.remove(&user).is_some()
    }

    /// Current stats for the bucket behind `key` (for monitoring/debugging).
    ///
    /// Returns `None` for per-user/per-bot keys that have never been used.
    pub fn stats(&self, key: LimitKey) -> Option<BucketStats> {
        let bucket = match key {
            LimitKey::User(user) => self.user_buckets.get(&user)?.clone(),
            LimitKey::Bot(bot) => self.bot_buckets.get(&bot)?.clone(),
            LimitKey::Global => self.global.clone(),
        };

        let mut bucket = bucket.lock();
        bucket.refill(); // Update tokens before reading

        Some(BucketStats {
            available_tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_rate: bucket.refill_rate,
        })
    }
}
