//! Sliding-window spam tracker
//!
//! Tracks recent call timestamps per user and temporarily blocklists anyone
//! whose call frequency inside a short window exceeds the threshold. Runs in
//! front of the token buckets and is independent of their outcome.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use fanout_common::UserId;
use serde::{Deserialize, Serialize};

/// Spam tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamConfig {
    /// Window over which calls are counted (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Calls within the window that trip the blocklist
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// How long a tripped user stays blocked (seconds)
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            threshold: default_threshold(),
            block_secs: default_block_secs(),
        }
    }
}

const fn default_window_secs() -> u64 {
    10
}

const fn default_threshold() -> u32 {
    20
}

const fn default_block_secs() -> u64 {
    300 // 5 minutes
}

/// Per-user call history
#[derive(Debug)]
struct CallWindow {
    calls: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl CallWindow {
    const fn new() -> Self {
        Self {
            calls: VecDeque::new(),
            blocked_until: None,
        }
    }
}

/// Sliding-window frequency tracker with a temporary blocklist
#[derive(Debug)]
pub(crate) struct SpamTracker {
    config: SpamConfig,
    windows: DashMap<UserId, Arc<parking_lot::Mutex<CallWindow>>>,
}

impl SpamTracker {
    pub(crate) fn new(config: SpamConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn window_for(&self, user: UserId) -> Arc<parking_lot::Mutex<CallWindow>> {
        self.windows
            .entry(user)
            .or_insert_with(|| Arc::new(parking_lot::Mutex::new(CallWindow::new())))
            .clone()
    }

    /// Record a call for `user` and report whether the user is currently
    /// allowed. Tripping the threshold blocks the user for the configured
    /// duration; calls made while blocked do not extend the block.
    pub(crate) fn record(&self, user: UserId) -> bool {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_secs);

        let slot = self.window_for(user);
        let mut state = slot.lock();

        if let Some(until) = state.blocked_until {
            if now < until {
                return false;
            }
            state.blocked_until = None;
            state.calls.clear();
        }

        state.calls.push_back(now);
        while let Some(front) = state.calls.front() {
            if now.duration_since(*front) > window {
                state.calls.pop_front();
            } else {
                break;
            }
        }

        if state.calls.len() > self.config.threshold as usize {
            state.blocked_until = Some(now + Duration::from_secs(self.config.block_secs));
            tracing::warn!(
                user = %user,
                calls = state.calls.len(),
                window_secs = self.config.window_secs,
                "call frequency exceeded, user temporarily blocked"
            );
            return false;
        }

        true
    }

    /// Whether `user` is currently blocked, without recording a call.
    pub(crate) fn is_blocked(&self, user: UserId) -> bool {
        self.windows.get(&user).is_some_and(|slot| {
            slot.lock()
                .blocked_until
                .is_some_and(|until| Instant::now() < until)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_threshold_allowed() {
        let tracker = SpamTracker::new(SpamConfig::default());
        let user = UserId(1);

        for _ in 0..20 {
            assert!(tracker.record(user));
        }
        assert!(!tracker.is_blocked(user));
    }

    #[test]
    fn test_over_threshold_blocks() {
        let tracker = SpamTracker::new(SpamConfig {
            window_secs: 10,
            threshold: 5,
            block_secs: 300,
        });
        let user = UserId(2);

        for _ in 0..5 {
            assert!(tracker.record(user));
        }

        // Sixth call inside the window trips the block
        assert!(!tracker.record(user));
        assert!(tracker.is_blocked(user));

        // Still blocked on subsequent calls
        assert!(!tracker.record(user));
    }

    #[test]
    fn test_users_tracked_independently() {
        let tracker = SpamTracker::new(SpamConfig {
            window_secs: 10,
            threshold: 2,
            block_secs: 300,
        });

        let noisy = UserId(3);
        let quiet = UserId(4);

        for _ in 0..3 {
            tracker.record(noisy);
        }
        assert!(tracker.is_blocked(noisy));
        assert!(!tracker.is_blocked(quiet));
        assert!(tracker.record(quiet));
    }
}
