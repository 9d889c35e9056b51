//! Adaptive inter-send delay
//!
//! The pause between two sends is recomputed from scratch before every send:
//! a base delay (which the monitor loop may raise), a multiplier derived from
//! the rolling success rate, an extra factor for the most recent error class,
//! and uniform jitter. Nothing is cached, which is what lets a campaign
//! self-tune as delivery conditions change.

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::{config::DelayConfig, stats::ErrorKind};

/// Delay state for one campaign run.
#[derive(Debug)]
pub struct AdaptiveDelay {
    config: DelayConfig,
    /// Current base in seconds; starts at `config.base_secs`, raised by the
    /// monitor loop, never above `config.max_secs`.
    base_secs: Mutex<f64>,
}

impl AdaptiveDelay {
    #[must_use]
    pub fn new(config: DelayConfig) -> Self {
        let base_secs = Mutex::new(config.base_secs);
        Self { config, base_secs }
    }

    /// Compute the pause before the next send.
    #[must_use]
    pub fn next_delay(&self, success_rate: f64, last_error: Option<ErrorKind>) -> Duration {
        let mut multiplier = self.rate_multiplier(success_rate);
        match last_error {
            Some(ErrorKind::FloodWait) => multiplier *= self.config.flood_multiplier,
            Some(ErrorKind::PrivacyBlocked) => multiplier *= self.config.privacy_multiplier,
            Some(ErrorKind::Other) | None => {}
        }

        let jitter = rand::rng().random_range(self.config.jitter_low..=self.config.jitter_high);

        let secs = (*self.base_secs.lock() * multiplier * jitter)
            .clamp(self.config.min_secs, self.config.max_secs);
        Duration::from_secs_f64(secs)
    }

    fn rate_multiplier(&self, success_rate: f64) -> f64 {
        if success_rate > self.config.fast_rate {
            self.config.fast_multiplier
        } else if success_rate > self.config.steady_rate {
            self.config.steady_multiplier
        } else if success_rate > self.config.slow_rate {
            self.config.slow_multiplier
        } else {
            self.config.crawl_multiplier
        }
    }

    /// Raise the base delay by `factor`, clamped to the configured maximum.
    /// Called by the monitor loop when the success rate collapses.
    pub fn raise_base(&self, factor: f64) {
        let mut base = self.base_secs.lock();
        *base = (*base * factor).min(self.config.max_secs);
    }

    /// Current base delay in seconds.
    #[must_use]
    pub fn base_secs(&self) -> f64 {
        *self.base_secs.lock()
    }
}
