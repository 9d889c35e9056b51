//! Campaign configuration
//!
//! Every recognized option is an explicit field with a default; unknown keys
//! are rejected at deserialization time rather than silently ignored.

use fanout_common::{BotId, RecipientId, UserId};
use serde::{Deserialize, Serialize};

/// Configuration for one campaign run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    /// Human-readable campaign name
    #[serde(default)]
    pub name: String,

    /// Calling user the campaign is billed against at the limiter
    pub owner: UserId,

    /// Sender identities the campaign may draw from
    pub bots: Vec<BotId>,

    /// Ordered target list
    pub recipients: Vec<RecipientId>,

    /// Message text variants; one is drawn uniformly per recipient
    pub variants: Vec<String>,

    /// Number of contiguous chunks (and workers) the target list splits into
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Maximum time to wait for a limiter grant before re-checking status
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,

    /// Adaptive inter-send delay settings
    #[serde(default)]
    pub delay: DelayConfig,

    /// Monitor loop settings
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl CampaignConfig {
    #[must_use]
    pub fn new(
        owner: UserId,
        bots: Vec<BotId>,
        recipients: Vec<RecipientId>,
        variants: Vec<String>,
    ) -> Self {
        Self {
            name: String::new(),
            owner,
            bots,
            recipients,
            variants,
            parallelism: default_parallelism(),
            gate_timeout_secs: default_gate_timeout_secs(),
            delay: DelayConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: DelayConfig) -> Self {
        self.delay = delay;
        self
    }
}

const fn default_parallelism() -> usize {
    3
}

const fn default_gate_timeout_secs() -> u64 {
    30
}

/// Adaptive delay tuning.
///
/// The multipliers and rate thresholds are business tuning knobs, not
/// invariants, so all of them are configurable with the historical defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Baseline inter-send delay in seconds
    #[serde(default = "default_base_secs")]
    pub base_secs: f64,

    /// Lower clamp on the computed delay
    #[serde(default = "default_min_secs")]
    pub min_secs: f64,

    /// Upper clamp on the computed delay
    #[serde(default = "default_max_secs")]
    pub max_secs: f64,

    /// Success rate above which the delay shrinks
    #[serde(default = "default_fast_rate")]
    pub fast_rate: f64,
    #[serde(default = "default_fast_multiplier")]
    pub fast_multiplier: f64,

    /// Success rate above which the delay is left at baseline
    #[serde(default = "default_steady_rate")]
    pub steady_rate: f64,
    #[serde(default = "default_steady_multiplier")]
    pub steady_multiplier: f64,

    /// Success rate above which the delay grows mildly
    #[serde(default = "default_slow_rate")]
    pub slow_rate: f64,
    #[serde(default = "default_slow_multiplier")]
    pub slow_multiplier: f64,

    /// Multiplier applied below `slow_rate`
    #[serde(default = "default_crawl_multiplier")]
    pub crawl_multiplier: f64,

    /// Extra multiplier after a flood-wait error
    #[serde(default = "default_flood_multiplier")]
    pub flood_multiplier: f64,

    /// Extra multiplier after a privacy-block error
    #[serde(default = "default_privacy_multiplier")]
    pub privacy_multiplier: f64,

    /// Jitter bounds; a uniform factor in `[jitter_low, jitter_high]`
    #[serde(default = "default_jitter_low")]
    pub jitter_low: f64,
    #[serde(default = "default_jitter_high")]
    pub jitter_high: f64,
}

impl DelayConfig {
    /// Reject values the delay computation cannot survive: clamp bounds
    /// feed `f64::clamp` and `Duration::from_secs_f64`, which panic on
    /// inverted, negative, or non-finite inputs.
    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if !self.base_secs.is_finite() || self.base_secs < 0.0 {
            return Err("delay base must be finite and non-negative");
        }
        if !self.min_secs.is_finite() || self.min_secs < 0.0 {
            return Err("delay lower clamp must be finite and non-negative");
        }
        if !self.max_secs.is_finite() || self.max_secs < self.min_secs {
            return Err("delay upper clamp must be finite and at least the lower clamp");
        }
        if !self.jitter_low.is_finite() || self.jitter_low <= 0.0 {
            return Err("jitter lower bound must be finite and positive");
        }
        if !self.jitter_high.is_finite() || self.jitter_high < self.jitter_low {
            return Err("jitter upper bound must be finite and at least the lower bound");
        }

        let multipliers = [
            self.fast_multiplier,
            self.steady_multiplier,
            self.slow_multiplier,
            self.crawl_multiplier,
            self.flood_multiplier,
            self.privacy_multiplier,
        ];
        if multipliers.iter().any(|m| !m.is_finite() || *m <= 0.0) {
            return Err("delay multipliers must be finite and positive");
        }

        Ok(())
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            min_secs: default_min_secs(),
            max_secs: default_max_secs(),
            fast_rate: default_fast_rate(),
            fast_multiplier: default_fast_multiplier(),
            steady_rate: default_steady_rate(),
            steady_multiplier: default_steady_multiplier(),
            slow_rate: default_slow_rate(),
            slow_multiplier: default_slow_multiplier(),
            crawl_multiplier: default_crawl_multiplier(),
            flood_multiplier: default_flood_multiplier(),
            privacy_multiplier: default_privacy_multiplier(),
            jitter_low: default_jitter_low(),
            jitter_high: default_jitter_high(),
        }
    }
}

const fn default_base_secs() -> f64 {
    1.0
}

const fn default_min_secs() -> f64 {
    0.1
}

const fn default_max_secs() -> f64 {
    30.0
}

const fn default_fast_rate() -> f64 {
    0.9
}

const fn default_fast_multiplier() -> f64 {
    0.8
}

const fn default_steady_rate() -> f64 {
    0.7
}

const fn default_steady_multiplier() -> f64 {
    1.0
}

const fn default_slow_rate() -> f64 {
    0.5
}

const fn default_slow_multiplier() -> f64 {
    1.2
}

const fn default_crawl_multiplier() -> f64 {
    1.5
}

const fn default_flood_multiplier() -> f64 {
    2.0
}

const fn default_privacy_multiplier() -> f64 {
    1.3
}

const fn default_jitter_low() -> f64 {
    0.9
}

const fn default_jitter_high() -> f64 {
    1.2
}

/// Monitor loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Seconds between statistics polls
    #[serde(default = "default_poll_secs")]
    pub poll_secs: f64,

    /// Rolling success rate below which the monitor raises the base delay
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Factor the monitor multiplies the base delay by on a slowdown
    #[serde(default = "default_slowdown_factor")]
    pub slowdown_factor: f64,

    /// Sends that must have happened before the success rate is trusted
    #[serde(default = "default_min_sample")]
    pub min_sample: u64,
}

impl MonitorConfig {
    /// The poll interval feeds `tokio::time::interval`, which panics on a
    /// zero or non-finite duration.
    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if !self.poll_secs.is_finite() || self.poll_secs <= 0.0 {
            return Err("monitor poll interval must be finite and positive");
        }
        if !self.min_success_rate.is_finite() {
            return Err("monitor success-rate watermark must be finite");
        }
        if !self.slowdown_factor.is_finite() || self.slowdown_factor <= 0.0 {
            return Err("monitor slowdown factor must be finite and positive");
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            min_success_rate: default_min_success_rate(),
            slowdown_factor: default_slowdown_factor(),
            min_sample: default_min_sample(),
        }
    }
}

const fn default_poll_secs() -> f64 {
    1.0
}

const fn default_min_success_rate() -> f64 {
    0.3
}

const fn default_slowdown_factor() -> f64 {
    1.5
}

const fn default_min_sample() -> u64 {
    10
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in() {
        let config: CampaignConfig = toml::from_str(
            r#"
            owner = 7
            bots = [1, 2]
            recipients = [100, 101]
            variants = ["hello"]
            "#,
        )
        .unwrap();

        assert_eq!(config.parallelism, 3);
        assert!((config.delay.base_secs - 1.0).abs() < f64::EPSILON);
        assert!((config.monitor.min_success_rate - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_bounds_validated() {
        assert!(DelayConfig::default().validate().is_ok());

        let inverted = DelayConfig {
            min_secs: 5.0,
            max_secs: 1.0,
            ..DelayConfig::default()
        };
        assert!(inverted.validate().is_err());

        let negative = DelayConfig {
            base_secs: -1.0,
            ..DelayConfig::default()
        };
        assert!(negative.validate().is_err());

        let bad_jitter = DelayConfig {
            jitter_low: 1.5,
            jitter_high: 0.5,
            ..DelayConfig::default()
        };
        assert!(bad_jitter.validate().is_err());

        let bad_multiplier = DelayConfig {
            flood_multiplier: f64::NAN,
            ..DelayConfig::default()
        };
        assert!(bad_multiplier.validate().is_err());
    }

    #[test]
    fn test_monitor_poll_validated() {
        assert!(MonitorConfig::default().validate().is_ok());

        let zero_poll = MonitorConfig {
            poll_secs: 0.0,
            ..MonitorConfig::default()
        };
        assert!(zero_poll.validate().is_err());

        let negative_poll = MonitorConfig {
            poll_secs: -1.0,
            ..MonitorConfig::default()
        };
        assert!(negative_poll.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<CampaignConfig, _> = toml::from_str(
            r#"
            owner = 7
            bots = [1]
            recipients = [100]
            variants = ["hello"]
            turbo_mode = true
            "#,
        );

        assert!(result.is_err());
    }
}
