//! Engine configuration
//!
//! One TOML file drives the whole engine; every section falls back to its
//! component's defaults when omitted.

use std::path::Path;

use anyhow::Context;
use fanout_campaign::WeightConfig;
use fanout_dispatch::DispatchConfig;
use fanout_limiter::RateLimitConfig;
use fanout_tasks::JobConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Rate limiter settings
    #[serde(default)]
    pub limiter: RateLimitConfig,

    /// Background job registry settings
    #[serde(default)]
    pub jobs: JobConfig,

    /// Dispatch queue settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Sender identity weight table settings
    #[serde(default)]
    pub weights: WeightConfig,

    /// Number of dispatch queue workers started by the engine
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limiter: RateLimitConfig::default(),
            jobs: JobConfig::default(),
            dispatch: DispatchConfig::default(),
            weights: WeightConfig::default(),
            dispatch_workers: default_dispatch_workers(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// If the file cannot be read or does not parse.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing engine config {}", path.display()))
    }
}

const fn default_dispatch_workers() -> usize {
    4
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.dispatch_workers, 4);
        assert_eq!(config.jobs.max_concurrent, 5);
        assert!((config.limiter.user_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            dispatch_workers = 8

            [limiter]
            global_rate = 50.0

            [jobs]
            max_concurrent = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatch_workers, 8);
        assert!((config.limiter.global_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.jobs.max_concurrent, 2);
        // Untouched sections keep their defaults
        assert_eq!(config.dispatch.gate_timeout_secs, 30);
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let result: Result<EngineConfig, _> = toml::from_str("turbo = true");
        assert!(result.is_err());
    }
}
