//! Campaign statistics
//!
//! One record shared by every worker of a campaign and by the monitor loop.
//! All counter updates are read-modify-write, so the whole record sits behind
//! a single mutex rather than scattering atomics that could drift apart.

use std::{collections::HashMap, sync::Arc};

use fanout_common::SendError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Coarse classification of the most recent send error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FloodWait,
    PrivacyBlocked,
    Other,
}

impl From<&SendError> for ErrorKind {
    fn from(err: &SendError) -> Self {
        match err {
            SendError::FloodWait { .. } => Self::FloodWait,
            SendError::PrivacyBlocked => Self::PrivacyBlocked,
            SendError::Failed(_) => Self::Other,
        }
    }
}

/// Per-variant counters used by A/B evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounters {
    pub sent: u64,
    pub success: u64,
}

/// Counters for one campaign run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    /// Recipients attempted so far (success + failure)
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    /// Failures that were flood-wait throttles
    pub flood_wait: u64,
    /// Failures that were privacy blocks
    pub privacy_blocked: u64,
    /// Classification of the most recent error, cleared on success
    pub last_error: Option<ErrorKind>,
    /// Success/sent counters keyed by message variant
    pub variants: HashMap<String, VariantCounters>,
}

impl CampaignStats {
    /// Rolling success rate in `[0.0, 1.0]`; `1.0` before any send.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.success as f64 / self.processed as f64
        }
    }
}

/// Statistics record shared across a campaign's workers.
#[derive(Debug, Clone, Default)]
pub struct SharedStats {
    inner: Arc<Mutex<CampaignStats>>,
}

impl SharedStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, variant: &str) {
        let mut stats = self.inner.lock();
        stats.processed += 1;
        stats.success += 1;
        stats.last_error = None;

        let counters = stats.variants.entry(variant.to_string()).or_default();
        counters.sent += 1;
        counters.success += 1;
    }

    pub fn record_failure(&self, variant: &str, kind: ErrorKind) {
        let mut stats = self.inner.lock();
        stats.processed += 1;
        stats.failed += 1;
        stats.last_error = Some(kind);
        match kind {
            ErrorKind::FloodWait => stats.flood_wait += 1,
            ErrorKind::PrivacyBlocked => stats.privacy_blocked += 1,
            ErrorKind::Other => {}
        }

        stats.variants.entry(variant.to_string()).or_default().sent += 1;
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> CampaignStats {
        self.inner.lock().clone()
    }

    /// `(success_rate, last_error)` read under one lock acquisition.
    #[must_use]
    pub fn pacing_inputs(&self) -> (f64, Option<ErrorKind>) {
        let stats = self.inner.lock();
        (stats.success_rate(), stats.last_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_full_before_any_send() {
        let stats = CampaignStats::default();
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_and_error_classes() {
        let shared = SharedStats::new();
        shared.record_success("a");
        shared.record_failure(
            "a",
            ErrorKind::from(&SendError::FloodWait {
                retry_after: std::time::Duration::from_secs(5),
            }),
        );
        shared.record_failure("b", ErrorKind::from(&SendError::PrivacyBlocked));

        let snap = shared.snapshot();
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.success, 1);
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.flood_wait, 1);
        assert_eq!(snap.privacy_blocked, 1);
        assert_eq!(snap.last_error, Some(ErrorKind::PrivacyBlocked));
        assert!((snap.success_rate() - 1.0 / 3.0).abs() < 1e-9);

        let a = snap.variants.get("a").unwrap();
        assert_eq!(a.sent, 2);
        assert_eq!(a.success, 1);
    }

    #[test]
    fn test_success_clears_last_error() {
        let shared = SharedStats::new();
        shared.record_failure("a", ErrorKind::Other);
        shared.record_success("a");
        assert_eq!(shared.snapshot().last_error, None);
    }
}
