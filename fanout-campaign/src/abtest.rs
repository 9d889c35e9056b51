//! A/B variant evaluation
//!
//! A batch report over the per-variant counters a campaign has already
//! collected. This never touches the live dispatch loop; it only reads a
//! statistics snapshot.

use serde::{Deserialize, Serialize};

use crate::{error::CampaignError, stats::CampaignStats};

/// Measured outcome of one message variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOutcome {
    pub variant: String,
    pub sent: u64,
    pub success: u64,
    /// `success / sent`, or `0.0` for an unused variant
    pub rate: f64,
}

/// Result of comparing message variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestResult {
    /// Outcomes sorted by success rate, best first
    pub outcomes: Vec<VariantOutcome>,
    pub winner: String,
    /// Rough confidence in `[0.0, 1.0]`: the rate margin over the runner-up,
    /// discounted while the winner's sample is small
    pub confidence: f64,
}

/// Compare `variants` against the counters in `stats`.
///
/// Requires at least two variants. Variants the campaign never sent score a
/// rate of zero rather than erroring, so a test can be evaluated mid-run.
pub fn evaluate(stats: &CampaignStats, variants: &[String]) -> Result<AbTestResult, CampaignError> {
    if variants.len() < 2 {
        return Err(CampaignError::InvalidConfig(
            "an A/B test needs at least two variants",
        ));
    }

    let mut outcomes: Vec<VariantOutcome> = variants
        .iter()
        .map(|variant| {
            let counters = stats.variants.get(variant).copied().unwrap_or_default();
            #[allow(clippy::cast_precision_loss)]
            let rate = if counters.sent == 0 {
                0.0
            } else {
                counters.success as f64 / counters.sent as f64
            };
            VariantOutcome {
                variant: variant.clone(),
                sent: counters.sent,
                success: counters.success,
                rate,
            }
        })
        .collect();

    outcomes.sort_by(|a, b| b.rate.total_cmp(&a.rate));

    let winner = outcomes[0].variant.clone();
    let margin = outcomes[0].rate - outcomes[1].rate;
    #[allow(clippy::cast_precision_loss)]
    let sample = outcomes[0].sent as f64;
    let confidence = (margin * (sample / (sample + 20.0))).clamp(0.0, 1.0);

    Ok(AbTestResult {
        outcomes,
        winner,
        confidence,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stats::VariantCounters;

    fn stats_with(entries: &[(&str, u64, u64)]) -> CampaignStats {
        let mut stats = CampaignStats::default();
        for &(name, sent, success) in entries {
            stats
                .variants
                .insert(name.to_string(), VariantCounters { sent, success });
        }
        stats
    }

    #[test]
    fn test_highest_rate_wins() {
        let stats = stats_with(&[("a", 100, 60), ("b", 100, 90)]);
        let result =
            evaluate(&stats, &["a".to_string(), "b".to_string()]).unwrap();

        assert_eq!(result.winner, "b");
        assert!((result.outcomes[0].rate - 0.9).abs() < 1e-9);
        assert!(result.confidence > 0.2);
    }

    #[test]
    fn test_small_sample_discounts_confidence() {
        let large = evaluate(
            &stats_with(&[("a", 200, 180), ("b", 200, 100)]),
            &["a".to_string(), "b".to_string()],
        )
        .unwrap();
        let small = evaluate(
            &stats_with(&[("a", 2, 2), ("b", 2, 1)]),
            &["a".to_string(), "b".to_string()],
        )
        .unwrap();

        assert!(large.confidence > small.confidence);
    }

    #[test]
    fn test_unused_variant_scores_zero() {
        let stats = stats_with(&[("a", 50, 25)]);
        let result =
            evaluate(&stats, &["a".to_string(), "ghost".to_string()]).unwrap();

        assert_eq!(result.winner, "a");
        assert_eq!(result.outcomes[1].sent, 0);
        assert!((result.outcomes[1].rate).abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_variant_rejected() {
        let stats = CampaignStats::default();
        assert!(evaluate(&stats, &["only".to_string()]).is_err());
    }
}
