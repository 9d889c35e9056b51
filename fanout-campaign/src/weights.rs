//! Sender identity health weights
//!
//! Process-wide table mapping each sender identity to a floating health
//! weight. Every send outcome nudges the weight of the identity that carried
//! it, and selection draws proportionally to weight, so traffic drifts away
//! from identities that are failing toward healthier ones.

use dashmap::DashMap;
use fanout_common::BotId;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Weight table tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightConfig {
    /// Weight assigned to an identity on first sight
    #[serde(default = "default_initial")]
    pub initial: f64,

    /// Soft floor; failures never push a weight below this, and identities
    /// sitting at it are skipped by selection while healthier ones exist
    #[serde(default = "default_floor")]
    pub floor: f64,

    /// Soft ceiling; successes never push a weight above this
    #[serde(default = "default_cap")]
    pub cap: f64,

    /// Factor applied on success
    #[serde(default = "default_success_factor")]
    pub success_factor: f64,

    /// Factor applied on failure
    #[serde(default = "default_failure_factor")]
    pub failure_factor: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            initial: default_initial(),
            floor: default_floor(),
            cap: default_cap(),
            success_factor: default_success_factor(),
            failure_factor: default_failure_factor(),
        }
    }
}

const fn default_initial() -> f64 {
    100.0
}

const fn default_floor() -> f64 {
    10.0
}

const fn default_cap() -> f64 {
    150.0
}

const fn default_success_factor() -> f64 {
    1.05
}

const fn default_failure_factor() -> f64 {
    0.85
}

/// Shared health-weight table for sender identities.
#[derive(Debug, Default)]
pub struct WeightTable {
    config: WeightConfig,
    weights: DashMap<BotId, f64>,
}

impl WeightTable {
    #[must_use]
    pub fn new(config: WeightConfig) -> Self {
        Self {
            config,
            weights: DashMap::new(),
        }
    }

    /// Ensure `bot` has an entry, at the initial weight if new.
    pub fn register(&self, bot: BotId) {
        self.weights.entry(bot).or_insert(self.config.initial);
    }

    /// Current weight of `bot`, registering it if unknown.
    #[must_use]
    pub fn weight(&self, bot: BotId) -> f64 {
        *self.weights.entry(bot).or_insert(self.config.initial)
    }

    /// Nudge `bot`'s weight after a send outcome.
    pub fn update(&self, bot: BotId, success: bool) {
        let mut entry = self.weights.entry(bot).or_insert(self.config.initial);
        *entry = if success {
            (*entry * self.config.success_factor).min(self.config.cap)
        } else {
            (*entry * self.config.failure_factor).max(self.config.floor)
        };
    }

    /// Weighted-random draw among `candidates`.
    ///
    /// Identities sitting at the floor are excluded unless that would leave
    /// nothing to pick from; the survivors' weights are normalized and a
    /// cumulative scan against a uniform draw selects one. Returns `None`
    /// only for an empty candidate list.
    #[must_use]
    pub fn pick(&self, candidates: &[BotId]) -> Option<BotId> {
        if candidates.is_empty() {
            return None;
        }

        let mut weighted: Vec<(BotId, f64)> = candidates
            .iter()
            .map(|&bot| (bot, self.weight(bot)))
            .filter(|&(_, w)| w > self.config.floor)
            .collect();
        if weighted.is_empty() {
            // Everyone is at the floor; fall back to the full set
            weighted = candidates
                .iter()
                .map(|&bot| (bot, self.weight(bot)))
                .collect();
        }

        let total: f64 = weighted.iter().map(|&(_, w)| w).sum();
        if total <= 0.0 {
            return weighted.first().map(|&(bot, _)| bot);
        }

        weighted.sort_by(|a, b| b.1.total_cmp(&a.1));

        let draw = rand::rng().random_range(0.0..1.0);
        let mut cumulative = 0.0;
        for &(bot, weight) in &weighted {
            cumulative += weight / total;
            if draw < cumulative {
                return Some(bot);
            }
        }

        // Floating point shortfall at the tail
        weighted.last().map(|&(bot, _)| bot)
    }
}
