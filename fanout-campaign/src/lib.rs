//! Campaign coordination for the fanout engine
//!
//! A campaign is a bulk-messaging job: a target list split into contiguous
//! chunks, one worker per chunk, paced by an adaptive delay recomputed before
//! every send, with sender identities drawn from a shared health-weight
//! table. A monitor loop finalizes the campaign and applies a global
//! slowdown when delivery degrades. A/B variant evaluation is a batch report
//! over the counters the workers collect.

mod abtest;
mod config;
mod coordinator;
mod delay;
mod error;
mod stats;
mod weights;

pub use abtest::{AbTestResult, VariantOutcome};
pub use config::{CampaignConfig, DelayConfig, MonitorConfig};
pub use coordinator::{CampaignCallback, CampaignCoordinator, CampaignSnapshot};
pub use delay::AdaptiveDelay;
pub use error::CampaignError;
pub use stats::{CampaignStats, ErrorKind, SharedStats, VariantCounters};
pub use weights::{WeightConfig, WeightTable};
