//! Campaign dispatch and rate-limiting engine
//!
//! The core of a multi-tenant outbound-messaging platform: a token-bucket
//! rate limiter with a composite send gate, an admission-controlled
//! background job registry, a FIFO dispatch queue with a worker pool, and a
//! campaign coordinator with adaptive pacing and weighted sender-identity
//! selection. [`Engine`] wires the components together from one
//! configuration file; everything else is re-exported from the component
//! crates.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fanout::{Engine, EngineConfig};
//! # use fanout::{BotId, RecipientId, SendError, Transport};
//! # #[derive(Debug)]
//! # struct MyTransport;
//! # #[async_trait::async_trait]
//! # impl Transport for MyTransport {
//! #     async fn send(&self, _: BotId, _: RecipientId, _: &str) -> Result<(), SendError> {
//! #         Ok(())
//! #     }
//! # }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::from_path("fanout.toml")?;
//! let engine = Engine::new(config, Arc::new(MyTransport));
//! engine.start();
//! // ... hand &engine to the request-handling layer ...
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};

pub use fanout_campaign::{
    AbTestResult, CampaignCallback, CampaignConfig, CampaignCoordinator, CampaignError,
    CampaignSnapshot, CampaignStats, DelayConfig, MonitorConfig, WeightConfig, WeightTable,
};
pub use fanout_common::{
    BotId, CampaignId, CampaignStatus, JobId, JobStatus, ProgressCallback, ProgressSnapshot,
    RecipientId, SendError, Signal, TaskId, TaskStatus, Transport, UserId, logging,
};
pub use fanout_dispatch::{
    CursorStore, DispatchConfig, DispatchError, DispatchQueue, MailingTask, MemoryCursorStore,
};
pub use fanout_limiter::{RateLimitConfig, RateLimiter, SpamConfig, Verdict};
pub use fanout_tasks::{Job, JobConfig, JobRegistry};
