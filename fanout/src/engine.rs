//! The engine: one object owning every component
//!
//! Created at process start, handed by reference into the request-handling
//! layer, torn down once at shutdown. Control operations on the components
//! return immediately; the engine's workers do the waiting.

use std::sync::Arc;

use fanout_campaign::{CampaignCallback, CampaignCoordinator, WeightTable};
use fanout_common::{ProgressCallback, Signal, Transport, internal};
use fanout_dispatch::{CursorStore, DispatchQueue};
use fanout_limiter::RateLimiter;
use fanout_tasks::JobRegistry;
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::EngineConfig;

/// Builder for an [`Engine`], wiring optional hooks before the components
/// are assembled.
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    progress_callback: Option<ProgressCallback>,
    campaign_callback: Option<CampaignCallback>,
}

impl EngineBuilder {
    /// Attach a durability hook for dispatch task cursors.
    #[must_use]
    pub fn cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    /// Attach a progress callback for dispatch tasks.
    #[must_use]
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Attach a progress callback for campaigns.
    #[must_use]
    pub fn campaign_callback(mut self, callback: CampaignCallback) -> Self {
        self.campaign_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        let limiter = Arc::new(RateLimiter::new(self.config.limiter.clone()));
        let weights = Arc::new(WeightTable::new(self.config.weights.clone()));

        let mut queue = DispatchQueue::new(
            self.config.dispatch.clone(),
            Arc::clone(&limiter),
            Arc::clone(&self.transport),
        );
        if let Some(store) = self.cursor_store {
            queue = queue.with_cursor_store(store);
        }
        if let Some(callback) = self.progress_callback {
            queue = queue.with_progress_callback(callback);
        }

        let mut campaigns = CampaignCoordinator::new(
            Arc::clone(&limiter),
            Arc::clone(&self.transport),
            Arc::clone(&weights),
        );
        if let Some(callback) = self.campaign_callback {
            campaigns = campaigns.with_callback(callback);
        }

        let (shutdown, _) = broadcast::channel(16);

        Engine {
            jobs: JobRegistry::new(self.config.jobs.clone()),
            queue: Arc::new(queue),
            campaigns: Arc::new(campaigns),
            limiter,
            weights,
            config: self.config,
            shutdown,
            serve_handle: parking_lot::Mutex::new(None),
        }
    }
}

/// The assembled engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    limiter: Arc<RateLimiter>,
    weights: Arc<WeightTable>,
    jobs: JobRegistry,
    queue: Arc<DispatchQueue>,
    campaigns: Arc<CampaignCoordinator>,
    shutdown: broadcast::Sender<Signal>,
    serve_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    /// Assemble an engine with no optional hooks.
    #[must_use]
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        Self::builder(config, transport).build()
    }

    /// Start building an engine.
    #[must_use]
    pub fn builder(config: EngineConfig, transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder {
            config,
            transport,
            cursor_store: None,
            progress_callback: None,
            campaign_callback: None,
        }
    }

    /// Start the dispatch workers and the job registry's retention sweep.
    pub fn start(&self) {
        internal!(level = INFO, "Starting fanout engine");

        self.queue.start(self.config.dispatch_workers);

        let jobs = self.jobs.clone();
        let receiver = self.shutdown.subscribe();
        *self.serve_handle.lock() = Some(tokio::spawn(async move {
            jobs.serve(receiver).await;
        }));
    }

    /// Stop every campaign, drain the dispatch workers, and halt the job
    /// registry's loops.
    pub async fn shutdown(&self) {
        internal!(level = INFO, "Shutting down fanout engine");

        self.campaigns.shutdown();
        self.queue.stop().await;

        let _ = self.shutdown.send(Signal::Shutdown);
        let handle = self.serve_handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "job registry loop exited abnormally");
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn weights(&self) -> &Arc<WeightTable> {
        &self.weights
    }

    #[must_use]
    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    #[must_use]
    pub fn dispatch(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    #[must_use]
    pub fn campaigns(&self) -> &Arc<CampaignCoordinator> {
        &self.campaigns
    }
}
