//! Campaign coordination
//!
//! A campaign splits its target list into contiguous chunks and runs one
//! worker per chunk. Each worker paces itself with the adaptive delay, draws
//! a sender identity from the shared weight table, passes the limiter gate,
//! sends, and feeds the outcome back into the statistics record and the
//! weight table. A separate monitor loop watches the statistics: it finalizes
//! the campaign when every recipient has been attempted and applies a global
//! slowdown when the success rate collapses.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fanout_common::{
    BotId, CampaignId, CampaignStatus, RecipientId, SendError, Transport, UserId, internal,
};
use fanout_limiter::RateLimiter;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    abtest::{self, AbTestResult},
    config::CampaignConfig,
    delay::AdaptiveDelay,
    error::CampaignError,
    stats::{CampaignStats, ErrorKind, SharedStats},
    weights::WeightTable,
};

/// How often a paused worker re-checks the campaign status.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Point-in-time view of a campaign for progress reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSnapshot {
    pub campaign_id: CampaignId,
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    pub total: u64,
    /// Completion percentage over `processed`, in `[0.0, 100.0]`
    pub percent: f64,
    pub status: CampaignStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Callback invoked after each send a campaign makes.
pub type CampaignCallback = Arc<dyn Fn(CampaignSnapshot) + Send + Sync>;

/// State of one running campaign.
#[derive(Debug)]
struct CampaignRun {
    id: CampaignId,
    name: String,
    owner: UserId,
    bots: Vec<BotId>,
    variants: Vec<String>,
    total: u64,
    gate_timeout: Duration,
    status: Mutex<CampaignStatus>,
    stats: SharedStats,
    delay: AdaptiveDelay,
    started_at: DateTime<Utc>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
    monitor: crate::config::MonitorConfig,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Workers of this campaign that have not yet exited
    live_workers: AtomicUsize,
}

impl CampaignRun {
    fn status(&self) -> CampaignStatus {
        *self.status.lock()
    }

    fn snapshot(&self) -> CampaignSnapshot {
        let stats = self.stats.snapshot();
        #[allow(clippy::cast_precision_loss)]
        let percent = if self.total == 0 {
            100.0
        } else {
            (stats.processed as f64 / self.total as f64 * 100.0).min(100.0)
        };

        CampaignSnapshot {
            campaign_id: self.id,
            processed: stats.processed,
            success: stats.success,
            failed: stats.failed,
            total: self.total,
            percent,
            status: self.status(),
            started_at: self.started_at,
            completed_at: *self.completed_at.lock(),
        }
    }
}

/// Owner of all live campaigns.
///
/// Control operations return immediately; workers observe status flips
/// cooperatively between sends.
pub struct CampaignCoordinator {
    campaigns: DashMap<CampaignId, Arc<CampaignRun>>,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    weights: Arc<WeightTable>,
    /// Engine-wide count of live campaign workers
    active_workers: Arc<AtomicUsize>,
    callback: Option<CampaignCallback>,
}

// The progress callback is an opaque closure, so Debug cannot be derived.
impl std::fmt::Debug for CampaignCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignCoordinator")
            .field("campaigns", &self.campaigns.len())
            .field("active_workers", &self.active_workers.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl CampaignCoordinator {
    #[must_use]
    pub fn new(
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        weights: Arc<WeightTable>,
    ) -> Self {
        Self {
            campaigns: DashMap::new(),
            limiter,
            transport,
            weights,
            active_workers: Arc::new(AtomicUsize::new(0)),
            callback: None,
        }
    }

    /// Attach a progress callback, invoked after each send.
    #[must_use]
    pub fn with_callback(mut self, callback: CampaignCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Start a campaign: partition the target list, spawn one worker per
    /// chunk plus the monitor loop, and return the campaign id.
    ///
    /// # Errors
    /// [`CampaignError::InvalidConfig`] when the configuration has no
    /// recipients, no variants, no sender identities, zero parallelism, or
    /// out-of-range delay or monitor settings.
    pub fn start_campaign(
        self: &Arc<Self>,
        config: CampaignConfig,
    ) -> Result<CampaignId, CampaignError> {
        if config.recipients.is_empty() {
            return Err(CampaignError::InvalidConfig("no recipients"));
        }
        if config.variants.is_empty() {
            return Err(CampaignError::InvalidConfig("no message variants"));
        }
        if config.bots.is_empty() {
            return Err(CampaignError::InvalidConfig("no sender identities"));
        }
        if config.parallelism == 0 {
            return Err(CampaignError::InvalidConfig("parallelism must be positive"));
        }
        // Range checks up front; a bad value discovered inside a spawned
        // worker or the monitor loop would kill the task silently instead.
        config.delay.validate().map_err(CampaignError::InvalidConfig)?;
        config
            .monitor
            .validate()
            .map_err(CampaignError::InvalidConfig)?;

        for &bot in &config.bots {
            self.weights.register(bot);
        }

        let id = CampaignId::generate();
        let chunks = partition(&config.recipients, config.parallelism);

        let run = Arc::new(CampaignRun {
            id,
            name: config.name,
            owner: config.owner,
            bots: config.bots,
            variants: config.variants,
            total: config.recipients.len() as u64,
            gate_timeout: Duration::from_secs(config.gate_timeout_secs),
            status: Mutex::new(CampaignStatus::Running),
            stats: SharedStats::new(),
            delay: AdaptiveDelay::new(config.delay),
            started_at: Utc::now(),
            completed_at: Mutex::new(None),
            monitor: config.monitor,
            workers: Mutex::new(Vec::new()),
            live_workers: AtomicUsize::new(0),
        });

        let name = run.name.as_str();
        let total = run.total;
        let worker_count = chunks.len();
        internal!(
            level = INFO,
            "Starting campaign {id} {name:?}: {total} recipients across {worker_count} workers"
        );

        {
            let mut workers = run.workers.lock();
            for chunk in chunks {
                run.live_workers.fetch_add(1, Ordering::SeqCst);
                self.active_workers.fetch_add(1, Ordering::SeqCst);

                let coordinator = Arc::clone(self);
                let run = Arc::clone(&run);
                workers.push(tokio::spawn(async move {
                    coordinator.worker(&run, chunk).await;
                    release_worker(&run, &coordinator.active_workers);
                }));
            }
        }

        {
            let coordinator = Arc::clone(self);
            let run_for_monitor = Arc::clone(&run);
            tokio::spawn(async move {
                coordinator.monitor(&run_for_monitor).await;
            });
        }

        self.campaigns.insert(id, run);
        Ok(id)
    }

    /// Pause a running campaign. Workers observe the flip and sleep in place
    /// without advancing, until resumed or stopped.
    ///
    /// # Errors
    /// If the campaign is unknown or not running.
    pub fn pause_campaign(&self, id: CampaignId) -> Result<(), CampaignError> {
        let run = self.run(id)?;
        let mut status = run.status.lock();
        match *status {
            CampaignStatus::Running => {
                *status = CampaignStatus::Paused;
                Ok(())
            }
            current => Err(CampaignError::InvalidTransition {
                id,
                status: current,
                operation: "pause",
            }),
        }
    }

    /// Resume a paused campaign.
    ///
    /// # Errors
    /// If the campaign is unknown or not paused.
    pub fn resume_campaign(&self, id: CampaignId) -> Result<(), CampaignError> {
        let run = self.run(id)?;
        let mut status = run.status.lock();
        match *status {
            CampaignStatus::Paused => {
                *status = CampaignStatus::Running;
                Ok(())
            }
            current => Err(CampaignError::InvalidTransition {
                id,
                status: current,
                operation: "resume",
            }),
        }
    }

    /// Stop a campaign: flip it to cancelled, abort its workers, and release
    /// their slots in the engine-wide worker count.
    ///
    /// # Errors
    /// If the campaign is unknown or already terminal.
    pub fn stop_campaign(&self, id: CampaignId) -> Result<(), CampaignError> {
        let run = self.run(id)?;
        {
            let mut status = run.status.lock();
            if status.is_terminal() {
                return Err(CampaignError::InvalidTransition {
                    id,
                    status: *status,
                    operation: "stop",
                });
            }
            *status = CampaignStatus::Cancelled;
        }
        *run.completed_at.lock() = Some(Utc::now());

        let handles: Vec<_> = std::mem::take(&mut *run.workers.lock());
        for handle in &handles {
            handle.abort();
        }
        // Slots held by the aborted workers; workers that already exited
        // released theirs on the way out
        let live = run.live_workers.swap(0, Ordering::SeqCst);
        self.active_workers.fetch_sub(live, Ordering::SeqCst);

        info!(campaign_id = %id, "campaign stopped");
        Ok(())
    }

    /// Statistics snapshot for a campaign.
    ///
    /// # Errors
    /// If the campaign is unknown.
    pub fn campaign_stats(&self, id: CampaignId) -> Result<CampaignStats, CampaignError> {
        Ok(self.run(id)?.stats.snapshot())
    }

    /// Current status of a campaign.
    ///
    /// # Errors
    /// If the campaign is unknown.
    pub fn campaign_status(&self, id: CampaignId) -> Result<CampaignStatus, CampaignError> {
        Ok(self.run(id)?.status())
    }

    /// Progress snapshot of a campaign.
    ///
    /// # Errors
    /// If the campaign is unknown.
    pub fn campaign_snapshot(&self, id: CampaignId) -> Result<CampaignSnapshot, CampaignError> {
        Ok(self.run(id)?.snapshot())
    }

    /// Evaluate an A/B test over the campaign's collected per-variant
    /// counters. A batch report; the live send loop is not involved.
    ///
    /// # Errors
    /// If the campaign is unknown or fewer than two variants are given.
    pub fn run_ab_test(
        &self,
        id: CampaignId,
        variants: &[String],
    ) -> Result<AbTestResult, CampaignError> {
        let stats = self.run(id)?.stats.snapshot();
        abtest::evaluate(&stats, variants)
    }

    /// Engine-wide count of live campaign workers.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Stop every non-terminal campaign. Called at engine shutdown.
    pub fn shutdown(&self) {
        let ids: Vec<CampaignId> = self
            .campaigns
            .iter()
            .filter(|entry| !entry.status().is_terminal())
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            if let Err(e) = self.stop_campaign(id) {
                debug!(campaign_id = %id, error = %e, "campaign already terminal at shutdown");
            }
        }
    }

    fn run(&self, id: CampaignId) -> Result<Arc<CampaignRun>, CampaignError> {
        self.campaigns
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(CampaignError::NotFound(id))
    }

    /// Send loop for one chunk of the target list.
    async fn worker(&self, run: &CampaignRun, chunk: Vec<RecipientId>) {
        for recipient in chunk {
            loop {
                match run.status() {
                    CampaignStatus::Running => {}
                    CampaignStatus::Paused => {
                        // Sleep in place; the recipient is not consumed
                        tokio::time::sleep(PAUSE_POLL).await;
                        continue;
                    }
                    // Cancelled, or completed under us
                    _ => return,
                }

                // Recomputed per send so the campaign self-tunes
                let (rate, last_error) = run.stats.pacing_inputs();
                let pause = run.delay.next_delay(rate, last_error);
                if pause > Duration::ZERO {
                    tokio::time::sleep(pause).await;
                }

                let Some(bot) = self.weights.pick(&run.bots) else {
                    return;
                };

                // Limiter gate; on denial loop back so pause/stop stays
                // responsive while throttled
                let verdict = self
                    .limiter
                    .wait_for_send(run.owner, bot, run.gate_timeout)
                    .await;
                if !verdict.is_ok() {
                    debug!(
                        campaign_id = %run.id,
                        verdict = %verdict,
                        "send gate denied, backing off"
                    );
                    continue;
                }

                let variant = pick_variant(&run.variants);
                self.send_one(run, bot, recipient, &variant).await;
                self.report(run);
                break;
            }
        }
    }

    async fn send_one(&self, run: &CampaignRun, bot: BotId, recipient: RecipientId, text: &str) {
        match self.transport.send(bot, recipient, text).await {
            Ok(()) => {
                run.stats.record_success(text);
                self.weights.update(bot, true);
            }
            Err(e) => {
                debug!(
                    campaign_id = %run.id,
                    recipient = %recipient,
                    error = %e,
                    "campaign send failed"
                );
                run.stats.record_failure(text, ErrorKind::from(&e));
                self.weights.update(bot, false);

                if let SendError::FloodWait { retry_after } = e {
                    let cap = Duration::from_secs_f64(run.delay.base_secs().max(1.0) * 2.0);
                    tokio::time::sleep(retry_after.min(cap)).await;
                }
            }
        }
    }

    /// Poll the statistics record until the campaign finishes.
    async fn monitor(&self, run: &CampaignRun) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(run.monitor.poll_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // completes immediately

        loop {
            ticker.tick().await;

            if run.status().is_terminal() {
                return;
            }

            let stats = run.stats.snapshot();
            if stats.processed >= run.total {
                {
                    let mut status = run.status.lock();
                    if !status.is_terminal() {
                        *status = CampaignStatus::Completed;
                    }
                }
                *run.completed_at.lock() = Some(Utc::now());
                info!(
                    campaign_id = %run.id,
                    success = stats.success,
                    failed = stats.failed,
                    "campaign completed"
                );
                self.report(run);
                return;
            }

            // Global slowdown, independent of the per-send multiplier
            if stats.processed >= run.monitor.min_sample
                && stats.success_rate() < run.monitor.min_success_rate
            {
                run.delay.raise_base(run.monitor.slowdown_factor);
                warn!(
                    campaign_id = %run.id,
                    success_rate = stats.success_rate(),
                    base_secs = run.delay.base_secs(),
                    "success rate collapsed, raising base delay"
                );
            }
        }
    }

    fn report(&self, run: &CampaignRun) {
        if let Some(callback) = &self.callback {
            callback(run.snapshot());
        }
    }
}

/// Release one worker slot, both on the run and engine-wide. A stopped
/// campaign drains its slots in bulk, in which case this is a no-op.
fn release_worker(run: &CampaignRun, active_workers: &AtomicUsize) {
    if run
        .live_workers
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok()
    {
        active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Split `recipients` into `parts` contiguous chunks; the last chunk absorbs
/// the remainder of the integer division. Empty chunks are dropped.
fn partition(recipients: &[RecipientId], parts: usize) -> Vec<Vec<RecipientId>> {
    let parts = parts.max(1);
    let base = recipients.len() / parts;
    let mut chunks = Vec::with_capacity(parts);

    let mut offset = 0;
    for index in 0..parts {
        let len = if index == parts - 1 {
            recipients.len() - offset
        } else {
            base
        };
        if len > 0 {
            chunks.push(recipients[offset..offset + len].to_vec());
        }
        offset += len;
    }

    chunks
}

/// Choose a message variant uniformly at random.
fn pick_variant(variants: &[String]) -> String {
    if variants.len() == 1 {
        return variants[0].clone();
    }
    let idx = rand::rng().random_range(0..variants.len());
    variants[idx].clone()
}
