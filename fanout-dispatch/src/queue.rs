//! The dispatch queue and its worker pool

use std::{collections::VecDeque, sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;
use fanout_common::{
    BotId, ProgressCallback, RecipientId, SendError, Signal, TaskId, TaskStatus, Transport,
    dispatch,
};
use fanout_limiter::RateLimiter;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, error, warn};

use crate::{cursor::CursorStore, error::DispatchError, task::MailingTask};

/// Configuration for the dispatch queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long a worker waits on the limiter gate before re-checking the
    /// task's status (seconds)
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,

    /// Cap on how long a worker honours a provider flood-wait before moving
    /// on (seconds)
    #[serde(default = "default_flood_wait_cap_secs")]
    pub flood_wait_cap_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            gate_timeout_secs: default_gate_timeout_secs(),
            flood_wait_cap_secs: default_flood_wait_cap_secs(),
        }
    }
}

const fn default_gate_timeout_secs() -> u64 {
    30
}

const fn default_flood_wait_cap_secs() -> u64 {
    60
}

/// FIFO queue of mailing tasks drained by a fixed worker pool.
///
/// Control operations (`add_task`, `pause_task`, `resume_task`,
/// `cancel_task`) return immediately; the owning worker observes status
/// flips cooperatively between recipients.
pub struct DispatchQueue {
    config: DispatchConfig,
    tasks: DashMap<TaskId, MailingTask>,
    fifo: parking_lot::Mutex<VecDeque<TaskId>>,
    notify: Notify,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    progress_callback: Option<ProgressCallback>,
    workers: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    shutdown: broadcast::Sender<Signal>,
}

// The progress callback is an opaque closure, so Debug cannot be derived.
impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("config", &self.config)
            .field("tasks", &self.tasks.len())
            .field("queued", &self.fifo.lock().len())
            .finish_non_exhaustive()
    }
}

impl DispatchQueue {
    /// Create a new queue. Workers are not started until [`Self::start`].
    #[must_use]
    pub fn new(
        config: DispatchConfig,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            tasks: DashMap::new(),
            fifo: parking_lot::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            limiter,
            transport,
            cursor_store: None,
            progress_callback: None,
            workers: parking_lot::Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Attach a durability hook for task cursors.
    #[must_use]
    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    /// Attach a progress callback, invoked after each unit of progress.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Start `worker_count` workers draining the queue.
    pub fn start(self: &Arc<Self>, worker_count: usize) {
        dispatch!(level = INFO, "Starting dispatch queue with {worker_count} workers");

        let mut workers = self.workers.lock();
        for worker_id in 0..worker_count.max(1) {
            let queue = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            workers.push(tokio::spawn(async move {
                queue.worker_loop(worker_id, shutdown).await;
            }));
        }
    }

    /// Signal every worker to stop and wait for them to exit.
    ///
    /// Workers finish their current recipient, put their in-flight task back
    /// at the head of the queue, and exit.
    pub async fn stop(&self) {
        dispatch!(level = INFO, "Stopping dispatch queue");

        let _ = self.shutdown.send(Signal::Shutdown);
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch worker exited abnormally");
            }
        }
    }

    /// Register a task and enqueue it for processing.
    ///
    /// # Errors
    /// [`DispatchError::EmptyTask`] if the task has no message variants.
    pub fn add_task(&self, task: MailingTask) -> Result<TaskId, DispatchError> {
        if task.variants.is_empty() {
            return Err(DispatchError::EmptyTask(task.id));
        }

        let id = task.id;
        self.tasks.insert(id, task);
        self.fifo.lock().push_back(id);
        self.notify.notify_one();

        debug!(task_id = %id, "mailing task enqueued");
        Ok(id)
    }

    /// Pause a pending or running task. The owning worker stops at its next
    /// iteration, leaving the cursor valid for resumption.
    ///
    /// # Errors
    /// If the task is unknown or not in a pausable state.
    pub fn pause_task(&self, id: TaskId) -> Result<(), DispatchError> {
        let mut entry = self.tasks.get_mut(&id).ok_or(DispatchError::TaskNotFound(id))?;
        match entry.status {
            TaskStatus::Pending | TaskStatus::Running => {
                entry.status = TaskStatus::Paused;
                Ok(())
            }
            status => Err(DispatchError::InvalidTransition {
                id,
                status,
                operation: "pause",
            }),
        }
    }

    /// Resume a paused task. The worker continues from the stored cursor,
    /// not from zero.
    ///
    /// A task whose owning worker has not yet acknowledged the pause is
    /// flipped straight back to running: the owner picks it up in place and
    /// no second worker is ever attached. Only an ownerless task is
    /// re-enqueued.
    ///
    /// # Errors
    /// If the task is unknown or not paused.
    pub fn resume_task(&self, id: TaskId) -> Result<(), DispatchError> {
        let requeue = {
            let mut entry = self.tasks.get_mut(&id).ok_or(DispatchError::TaskNotFound(id))?;
            match entry.status {
                TaskStatus::Paused if entry.claimed => {
                    entry.status = TaskStatus::Running;
                    false
                }
                TaskStatus::Paused => {
                    entry.status = TaskStatus::Pending;
                    true
                }
                status => {
                    return Err(DispatchError::InvalidTransition {
                        id,
                        status,
                        operation: "resume",
                    });
                }
            }
        };

        if requeue {
            self.fifo.lock().push_back(id);
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Cancel a task. Observed by the owning worker at its next iteration;
    /// no further sends happen after that point.
    ///
    /// # Errors
    /// If the task is unknown or already terminal.
    pub fn cancel_task(&self, id: TaskId) -> Result<(), DispatchError> {
        let mut entry = self.tasks.get_mut(&id).ok_or(DispatchError::TaskNotFound(id))?;
        if entry.status.is_terminal() {
            return Err(DispatchError::InvalidTransition {
                id,
                status: entry.status,
                operation: "cancel",
            });
        }
        entry.status = TaskStatus::Cancelled;
        entry.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Current progress of a task.
    #[must_use]
    pub fn progress(&self, id: TaskId) -> Option<fanout_common::ProgressSnapshot> {
        self.tasks.get(&id).map(|entry| entry.progress())
    }

    /// Full task record.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<MailingTask> {
        self.tasks.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of tasks currently registered (any status).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown: broadcast::Receiver<Signal>,
    ) {
        debug!(worker = worker_id, "dispatch worker started");

        loop {
            let next = self.fifo.lock().pop_front();
            match next {
                Some(id) => {
                    if self.process_task(id, &mut shutdown).await {
                        break;
                    }
                }
                None => {
                    tokio::select! {
                        () = self.notify.notified() => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        debug!(worker = worker_id, "dispatch worker stopped");
    }

    /// Drive a single task. Returns `true` if a shutdown signal was observed
    /// (the worker should exit).
    ///
    /// Internal faults are caught here, recorded on the task, and never
    /// allowed to take the worker down.
    async fn process_task(&self, id: TaskId, shutdown: &mut broadcast::Receiver<Signal>) -> bool {
        match self.run_task(id, shutdown).await {
            Ok(shutdown_seen) => shutdown_seen,
            Err(e) => {
                error!(task_id = %id, error = %e, "mailing task failed");
                if let Some(mut entry) = self.tasks.get_mut(&id) {
                    entry.status = TaskStatus::Failed;
                    entry.last_error = Some(e.to_string());
                    entry.completed_at = Some(Utc::now());
                    entry.claimed = false;
                }
                self.report(id);
                false
            }
        }
    }

    #[allow(
        clippy::too_many_lines,
        reason = "The per-recipient loop naturally has many branches"
    )]
    async fn run_task(
        &self,
        id: TaskId,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> anyhow::Result<bool> {
        // Claim the task and snapshot the immutable parts once; recipients
        // and variants are not mutated while the task runs.
        let (owner, bot, variants, recipients, interval_min, interval_max) = {
            let Some(mut entry) = self.tasks.get_mut(&id) else {
                // Stale queue entry for a removed task
                return Ok(false);
            };
            // Paused while queued, cancelled before a worker got to it, or
            // already owned after a resume raced the dequeue; leave the
            // record as is.
            if entry.status != TaskStatus::Pending || entry.claimed {
                return Ok(false);
            }
            entry.claimed = true;
            entry.status = TaskStatus::Running;
            if entry.started_at.is_none() {
                entry.started_at = Some(Utc::now());
            }
            (
                entry.owner,
                entry.bot,
                entry.variants.clone(),
                entry.recipients.clone(),
                entry.interval_min_secs,
                entry.interval_max_secs,
            )
        };

        // Pick up a persisted cursor if this is a fresh start after restart
        if let Some(store) = &self.cursor_store
            && self.tasks.get(&id).is_some_and(|entry| entry.cursor == 0)
            && let Ok(Some(cursor)) = store.load(id).await
            && let Some(mut entry) = self.tasks.get_mut(&id)
        {
            entry.cursor = cursor.min(recipients.len());
        }

        loop {
            if matches!(shutdown.try_recv(), Ok(Signal::Shutdown)) {
                // Put the task back for the next start; the cursor stays valid
                if let Some(mut entry) = self.tasks.get_mut(&id) {
                    entry.status = TaskStatus::Pending;
                    entry.claimed = false;
                }
                self.fifo.lock().push_front(id);
                return Ok(true);
            }

            // Status observation and claim release happen under the same
            // entry lock, so a resume sees either an attached owner (flip
            // back to running) or a released task (re-enqueue), never both.
            let cursor = {
                let Some(mut entry) = self.tasks.get_mut(&id) else {
                    return Ok(false);
                };
                match entry.status {
                    TaskStatus::Running => entry.cursor,
                    // Pause: acknowledge and stop without consuming further
                    // recipients; the cursor stays valid for resumption.
                    TaskStatus::Paused => {
                        entry.claimed = false;
                        return Ok(false);
                    }
                    // Cancel: stop without finalizing as completed.
                    TaskStatus::Cancelled => {
                        entry.claimed = false;
                        drop(entry);
                        self.report(id);
                        return Ok(false);
                    }
                    _ => {
                        entry.claimed = false;
                        return Ok(false);
                    }
                }
            };

            let Some(&recipient) = recipients.get(cursor) else {
                // Recipient list exhausted
                if let Some(mut entry) = self.tasks.get_mut(&id) {
                    entry.status = TaskStatus::Completed;
                    entry.completed_at = Some(Utc::now());
                    entry.claimed = false;
                }
                debug!(task_id = %id, "mailing task completed");
                self.report(id);
                return Ok(false);
            };

            // Limiter gate; on denial loop back so pause/cancel stays
            // responsive while throttled.
            let verdict = self
                .limiter
                .wait_for_send(owner, bot, Duration::from_secs(self.config.gate_timeout_secs))
                .await;
            if !verdict.is_ok() {
                debug!(task_id = %id, verdict = %verdict, "send gate denied, backing off");
                continue;
            }

            let text = pick_variant(&variants);
            self.send_one(id, bot, recipient, &text).await;

            // Advance and persist the cursor, then report
            if let Some(mut entry) = self.tasks.get_mut(&id) {
                entry.cursor = cursor + 1;
            }
            if let Some(store) = &self.cursor_store
                && let Err(e) = store.persist(id, cursor + 1).await
            {
                warn!(task_id = %id, error = %e, "failed to persist task cursor");
            }
            self.report(id);

            let pause = inter_message_sleep(interval_min, interval_max);
            if pause > Duration::ZERO {
                tokio::time::sleep(pause).await;
            }
        }
    }

    async fn send_one(&self, id: TaskId, bot: BotId, recipient: RecipientId, text: &str) {
        match self.transport.send(bot, recipient, text).await {
            Ok(()) => {
                if let Some(mut entry) = self.tasks.get_mut(&id) {
                    entry.sent += 1;
                }
            }
            Err(e) => {
                debug!(task_id = %id, recipient = %recipient, error = %e, "send failed");
                if let Some(mut entry) = self.tasks.get_mut(&id) {
                    entry.failed += 1;
                    entry.last_error = Some(e.to_string());
                }

                // Honour provider flood-waits, capped so one bad recipient
                // cannot stall the task indefinitely
                if let SendError::FloodWait { retry_after } = e {
                    let cap = Duration::from_secs(self.config.flood_wait_cap_secs);
                    tokio::time::sleep(retry_after.min(cap)).await;
                }
            }
        }
    }

    fn report(&self, id: TaskId) {
        if let Some(callback) = &self.progress_callback
            && let Some(snapshot) = self.progress(id)
        {
            callback(snapshot);
        }
    }
}

/// Choose a message variant uniformly at random.
fn pick_variant(variants: &[String]) -> String {
    use rand::Rng;

    if variants.len() == 1 {
        return variants[0].clone();
    }
    let idx = rand::rng().random_range(0..variants.len());
    variants[idx].clone()
}

/// Randomized inter-message sleep drawn from the task's interval bounds.
fn inter_message_sleep(min_secs: f64, max_secs: f64) -> Duration {
    use rand::Rng;

    let min = min_secs.max(0.0);
    let max = max_secs.max(min);
    if max <= 0.0 {
        return Duration::ZERO;
    }

    let secs = if (max - min).abs() < f64::EPSILON {
        min
    } else {
        rand::rng().random_range(min..=max)
    };
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_variant_single() {
        let variants = vec!["only".to_string()];
        assert_eq!(pick_variant(&variants), "only");
    }

    #[test]
    fn test_pick_variant_stays_in_set() {
        let variants = vec!["a".to_string(), "b".to_string()];
        for _ in 0..50 {
            let chosen = pick_variant(&variants);
            assert!(variants.contains(&chosen));
        }
    }

    #[test]
    fn test_inter_message_sleep_zero_bounds() {
        assert_eq!(inter_message_sleep(0.0, 0.0), Duration::ZERO);
    }

    #[test]
    fn test_inter_message_sleep_within_bounds() {
        for _ in 0..50 {
            let pause = inter_message_sleep(0.5, 1.5);
            assert!(pause >= Duration::from_secs_f64(0.5));
            assert!(pause <= Duration::from_secs_f64(1.5));
        }
    }

    #[test]
    fn test_inter_message_sleep_inverted_bounds() {
        // max below min falls back to min
        let pause = inter_message_sleep(2.0, 1.0);
        assert_eq!(pause, Duration::from_secs_f64(2.0));
    }
}
