//! The job registry and its execution/sweep machinery

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;
use fanout_common::{JobId, JobStatus, Signal, UserId, internal};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::job::{Job, JobConfig};

/// Callback invoked with the final job record once it reaches a terminal
/// state.
pub type OnComplete = Box<dyn FnOnce(Job) + Send + 'static>;

/// Tracks background jobs and bounds how many run concurrently.
///
/// `submit` registers the job immediately in `Pending` state; actual
/// execution waits on the semaphore and flips the job to `Running` only once
/// a slot is free. Errors from the unit of work are captured onto the record
/// and never propagate to the caller.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    config: JobConfig,
    jobs: Arc<DashMap<JobId, Job>>,
    tokens: Arc<DashMap<JobId, CancellationToken>>,
    semaphore: Arc<Semaphore>,
}

impl JobRegistry {
    /// Create a new registry with the given configuration
    #[must_use]
    pub fn new(config: JobConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            jobs: Arc::new(DashMap::new()),
            tokens: Arc::new(DashMap::new()),
            semaphore,
        }
    }

    /// Submit a unit of work. Returns the job id immediately.
    pub fn submit<F>(&self, name: impl Into<String>, owner: Option<UserId>, work: F) -> JobId
    where
        F: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.submit_with(name, owner, work, None)
    }

    /// Submit a unit of work with an optional completion callback.
    ///
    /// The callback runs on the job's own tokio task after the record has
    /// reached a terminal state, and receives a clone of the final record.
    pub fn submit_with<F>(
        &self,
        name: impl Into<String>,
        owner: Option<UserId>,
        work: F,
        on_complete: Option<OnComplete>,
    ) -> JobId
    where
        F: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let job = Job::new(name.into(), owner);
        let id = job.id;
        let token = CancellationToken::new();

        self.jobs.insert(id, job);
        self.tokens.insert(id, token.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            registry.run_one(id, token, work, on_complete).await;
        });

        debug!(job_id = %id, "background job submitted");
        id
    }

    async fn run_one<F>(
        &self,
        id: JobId,
        token: CancellationToken,
        work: F,
        on_complete: Option<OnComplete>,
    ) where
        F: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        // Admission control: wait for a slot, observing cancellation while
        // still queued. The permit is released on every exit path by drop.
        let _permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.finish(id, JobStatus::Failed, None, Some("registry shut down".to_string()));
                        self.finalize(id, on_complete);
                        return;
                    }
                }
            }
            () = token.cancelled() => {
                self.finish(id, JobStatus::Cancelled, None, None);
                self.finalize(id, on_complete);
                return;
            }
        };

        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.status = JobStatus::Running;
            entry.started_at = Some(Utc::now());
        }

        // Run the work on its own task so a panic inside it is contained
        // and surfaces here as a JoinError instead of killing this runner.
        let mut handle = tokio::spawn(work);

        tokio::select! {
            joined = &mut handle => {
                match joined {
                    Ok(Ok(result)) => {
                        self.finish(id, JobStatus::Completed, Some(result), None);
                    }
                    Ok(Err(e)) => {
                        warn!(job_id = %id, error = %e, "background job failed");
                        self.finish(id, JobStatus::Failed, None, Some(e.to_string()));
                    }
                    Err(e) => {
                        error!(job_id = %id, error = %e, "background job panicked");
                        self.finish(id, JobStatus::Failed, None, Some(format!("panic: {e}")));
                    }
                }
            }
            () = token.cancelled() => {
                handle.abort();
                self.finish(id, JobStatus::Cancelled, None, None);
            }
        }

        self.finalize(id, on_complete);
    }

    fn finish(&self, id: JobId, status: JobStatus, result: Option<String>, error: Option<String>) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.status = status;
            entry.result = result;
            entry.error = error;
            entry.completed_at = Some(Utc::now());
            if status == JobStatus::Completed {
                entry.progress = 100;
            }
        }
    }

    fn finalize(&self, id: JobId, on_complete: Option<OnComplete>) {
        self.tokens.remove(&id);
        if let Some(callback) = on_complete
            && let Some(job) = self.status(id)
        {
            callback(job);
        }
    }

    /// Get the current record for a job, if it is still retained.
    #[must_use]
    pub fn status(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).map(|entry| entry.value().clone())
    }

    /// Request cooperative cancellation of a job.
    ///
    /// Returns `true` if the job existed and had not already finished. The
    /// cancellation is observed at the job's next await point.
    pub fn cancel(&self, id: JobId) -> bool {
        let live = self
            .jobs
            .get(&id)
            .is_some_and(|entry| !entry.status.is_terminal());
        if !live {
            return false;
        }

        if let Some(token) = self.tokens.get(&id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Record explicit progress for a job, clamped to 0–100.
    pub fn update_progress(&self, id: JobId, progress: u8) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.progress = progress.min(100);
        }
    }

    /// Number of jobs currently retained (any status).
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove terminal jobs whose completion is older than `retention`.
    ///
    /// Returns how many records were removed.
    pub fn sweep(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let retention = chrono::TimeDelta::from_std(retention).unwrap_or(chrono::TimeDelta::MAX);

        let expired: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry.status.is_terminal()
                    && entry
                        .finished_age(now)
                        .is_some_and(|age| age > retention)
            })
            .map(|entry| entry.id)
            .collect();

        for id in &expired {
            self.jobs.remove(id);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "swept expired background jobs");
        }
        expired.len()
    }

    /// Run the periodic retention sweep until a shutdown signal arrives.
    pub async fn serve(&self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) {
        internal!("Job registry sweep starting");

        let mut timer =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        // Skip the first tick to avoid immediate execution
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.sweep(Duration::from_secs(self.config.retention_secs));
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!("Job registry sweep received shutdown signal");
                        }
                        Err(e) => {
                            error!("Job registry shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }
    }
}
