//! Job records and registry configuration

use chrono::{DateTime, Utc};
use fanout_common::{JobId, JobStatus, UserId};
use serde::{Deserialize, Serialize};

/// Configuration for the job registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// How many jobs may run concurrently
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long finished jobs are retained before the sweep removes them
    /// (seconds)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How often the retention sweep runs (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

const fn default_max_concurrent() -> usize {
    5
}

const fn default_retention_secs() -> u64 {
    86400 // 24 hours
}

const fn default_sweep_interval_secs() -> u64 {
    3600 // hourly
}

/// State of one background job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub owner: Option<UserId>,
    pub status: JobStatus,
    /// Result reported by the unit of work on success
    pub result: Option<String>,
    /// Error captured from the unit of work on failure
    pub error: Option<String>,
    /// Progress 0–100, updated by explicit `update_progress` calls
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job record
    #[must_use]
    pub fn new(name: String, owner: Option<UserId>) -> Self {
        Self {
            id: JobId::generate(),
            name,
            owner,
            status: JobStatus::Pending,
            result: None,
            error: None,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Age of the job's completion, if it has finished.
    #[must_use]
    pub fn finished_age(&self, now: DateTime<Utc>) -> Option<chrono::TimeDelta> {
        self.completed_at.map(|done| now - done)
    }
}
