use crate::jobs::{ImportJob, JobStats, JobStatus};
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Status store error: {0}")]
    Status(#[from] crate::status::StatusError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Transport-level state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl QueueState {
    /// Entries that still expect (re)delivery
    pub fn is_pending(self) -> bool {
        matches!(self, QueueState::Waiting | QueueState::Active | QueueState::Delayed)
    }
}

/// Persisted queue record for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub job: ImportJob,
    pub state: QueueState,
    pub attempts_made: u32,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub finished_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub failed_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
}

impl QueueEntry {
    pub fn new(job: ImportJob) -> Self {
        Self {
            job,
            state: QueueState::Waiting,
            attempts_made: 0,
            progress: 0,
            finished_on: None,
            failed_reason: None,
            failed_on: None,
            stats: None,
        }
    }

    /// Mark the entry terminally failed at `now`
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) {
        self.state = QueueState::Failed;
        self.failed_reason = Some(reason.to_string());
        self.failed_on = Some(now);
    }

    /// Completed or failed entries settled at or before `cutoff`
    ///
    /// A failed entry without a timestamp predates `failed_on` and counts as stale.
    pub fn settled_before(&self, cutoff: DateTime<Utc>) -> bool {
        match self.state {
            QueueState::Completed => self.finished_on.is_some_and(|at| at <= cutoff),
            QueueState::Failed => self.failed_on.or(self.finished_on).is_none_or(|at| at <= cutoff),
            _ => false,
        }
    }

    /// Client-facing view; status is `done` once finished, `error` once a
    /// failure reason is set, `processing` otherwise
    pub fn view(&self) -> JobView {
        // Terminal markers first; anything still in the queue reads as processing
        let status = if self.finished_on.is_some() {
            JobStatus::Done
        } else if self.failed_reason.is_some() {
            JobStatus::Error
        } else {
            JobStatus::Processing
        };

        JobView {
            job_id: self.job.job_id.clone(),
            user_id: self.job.user_id.clone(),
            file_name: self.job.file_name.clone(),
            status,
            progress: self.progress,
            error: self.failed_reason.clone(),
            stats: self.stats.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    pub user_id: Option<String>,
    pub file_name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub stats: Option<JobStats>,
}

/// Selection for [`FjallQueue::list`]; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub states: Vec<QueueState>,
}

impl JobFilter {
    /// Waiting, active and delayed jobs of one user
    pub fn in_flight(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            states: vec![QueueState::Waiting, QueueState::Active, QueueState::Delayed],
        }
    }

    fn matches(&self, entry: &QueueEntry) -> bool {
        let user_ok = match &self.user_id {
            Some(user) => entry.job.user_id.as_deref() == Some(user.as_str()),
            None => true,
        };
        user_ok && (self.states.is_empty() || self.states.contains(&entry.state))
    }
}

/// FjallQueue persists queue entries in a Fjall embedded database
///
/// Architecture:
/// - `jobs` partition: job_id → QueueEntry (JSON)
///
/// Job ids are UUIDv7, so key order follows enqueue order.
/// Entries are persisted before being handed to workers via mpsc channels.
pub struct FjallQueue {
    keyspace: Keyspace,
    jobs: PartitionHandle,
}

impl FjallQueue {
    /// Open or create a new FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;

        info!(entries = jobs.len().unwrap_or(0), "FjallQueue opened");

        Ok(Self { keyspace, jobs })
    }

    pub fn insert(&self, entry: &QueueEntry) -> Result<()> {
        let value = serde_json::to_vec(entry)?;
        self.jobs.insert(entry.job.job_id.as_bytes(), value)?;
        debug!(job_id = %entry.job.job_id, state = ?entry.state, "Queue entry written");
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<QueueEntry>> {
        match self.jobs.get(job_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write of one entry; the closure's result is returned
    pub fn update<T>(&self, job_id: &str, f: impl FnOnce(&mut QueueEntry) -> T) -> Result<T> {
        let mut entry = self
            .get(job_id)?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        let out = f(&mut entry);
        self.insert(&entry)?;
        Ok(out)
    }

    pub fn remove(&self, job_id: &str) -> Result<()> {
        self.jobs.remove(job_id.as_bytes())?;
        debug!(job_id, "Queue entry removed");
        Ok(())
    }

    /// Entries matching the filter, in enqueue order; undecodable entries are skipped
    pub fn list(&self, filter: &JobFilter) -> Result<Vec<QueueEntry>> {
        let mut results = Vec::new();

        for item in self.jobs.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<QueueEntry>(&value) {
                Ok(entry) if filter.matches(&entry) => results.push(entry),
                Ok(_) => {}
                Err(e) => warn!(
                    job_id = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable queue entry"
                ),
            }
        }

        Ok(results)
    }

    /// Remove settled entries older than `cutoff`; returns what was removed
    pub fn prune_settled(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        let doomed: Vec<QueueEntry> = self
            .list(&JobFilter {
                user_id: None,
                states: vec![QueueState::Completed, QueueState::Failed],
            })?
            .into_iter()
            .filter(|entry| entry.settled_before(cutoff))
            .collect();

        for entry in &doomed {
            self.remove(&entry.job.job_id)?;
        }

        info!(removed = doomed.len(), "Settled queue entries pruned");
        Ok(doomed)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify database is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.jobs.get(b"__health")?;
        Ok(())
    }
}
