use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::jobs::{ImportJob, JobStats, JobStatus};

use super::error::Result;
use super::partitions::encode_status_key;
use super::pruning::{prune_expired, PruneStats};

/// Applied to every write unless configured otherwise (24h)
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Persisted per-job status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub stats: JobStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl StatusRecord {
    fn blank(job_id: &str, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            status,
            stats: JobStats::default(),
            error: None,
            user_id: None,
            file_name: None,
            updated_at: now,
            expires_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// TTL-bounded key-value store of job status records
#[derive(Clone)]
pub struct StatusStore {
    keyspace: Keyspace,
    statuses: PartitionHandle,
    ttl: Duration,
}

impl StatusStore {
    /// Open or create a status store at the given path
    pub fn open<P: AsRef<Path>>(path: P, ttl: Duration) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening status store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let statuses = keyspace.open_partition("statuses", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            statuses,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write the initial `queued` record for a freshly enqueued job
    pub fn create(&self, job: &ImportJob) -> Result<StatusRecord> {
        let mut record = StatusRecord::blank(&job.job_id, JobStatus::Queued);
        record.user_id = job.user_id.clone();
        record.file_name = Some(job.file_name.clone());
        self.write(record)
    }

    /// Set status and stats, keeping owner metadata from any existing record
    pub fn set_status(&self, job_id: &str, status: JobStatus, stats: &JobStats) -> Result<StatusRecord> {
        let mut record = self
            .get_status(job_id)?
            .unwrap_or_else(|| StatusRecord::blank(job_id, status));

        record.status = status;
        record.stats = stats.clone();
        if status != JobStatus::Error {
            record.error = None;
        }

        self.write(record)
    }

    /// Terminal failure with a reason and whatever stats were gathered
    pub fn set_error(&self, job_id: &str, message: &str, stats: &JobStats) -> Result<StatusRecord> {
        let mut record = self
            .get_status(job_id)?
            .unwrap_or_else(|| StatusRecord::blank(job_id, JobStatus::Error));

        record.status = JobStatus::Error;
        record.stats = stats.clone();
        record.error = Some(message.to_string());

        self.write(record)
    }

    /// Merge a throttled progress update into an existing record
    ///
    /// Returns `None` without writing when the job has no record.
    pub fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        processing_time: u64,
    ) -> Result<Option<StatusRecord>> {
        let Some(mut record) = self.get_status(job_id)? else {
            warn!(job_id, "Job not found in status store, skipping progress update");
            return Ok(None);
        };

        record.stats.progress = record.stats.progress.max(progress);
        record.stats.processing_time = processing_time;

        self.write(record).map(Some)
    }

    /// Read a record; expired or corrupt records read as absent and are removed
    pub fn get_status(&self, job_id: &str) -> Result<Option<StatusRecord>> {
        let key = encode_status_key(job_id);
        let Some(value) = self.statuses.get(&key)? else {
            return Ok(None);
        };

        match serde_json::from_slice::<StatusRecord>(&value) {
            Ok(record) if record.is_expired(Utc::now()) => {
                debug!(job_id, "Status record expired on read");
                self.statuses.remove(key)?;
                Ok(None)
            }
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(job_id, error = %e, "Corrupt status record, removing");
                self.statuses.remove(key)?;
                Ok(None)
            }
        }
    }

    pub fn remove(&self, job_id: &str) -> Result<()> {
        self.statuses.remove(encode_status_key(job_id))?;
        debug!(job_id, "Removed status record");
        Ok(())
    }

    /// Prune expired and corrupt records
    pub fn prune_expired(&self) -> Result<PruneStats> {
        info!("Starting status pruning");
        prune_expired(&self.keyspace, &self.statuses, Utc::now())
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the partition is readable
    pub fn health_check(&self) -> Result<()> {
        let _ = self.statuses.get(b"status:__health")?;
        Ok(())
    }

    fn write(&self, mut record: StatusRecord) -> Result<StatusRecord> {
        let now = Utc::now();
        record.updated_at = now;
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36500));
        record.expires_at = now + ttl;

        let value = serde_json::to_vec(&record)?;
        self.statuses.insert(encode_status_key(&record.job_id), value)?;
        debug!(job_id = %record.job_id, status = %record.status, "Status written");

        Ok(record)
    }

    #[cfg(test)]
    fn insert_raw(&self, job_id: &str, value: &[u8]) {
        self.statuses.insert(encode_status_key(job_id), value).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ImportOptions, JobRequest, PayloadRef};
    use tempfile::TempDir;

    fn create_test_store(ttl: Duration) -> (StatusStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = StatusStore::open(temp_dir.path().join("status"), ttl).unwrap();
        (store, temp_dir)
    }

    fn create_test_job(job_id: &str) -> ImportJob {
        ImportJob::from_request(
            job_id.to_string(),
            JobRequest {
                user_id: Some("u1".to_string()),
                file_name: "a.csv".to_string(),
                payload: PayloadRef::Inline { content: String::new() },
                options: ImportOptions::default(),
            },
        )
    }

    #[test]
    fn test_create_and_get() {
        let (store, _temp) = create_test_store(DEFAULT_STATUS_TTL);
        store.create(&create_test_job("job-1")).unwrap();

        let record = store.get_status("job-1").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.user_id.as_deref(), Some("u1"));
        assert_eq!(record.file_name.as_deref(), Some("a.csv"));
        assert!(record.expires_at > record.updated_at);
    }

    #[test]
    fn test_set_status_keeps_owner() {
        let (store, _temp) = create_test_store(DEFAULT_STATUS_TTL);
        store.create(&create_test_job("job-1")).unwrap();

        let mut stats = JobStats::default();
        stats.progress = 100;
        store.set_status("job-1", JobStatus::Done, &stats).unwrap();

        let record = store.get_status("job-1").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.stats.progress, 100);
        assert_eq!(record.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_set_error_then_processing_clears_reason() {
        let (store, _temp) = create_test_store(DEFAULT_STATUS_TTL);
        let stats = JobStats::default();

        store.set_error("job-1", "boom", &stats).unwrap();
        let record = store.get_status("job-1").unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some("boom"));

        store.set_status("job-1", JobStatus::Processing, &stats).unwrap();
        let record = store.get_status("job-1").unwrap().unwrap();
        assert!(record.error.is_none());
    }

    #[test]
    fn test_update_progress_requires_record() {
        let (store, _temp) = create_test_store(DEFAULT_STATUS_TTL);
        assert!(store.update_progress("missing", 10, 5).unwrap().is_none());
        assert!(store.get_status("missing").unwrap().is_none());

        store.create(&create_test_job("job-1")).unwrap();
        let record = store.update_progress("job-1", 40, 1200).unwrap().unwrap();
        assert_eq!(record.stats.progress, 40);
        assert_eq!(record.stats.processing_time, 1200);

        // stale update never lowers progress
        let record = store.update_progress("job-1", 20, 1300).unwrap().unwrap();
        assert_eq!(record.stats.progress, 40);
    }

    #[test]
    fn test_corrupt_record_reads_as_absent() {
        let (store, _temp) = create_test_store(DEFAULT_STATUS_TTL);
        store.insert_raw("job-bad", b"{not json");

        assert!(store.get_status("job-bad").unwrap().is_none());
        // the record was deleted, a second read hits nothing
        assert!(store.statuses.get(encode_status_key("job-bad")).unwrap().is_none());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let (store, _temp) = create_test_store(Duration::ZERO);
        store.create(&create_test_job("job-1")).unwrap();
        assert!(store.get_status("job-1").unwrap().is_none());
    }

    #[test]
    fn test_remove() {
        let (store, _temp) = create_test_store(DEFAULT_STATUS_TTL);
        store.create(&create_test_job("job-1")).unwrap();
        store.remove("job-1").unwrap();
        assert!(store.get_status("job-1").unwrap().is_none());
    }

    #[test]
    fn test_prune_expired() {
        let (store, _temp) = create_test_store(Duration::ZERO);
        store.create(&create_test_job("job-1")).unwrap();
        store.create(&create_test_job("job-2")).unwrap();
        store.insert_raw("job-bad", b"garbage");

        let stats = store.prune_expired().unwrap();
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.corrupt, 1);
        assert_eq!(stats.retained, 0);
    }
}
