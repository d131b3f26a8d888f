use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stats::JobStats;

/// Lifecycle of an import job as seen by clients.
///
/// `queued -> processing -> {done | error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs handed to the ingestion adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Similarity threshold (0..=100) above which rows are treated as duplicates
    pub dedupe_threshold: u8,
    /// Rows per batch, always > 0
    pub batch_size: u32,
    /// Pause between batches in milliseconds
    #[serde(rename = "batchDelay")]
    pub batch_delay_ms: u64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dedupe_threshold: 60,
            batch_size: 20,
            batch_delay_ms: 200,
        }
    }
}

/// Where the encoded CSV bytes of a job live.
///
/// Both variants carry base64 text; the worker decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadRef {
    Inline { content: String },
    Stored { key: String },
}

impl PayloadRef {
    pub fn storage_key(&self) -> Option<&str> {
        match self {
            PayloadRef::Stored { key } => Some(key),
            PayloadRef::Inline { .. } => None,
        }
    }
}

/// Everything the producer knows before the queue assigns an id.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub user_id: Option<String>,
    pub file_name: String,
    pub payload: PayloadRef,
    pub options: ImportOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub job_id: String,
    /// Owning user. A job without one is failed before any processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub file_name: String,
    pub payload: PayloadRef,
    pub options: ImportOptions,
    pub status: JobStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub start_time: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn from_request(job_id: String, request: JobRequest) -> Self {
        Self {
            job_id,
            user_id: request.user_id,
            file_name: request.file_name,
            payload: request.payload,
            options: request.options,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            start_time: None,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Message published on the progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub channel: String,
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub stats: JobStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(channel: &str, job: &ImportJob, user_id: &str, status: JobStatus, stats: &JobStats) -> Self {
        Self {
            channel: channel.to_string(),
            job_id: job.job_id.clone(),
            user_id: user_id.to_string(),
            status,
            progress: stats.progress,
            stats: stats.clone(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_wire_names() {
        let options: ImportOptions =
            serde_json::from_str(r#"{"dedupeThreshold":80,"batchSize":5,"batchDelay":0}"#).unwrap();
        assert_eq!(options.dedupe_threshold, 80);
        assert_eq!(options.batch_size, 5);
        assert_eq!(options.batch_delay_ms, 0);
    }

    #[test]
    fn test_payload_ref_tagging() {
        let stored = PayloadRef::Stored { key: "uploads/u1/a.csv.b64".to_string() };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["kind"], "stored");
        assert_eq!(stored.storage_key(), Some("uploads/u1/a.csv.b64"));

        let inline = PayloadRef::Inline { content: "YQ==".to_string() };
        assert_eq!(inline.storage_key(), None);
    }

    #[test]
    fn test_owner_ignores_empty_user() {
        let mut job = ImportJob::from_request(
            "job-1".to_string(),
            JobRequest {
                user_id: Some(String::new()),
                file_name: "a.csv".to_string(),
                payload: PayloadRef::Inline { content: String::new() },
                options: ImportOptions::default(),
            },
        );
        assert_eq!(job.owner(), None);

        job.user_id = Some("u1".to_string());
        assert_eq!(job.owner(), Some("u1"));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_status_terminal() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }
}
