//! Wire types of the import HTTP surface
//!
//! - `POST /import` accepts a raw CSV body and answers with [`ImportAccepted`]
//! - `GET /import/active` lists the caller's in-flight jobs as [`ActiveImports`]
//! - `GET /import/{jobId}` returns a [`JobStatusResponse`]
//!
//! Field names are camelCase to match the progress events pushed over the
//! WebSocket gateway.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::jobs::{JobStats, JobStatus};
use crate::observability::MetricsSnapshot;
use crate::queue::JobView;
use crate::status::StatusRecord;

/// Raw `POST /import` query; parsed and bounded by `validation`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportQuery {
    pub deduplicate_threshold: Option<String>,
    pub batch_size: Option<String>,
    pub batch_delay: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportAccepted {
    pub success: bool,
    pub job_id: String,
    pub file_name: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub file_name: Option<String>,
    pub progress: u8,
    pub error: Option<String>,
    pub stats: JobStats,
}

impl From<JobView> for JobStatusResponse {
    fn from(view: JobView) -> Self {
        Self {
            job_id: view.job_id,
            status: view.status,
            file_name: Some(view.file_name),
            progress: view.progress,
            error: view.error,
            stats: view.stats.unwrap_or_default(),
        }
    }
}

impl From<StatusRecord> for JobStatusResponse {
    fn from(record: StatusRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status,
            file_name: record.file_name,
            progress: record.stats.progress,
            error: record.error,
            stats: record.stats,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActiveImports {
    pub jobs: Vec<ActiveImport>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveImport {
    pub job_id: String,
    pub user_id: Option<String>,
    pub file_name: String,
    pub status: JobStatus,
    pub progress: u8,
}

impl From<JobView> for ActiveImport {
    fn from(view: JobView) -> Self {
        Self {
            job_id: view.job_id,
            user_id: view.user_id,
            file_name: view.file_name,
            status: view.status,
            progress: view.progress,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
}
