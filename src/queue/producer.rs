use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::jobs::{ImportOptions, JobRequest, JobStatus, PayloadRef};
use crate::observability::Metrics;
use crate::queue::broker::JobQueue;
use crate::queue::store::{JobFilter, QueueError};
use crate::status::StatusStore;
use crate::storage::{encode_payload, upload_key, StorageClient, StorageError};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("payload storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A validated upload ready to become a job
#[derive(Debug, Clone)]
pub struct ImportUpload {
    pub user_id: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub options: ImportOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Enqueued { job_id: String, file_name: String },
    /// An in-flight job for the same user and file already exists
    Existing {
        job_id: String,
        file_name: String,
        status: JobStatus,
    },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            SubmitOutcome::Enqueued { job_id, .. } | SubmitOutcome::Existing { job_id, .. } => job_id,
        }
    }
}

/// Producer side of the pipeline: dedup guard, payload placement, enqueue
#[derive(Clone)]
pub struct ImportProducer {
    queue: Arc<JobQueue>,
    status: StatusStore,
    storage: StorageClient,
    inline_limit: usize,
    metrics: Arc<Metrics>,
}

impl ImportProducer {
    pub fn new(
        queue: Arc<JobQueue>,
        status: StatusStore,
        storage: StorageClient,
        inline_limit: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            status,
            storage,
            inline_limit,
            metrics,
        }
    }

    /// Submit an upload
    ///
    /// ## Flow:
    /// 1. List the user's in-flight jobs; a job with the same file name wins
    /// 2. Base64-encode the content (wire encoding)
    /// 3. Inline small payloads, upload larger ones to the object store
    /// 4. Enqueue, writing the `queued` status record before any worker sees the job
    ///
    /// The duplicate check is best-effort: two concurrent submissions can
    /// both pass it. Reprocessing is idempotent, so that race is tolerated.
    pub async fn submit(&self, upload: ImportUpload) -> Result<SubmitOutcome, SubmitError> {
        let in_flight = self.queue.list_jobs(&JobFilter::in_flight(&upload.user_id)).await?;

        if let Some(existing) = in_flight.into_iter().find(|job| job.file_name == upload.file_name) {
            info!(
                job_id = %existing.job_id,
                user_id = %upload.user_id,
                file_name = %upload.file_name,
                "Import already in progress, returning existing job"
            );
            self.metrics.duplicate_submission();
            return Ok(SubmitOutcome::Existing {
                job_id: existing.job_id,
                file_name: existing.file_name,
                status: existing.status,
            });
        }

        let encoded = encode_payload(&upload.content);
        let payload = if encoded.len() <= self.inline_limit {
            PayloadRef::Inline { content: encoded }
        } else {
            let key = upload_key(&upload.user_id, &uuid::Uuid::new_v4().to_string());
            self.storage.upload(&key, encoded.into_bytes()).await?;
            PayloadRef::Stored { key }
        };

        let request = JobRequest {
            user_id: Some(upload.user_id.clone()),
            file_name: upload.file_name.clone(),
            payload: payload.clone(),
            options: upload.options,
        };

        let status = self.status.clone();
        let enqueued = self
            .queue
            .enqueue_with(request, move |job| {
                status.create(job)?;
                Ok(())
            })
            .await;

        let job_id = match enqueued {
            Ok(job_id) => job_id,
            Err(e) => {
                self.release_upload(&payload).await;
                return Err(e.into());
            }
        };

        self.metrics.job_enqueued();
        debug!(job_id, user_id = %upload.user_id, inline = payload.storage_key().is_none(), "Import enqueued");

        Ok(SubmitOutcome::Enqueued {
            job_id,
            file_name: upload.file_name,
        })
    }

    /// Delete the stored copy of a payload that never made it into the queue
    async fn release_upload(&self, payload: &PayloadRef) {
        let Some(key) = payload.storage_key() else {
            return;
        };
        if let Err(e) = self.storage.delete(key).await {
            warn!(key, error = %e, "Failed to delete orphaned upload");
        }
    }
}
