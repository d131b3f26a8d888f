//! Import processor - runs one delivered job to done or error

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ingest::{IngestError, IngestRequest, IngestionAdapter};
use crate::jobs::{ImportJob, JobStats, JobStatus, ProgressEvent, RecordAction};
use crate::messaging::ProgressPublisher;
use crate::observability::Metrics;
use crate::queue::{Delivery, JobQueue, QueueError, Settlement, EXHAUSTED_REASON};
use crate::status::{StatusError, StatusStore};
use crate::storage::{decode_payload, ContentSource, StorageError};

const MISSING_USER: &str = "Missing userId in job";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Missing userId in job")]
    MissingUser,

    #[error("Failed to decode CSV content: Decoded CSV content is empty")]
    EmptyPayload,

    #[error("Failed to decode CSV content: {0}")]
    Decode(String),

    #[error("Failed to fetch CSV content: {0}")]
    Fetch(#[source] StorageError),

    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("Status store error: {0}")]
    Status(#[from] StatusError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WorkerError {
    /// Fatal errors end the job immediately; everything else goes through
    /// the queue's retry policy
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::MissingUser | WorkerError::EmptyPayload | WorkerError::Decode(_)
        )
    }
}

/// How a delivery ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done(JobStats),
    /// Fatal failure; removed from the queue without retry
    Rejected(String),
    /// Retryable failure with budget left; the queue redelivers later
    Retrying(String),
    /// Retryable failure on the final attempt
    Failed(String),
}

/// Drives one job: payload decode, adapter stream, stats, status, progress
pub struct ImportProcessor {
    queue: Arc<JobQueue>,
    status: StatusStore,
    source: Arc<dyn ContentSource>,
    adapter: Arc<dyn IngestionAdapter>,
    publisher: ProgressPublisher,
    metrics: Arc<Metrics>,
    progress_every: u64,
}

impl ImportProcessor {
    pub fn new(
        queue: Arc<JobQueue>,
        status: StatusStore,
        source: Arc<dyn ContentSource>,
        adapter: Arc<dyn IngestionAdapter>,
        publisher: ProgressPublisher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            status,
            source,
            adapter,
            publisher,
            metrics,
            progress_every: 100,
        }
    }

    /// Records between throttled progress updates
    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Process a claimed delivery
    ///
    /// Stats start from zero on every attempt, so a redelivered job is
    /// counted afresh rather than accumulated.
    pub async fn process(&self, delivery: &Delivery) -> JobOutcome {
        let job = &delivery.job;

        let Some(user_id) = job.owner() else {
            return self.reject_unowned(job).await;
        };

        info!(
            job_id = %job.job_id,
            user_id,
            file_name = %job.file_name,
            attempt = delivery.attempt,
            "Starting import job"
        );

        let started = Instant::now();
        let mut stats = JobStats::default();

        match self.run(job, user_id, started, &mut stats).await {
            Ok(()) => JobOutcome::Done(stats),
            Err(err) if err.is_fatal() => self.reject(job, user_id, &err, stats, started).await,
            Err(err) => self.fail(delivery, user_id, &err, stats, started).await,
        }
    }

    async fn run(
        &self,
        job: &ImportJob,
        user_id: &str,
        started: Instant,
        stats: &mut JobStats,
    ) -> Result<(), WorkerError> {
        self.status.set_status(&job.job_id, JobStatus::Processing, stats)?;

        let raw = self.source.fetch(job).await.map_err(WorkerError::Fetch)?;
        let content = decode(&raw)?;

        if !content.contains(',') || !content.contains('\n') {
            warn!(job_id = %job.job_id, "Decoded content doesn't appear to be a valid CSV format");
        }
        debug!(job_id = %job.job_id, length = content.len(), "Decoded CSV content");

        // lines minus the header
        let estimate = content.split('\n').count().saturating_sub(1) as u64;

        let mut outcomes = self.adapter.ingest(IngestRequest {
            content,
            user_id: user_id.to_string(),
            file_name: job.file_name.clone(),
            options: job.options,
        });

        let mut processed = 0u64;
        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;
            processed += 1;

            match outcome.action.parse::<RecordAction>() {
                Ok(action) => stats.record(action),
                Err(e) => {
                    warn!(job_id = %job.job_id, row = outcome.row, error = %e, "Unexpected action key from adapter");
                    stats.record(RecordAction::Invalid);
                }
            }

            if processed % self.progress_every == 0 && estimate > 0 {
                stats.advance_progress(processed, estimate);
                stats.processing_time = elapsed_ms(started);
                self.report_progress(job, user_id, stats).await?;
            }
        }

        stats.progress = 100;
        stats.processing_time = elapsed_ms(started);

        self.status.set_status(&job.job_id, JobStatus::Done, stats)?;
        match self.queue.complete(&job.job_id, stats).await {
            // a duplicate delivery already finished and removed the entry
            Ok(()) | Err(QueueError::JobNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.queue.remove(&job.job_id).await?;
        self.release_payload(job).await;

        info!(
            job_id = %job.job_id,
            total = stats.total,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            merged = stats.merged,
            invalid = stats.invalid,
            processing_time_ms = stats.processing_time,
            "Import job completed"
        );

        self.metrics.job_completed();
        self.publish(job, user_id, JobStatus::Done, stats, None).await;
        Ok(())
    }

    async fn report_progress(&self, job: &ImportJob, user_id: &str, stats: &JobStats) -> Result<(), WorkerError> {
        self.status
            .update_progress(&job.job_id, stats.progress, stats.processing_time)?;

        if let Err(e) = self.queue.update_progress(&job.job_id, stats.progress).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to mirror progress into queue");
        }

        self.publish(job, user_id, JobStatus::Processing, stats, None).await;
        Ok(())
    }

    async fn reject_unowned(&self, job: &ImportJob) -> JobOutcome {
        error!(job_id = %job.job_id, "Job has no userId, cannot process");

        let mut stats = JobStats::default();
        stats.push_error(MISSING_USER);

        if let Err(e) = self.status.set_error(&job.job_id, MISSING_USER, &stats) {
            error!(job_id = %job.job_id, error = %e, "Failed to mark job as error");
        }
        self.drop_from_queue(job).await;
        self.release_payload(job).await;
        self.metrics.job_failed();

        JobOutcome::Rejected(WorkerError::MissingUser.to_string())
    }

    async fn reject(
        &self,
        job: &ImportJob,
        user_id: &str,
        err: &WorkerError,
        mut stats: JobStats,
        started: Instant,
    ) -> JobOutcome {
        let message = err.to_string();
        error!(job_id = %job.job_id, error = %message, "Import job rejected");

        stats.push_error(message.clone());
        stats.processing_time = elapsed_ms(started);

        if let Err(e) = self.status.set_error(&job.job_id, &message, &stats) {
            error!(job_id = %job.job_id, error = %e, "Failed to mark job as error");
        }
        self.drop_from_queue(job).await;
        self.release_payload(job).await;
        self.metrics.job_failed();
        self.publish(job, user_id, JobStatus::Error, &stats, Some(&message)).await;

        JobOutcome::Rejected(message)
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        user_id: &str,
        err: &WorkerError,
        mut stats: JobStats,
        started: Instant,
    ) -> JobOutcome {
        let job = &delivery.job;
        let message = err.to_string();
        error!(job_id = %job.job_id, attempt = delivery.attempt, error = %message, "Import job failed");

        stats.push_error(message.clone());
        stats.processing_time = elapsed_ms(started);

        let written = if delivery.final_attempt {
            self.status.set_error(&job.job_id, &message, &stats)
        } else {
            self.status.set_status(&job.job_id, JobStatus::Queued, &stats)
        };
        if let Err(e) = written {
            error!(job_id = %job.job_id, error = %e, "Failed to record job failure");
        }

        match self.queue.settle_failure(delivery, &message, &stats).await {
            Ok(Settlement::Retry { .. }) => {
                self.metrics.retry_scheduled();
                JobOutcome::Retrying(message)
            }
            Ok(Settlement::Failed) => {
                self.release_payload(job).await;
                self.metrics.job_failed();
                self.publish(job, user_id, JobStatus::Error, &stats, Some(&message)).await;
                JobOutcome::Failed(message)
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "Failed to settle job failure");
                JobOutcome::Failed(message)
            }
        }
    }

    /// Finish a job whose retry budget ran out before it could be redelivered
    ///
    /// Same terminal path as a failed final attempt: error status, payload
    /// released, owner notified.
    pub async fn settle_exhausted(&self, job: &ImportJob) {
        warn!(job_id = %job.job_id, "Import job exhausted its retry budget");

        let mut stats = JobStats::default();
        stats.push_error(EXHAUSTED_REASON);

        if let Err(e) = self.status.set_error(&job.job_id, EXHAUSTED_REASON, &stats) {
            error!(job_id = %job.job_id, error = %e, "Failed to mark exhausted job");
        }
        self.release_payload(job).await;
        self.metrics.job_failed();

        if let Some(user_id) = job.owner() {
            self.publish(job, user_id, JobStatus::Error, &stats, Some(EXHAUSTED_REASON)).await;
        }
    }

    /// Return an interrupted delivery to the queue as if it never started
    ///
    /// A delivery that already settled keeps its terminal status.
    pub async fn interrupt(&self, delivery: &Delivery) {
        let job_id = &delivery.job.job_id;

        match self.queue.requeue_interrupted(job_id).await {
            Ok(true) => {
                warn!(job_id = %job_id, "Import job interrupted");
                if let Err(e) = self.status.set_status(job_id, JobStatus::Queued, &JobStats::default()) {
                    error!(job_id = %job_id, error = %e, "Failed to reset interrupted job status");
                }
            }
            Ok(false) => debug!(job_id = %job_id, "Interrupted after settling, nothing to requeue"),
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to requeue interrupted job"),
        }
    }

    async fn release_payload(&self, job: &ImportJob) {
        if let Err(e) = self.source.discard(job).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to discard stored payload");
        }
    }

    async fn drop_from_queue(&self, job: &ImportJob) {
        if let Err(e) = self.queue.remove(&job.job_id).await {
            error!(job_id = %job.job_id, error = %e, "Failed to remove job from queue");
        }
    }

    async fn publish(
        &self,
        job: &ImportJob,
        user_id: &str,
        status: JobStatus,
        stats: &JobStats,
        error: Option<&str>,
    ) {
        let mut event = ProgressEvent::new(self.publisher.channel(), job, user_id, status, stats);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.publisher.publish(&event).await;
    }
}

fn decode(raw: &[u8]) -> Result<String, WorkerError> {
    let content = decode_payload(raw).map_err(|e| match e {
        StorageError::Empty => WorkerError::EmptyPayload,
        other => WorkerError::Decode(other.to_string()),
    })?;

    if content.trim().is_empty() {
        return Err(WorkerError::EmptyPayload);
    }
    Ok(content)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
