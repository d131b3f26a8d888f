use crate::jobs::{ImportJob, JobRequest, JobStats};
use crate::queue::retry::RetryPolicy;
use crate::queue::store::{FjallQueue, JobFilter, JobView, QueueEntry, QueueError, QueueState, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

pub const EXHAUSTED_REASON: &str = "retry budget exhausted";

/// Notification that a job is ready to be claimed
#[derive(Clone, Debug)]
pub struct Dispatch {
    pub job_id: String,
}

/// A claimed job, owned by exactly one worker until settled
#[derive(Clone, Debug)]
pub struct Delivery {
    pub job: ImportJob,
    /// 1-based attempt number
    pub attempt: u32,
    /// No further attempt follows if this one fails
    pub final_attempt: bool,
}

/// Result of settling a failed delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Settlement {
    Retry { delay: Duration },
    Failed,
}

/// Outcome of [`JobQueue::recover`]
#[derive(Debug, Default)]
pub struct Recovery {
    pub redelivered: usize,
    /// Jobs whose budget was already spent; now marked failed
    pub exhausted: Vec<ImportJob>,
}

/// JobQueue distributes import jobs from the producer to the worker pool
///
/// Architecture:
/// 1. Producer calls `queue.enqueue(request)`
/// 2. The entry is persisted to FjallQueue under a fresh UUIDv7 job id
/// 3. A `Dispatch{job_id}` goes to a worker over an mpsc channel (round-robin)
/// 4. The worker `claim`s the entry, which moves it to `active` and counts the attempt
/// 5. Failures are settled against the `RetryPolicy`: redelivery after backoff
///    or a terminal `failed` state
///
/// Delivery is at-least-once. Claiming only succeeds for `waiting`/`delayed`
/// entries, so a duplicate dispatch never gives one job to two workers.
pub struct JobQueue {
    store: Arc<RwLock<FjallQueue>>,
    policy: RetryPolicy,
    worker_channels: Vec<mpsc::Sender<Dispatch>>,
    next_worker: AtomicUsize,
}

impl JobQueue {
    /// Create a new JobQueue with worker channels
    ///
    /// Returns the queue and one receiver per worker.
    pub fn new(
        store: Arc<RwLock<FjallQueue>>,
        policy: RetryPolicy,
        num_workers: usize,
        channel_size: usize,
    ) -> (Self, Vec<mpsc::Receiver<Dispatch>>) {
        info!(num_workers, channel_size, ?policy, "Creating JobQueue with worker channels");

        let mut worker_channels = Vec::with_capacity(num_workers);
        let mut worker_receivers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(channel_size);
            worker_channels.push(tx);
            worker_receivers.push(rx);
            debug!(worker_id, "Created worker channel");
        }

        let queue = Self {
            store,
            policy,
            worker_channels,
            next_worker: AtomicUsize::new(0),
        };

        (queue, worker_receivers)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist a job and hand it to a worker; returns the new job id
    pub async fn enqueue(&self, request: JobRequest) -> Result<String> {
        self.enqueue_with(request, |_| Ok(())).await
    }

    /// Like [`enqueue`](Self::enqueue), running `before_dispatch` once the entry
    /// is durable but before any worker can see it
    ///
    /// If the hook fails the entry is removed and the error returned.
    pub async fn enqueue_with<F>(&self, request: JobRequest, before_dispatch: F) -> Result<String>
    where
        F: FnOnce(&ImportJob) -> Result<()>,
    {
        let job_id = uuid::Uuid::now_v7().to_string();
        let job = ImportJob::from_request(job_id.clone(), request);

        {
            let store = self.store.write().await;
            store.insert(&QueueEntry::new(job.clone()))?;

            if let Err(e) = before_dispatch(&job) {
                warn!(job_id, error = %e, "Enqueue hook failed, discarding entry");
                store.remove(&job_id)?;
                return Err(e);
            }
        }

        debug!(
            job_id,
            user_id = ?job.user_id,
            file_name = %job.file_name,
            "Job persisted to queue"
        );

        self.dispatch(&job_id).await;
        Ok(job_id)
    }

    /// Round-robin a dispatch notice to the next worker
    ///
    /// A closed channel is logged only; the entry stays durable and is
    /// picked up by `recover()` on the next start.
    async fn dispatch(&self, job_id: &str) {
        if self.worker_channels.is_empty() {
            warn!(job_id, "No workers configured, job left waiting");
            return;
        }

        let worker_idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();
        let notice = Dispatch {
            job_id: job_id.to_string(),
        };

        match self.worker_channels[worker_idx].send(notice).await {
            Ok(_) => debug!(job_id, worker_idx, "Job sent to worker"),
            Err(_) => warn!(job_id, worker_idx, "Worker channel closed, job not delivered"),
        }
    }

    /// Take ownership of a dispatched job
    ///
    /// Returns `None` when the entry is gone or not claimable (already active,
    /// completed or failed).
    pub async fn claim(&self, job_id: &str) -> Result<Option<Delivery>> {
        let store = self.store.write().await;
        let Some(mut entry) = store.get(job_id)? else {
            debug!(job_id, "Dispatched job no longer queued");
            return Ok(None);
        };

        if !matches!(entry.state, QueueState::Waiting | QueueState::Delayed) {
            debug!(job_id, state = ?entry.state, "Job not claimable");
            return Ok(None);
        }

        entry.state = QueueState::Active;
        entry.attempts_made += 1;
        store.insert(&entry)?;

        let attempt = entry.attempts_made;
        Ok(Some(Delivery {
            job: entry.job,
            attempt,
            final_attempt: self.policy.is_final(attempt),
        }))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobView>> {
        let store = self.store.read().await;
        Ok(store.get(job_id)?.map(|entry| entry.view()))
    }

    pub async fn get_entry(&self, job_id: &str) -> Result<Option<QueueEntry>> {
        self.store.read().await.get(job_id)
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobView>> {
        let store = self.store.read().await;
        Ok(store.list(filter)?.iter().map(QueueEntry::view).collect())
    }

    /// Mirror worker progress into the entry
    pub async fn update_progress(&self, job_id: &str, progress: u8) -> Result<()> {
        let store = self.store.write().await;
        store.update(job_id, |entry| entry.progress = entry.progress.max(progress))
    }

    /// Mark a job finished with its final stats
    pub async fn complete(&self, job_id: &str, stats: &JobStats) -> Result<()> {
        let store = self.store.write().await;
        store.update(job_id, |entry| {
            entry.state = QueueState::Completed;
            entry.progress = 100;
            entry.finished_on = Some(Utc::now());
            entry.stats = Some(stats.clone());
        })
    }

    pub async fn remove(&self, job_id: &str) -> Result<()> {
        self.store.write().await.remove(job_id)
    }

    /// Apply the retry policy to a failed delivery
    ///
    /// Non-final attempts are parked as `delayed` and redispatched after the
    /// backoff; the final one leaves the entry `failed` with the reason.
    pub async fn settle_failure(
        self: &Arc<Self>,
        delivery: &Delivery,
        reason: &str,
        stats: &JobStats,
    ) -> Result<Settlement> {
        let job_id = delivery.job.job_id.clone();

        let settlement = match self.policy.next_delay(delivery.attempt) {
            Some(delay) => Settlement::Retry { delay },
            None => Settlement::Failed,
        };

        {
            let store = self.store.write().await;
            store.update(&job_id, |entry| match settlement {
                Settlement::Retry { .. } => {
                    entry.state = QueueState::Delayed;
                }
                Settlement::Failed => {
                    entry.fail(reason, Utc::now());
                    entry.stats = Some(stats.clone());
                }
            })?;
        }

        match settlement {
            Settlement::Retry { delay } => {
                info!(
                    job_id,
                    attempt = delivery.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                let queue = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.dispatch(&job_id).await;
                });
            }
            Settlement::Failed => {
                warn!(job_id, attempts = delivery.attempt, reason, "Job failed permanently");
            }
        }

        Ok(settlement)
    }

    /// Return an interrupted job to `waiting` without counting the attempt
    ///
    /// Only `active` entries are touched; returns `false` when the delivery
    /// had already settled (entry gone, completed, failed or rescheduled).
    pub async fn requeue_interrupted(&self, job_id: &str) -> Result<bool> {
        let store = self.store.write().await;
        let Some(mut entry) = store.get(job_id)? else {
            debug!(job_id, "Interrupted job already left the queue");
            return Ok(false);
        };

        if entry.state != QueueState::Active {
            debug!(job_id, state = ?entry.state, "Interrupted job already settled");
            return Ok(false);
        }

        entry.state = QueueState::Waiting;
        entry.attempts_made = entry.attempts_made.saturating_sub(1);
        store.insert(&entry)?;
        info!(job_id, "Interrupted job returned to queue");
        Ok(true)
    }

    /// Redeliver every pending entry left over from a previous run
    pub async fn recover(&self) -> Result<Recovery> {
        let pending = {
            let store = self.store.read().await;
            store.list(&JobFilter {
                user_id: None,
                states: vec![QueueState::Waiting, QueueState::Active, QueueState::Delayed],
            })?
        };

        let mut recovery = Recovery::default();
        let mut ready = Vec::new();

        {
            let store = self.store.write().await;
            for mut entry in pending {
                if entry.attempts_made >= self.policy.max_attempts {
                    entry.fail(EXHAUSTED_REASON, Utc::now());
                    store.insert(&entry)?;
                    warn!(job_id = %entry.job.job_id, attempts = entry.attempts_made, "Retry budget exhausted");
                    recovery.exhausted.push(entry.job);
                } else {
                    entry.state = QueueState::Waiting;
                    store.insert(&entry)?;
                    ready.push(entry.job.job_id);
                }
            }
        }

        for job_id in &ready {
            self.dispatch(job_id).await;
        }
        recovery.redelivered = ready.len();

        info!(
            redelivered = recovery.redelivered,
            exhausted = recovery.exhausted.len(),
            "Queue recovery complete"
        );
        Ok(recovery)
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.read().await.flush()
    }

    /// Get number of workers
    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    /// Storage readable and all worker channels open
    pub async fn health_check(&self) -> Result<bool> {
        self.store.read().await.health_check()?;
        Ok(self.worker_channels.iter().all(|ch| !ch.is_closed()))
    }
}
