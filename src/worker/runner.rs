//! Worker pool - one tokio task per dispatch channel

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::processor::ImportProcessor;
use crate::queue::Dispatch;

/// Running workers plus the token that stops them
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl WorkerPool {
    /// Spawn one worker per receiver
    pub fn spawn(
        processor: Arc<ImportProcessor>,
        receivers: Vec<mpsc::Receiver<Dispatch>>,
        token: CancellationToken,
    ) -> Self {
        let handles = receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, rx)| {
                let processor = Arc::clone(&processor);
                let token = token.clone();
                tokio::spawn(run_worker(worker_id, processor, rx, token))
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Worker pool started");
        Self { handles, token }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every worker and wait for them to exit
    ///
    /// Jobs in flight are interrupted and returned to the queue.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    processor: Arc<ImportProcessor>,
    mut rx: mpsc::Receiver<Dispatch>,
    token: CancellationToken,
) {
    debug!(worker_id, "Worker started");

    loop {
        let notice = tokio::select! {
            _ = token.cancelled() => break,
            notice = rx.recv() => match notice {
                Some(notice) => notice,
                None => break,
            },
        };

        let delivery = match processor.queue().claim(&notice.job_id).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, job_id = %notice.job_id, error = %e, "Failed to claim job");
                continue;
            }
        };

        tokio::select! {
            outcome = processor.process(&delivery) => {
                debug!(worker_id, job_id = %delivery.job.job_id, ?outcome, "Delivery settled");
            }
            _ = token.cancelled() => {
                processor.interrupt(&delivery).await;
                break;
            }
        }
    }

    debug!(worker_id, "Worker stopped");
}
