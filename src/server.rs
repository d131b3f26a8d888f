//! Process bootstrap: wires every component and runs until a shutdown signal
//!
//! Startup order matters: the worker pool is spawned before queue recovery
//! so redelivered jobs never fill a dispatch channel nobody drains, and the
//! gateway subscribes before HTTP starts accepting uploads.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::auth::{AuthError, Authenticator, IdentityProvider, JwtProvider, RemoteProvider, StaticDirectory};
use crate::config::{AuthProvider, Config, ConfigError, StorageProvider, ValidationError};
use crate::gateway::{Gateway, GatewayError, InMemoryRegistry};
use crate::ingest::CsvIngestionAdapter;
use crate::messaging::{LocalBus, ProgressBus, ProgressPublisher};
use crate::observability::Metrics;
use crate::queue::{Backoff, FjallQueue, ImportProducer, JobQueue, QueueError, RetryPolicy};
use crate::status::{PruneStats, StatusError, StatusStore};
use crate::storage::{ContentSource, PayloadSource, StorageClient, StorageError};
use crate::worker::{ImportProcessor, WorkerPool};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open status store: {0}")]
    Status(#[from] StatusError),

    #[error("Failed to open queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to initialise storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to initialise auth: {0}")]
    Auth(#[from] AuthError),

    #[error("Failed to start gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Every long-lived component of a running process
pub struct Services {
    pub state: AppState,
    pool: WorkerPool,
}

impl Services {
    /// Open stores, spawn workers, recover the queue and start the gateway
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());

        info!(path = %config.server.status_path().display(), "Opening status store");
        let status = StatusStore::open(config.server.status_path(), config.status.ttl())?;

        info!(path = %config.server.queue_path().display(), "Opening FjallQueue");
        let store = Arc::new(RwLock::new(FjallQueue::open(config.server.queue_path())?));
        let policy = RetryPolicy {
            max_attempts: config.queue.max_attempts,
            backoff: Backoff::Exponential {
                base: config.queue.backoff_delay(),
                multiplier: f64::from(config.queue.backoff_multiplier),
            },
        };
        let (queue, receivers) =
            JobQueue::new(store, policy, config.queue.workers, config.queue.channel_size);
        let queue = Arc::new(queue);

        let storage = build_storage(&config)?;

        let bus: Arc<dyn ProgressBus> = Arc::new(LocalBus::new(config.progress.capacity));
        let publisher = ProgressPublisher::new(bus.clone(), config.progress.channel.clone(), metrics.clone());

        let processor = Arc::new(ImportProcessor::new(
            queue.clone(),
            status.clone(),
            Arc::new(PayloadSource::new(storage.clone())),
            Arc::new(CsvIngestionAdapter::new()),
            publisher,
            metrics.clone(),
        )
        .with_progress_every(config.status.progress_every));

        let authenticator = build_authenticator(&config)?;
        let gateway = Arc::new(Gateway::new(
            authenticator.clone(),
            Arc::new(InMemoryRegistry::new()),
            bus,
            metrics.clone(),
            config.progress.channel.clone(),
        ));
        gateway.start().await?;

        let pool = WorkerPool::spawn(processor.clone(), receivers, CancellationToken::new());

        let recovery = queue.recover().await?;
        for job in &recovery.exhausted {
            processor.settle_exhausted(job).await;
        }

        let producer = ImportProducer::new(
            queue.clone(),
            status.clone(),
            storage.clone(),
            config.server.inline_payload_bytes.as_usize(),
            metrics.clone(),
        );

        let state = AppState::new(config, producer, queue, status, storage, authenticator, gateway, metrics);
        Ok(Self { state, pool })
    }

    /// Serve HTTP and WebSocket traffic until `signal` resolves, then shut
    /// everything down
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Services { state, pool } = self;
        let gateway = state.gateway.clone();
        let app = api::router(state.clone());

        let closing = gateway.clone();
        let shutdown = async move {
            signal.await;
            closing.close(|| info!("Gateway closed")).await;
        };

        let served = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await;

        // Also reached when serving failed before any signal
        if !gateway.is_closed() {
            gateway.close(|| info!("Gateway closed")).await;
        }
        pool.shutdown().await;

        if let Err(e) = state.queue.flush().await {
            error!(error = %e, "Failed to flush queue");
        }
        if let Err(e) = state.status.persist() {
            error!(error = %e, "Failed to persist status store");
        }

        served?;
        info!("Shutdown complete");
        Ok(())
    }
}

fn build_storage(config: &Config) -> Result<StorageClient> {
    match config.storage.provider {
        StorageProvider::Memory => Ok(StorageClient::in_memory()),
        StorageProvider::Local => match &config.storage.root {
            Some(root) => Ok(StorageClient::local(root)?),
            None => Err(ConfigError::from(ValidationError::MissingStorageRoot).into()),
        },
    }
}

fn build_authenticator(config: &Config) -> Result<Authenticator> {
    let provider: Arc<dyn IdentityProvider> = match config.auth.provider {
        AuthProvider::Jwt => Arc::new(JwtProvider::new(
            config.auth.jwt_secret.as_deref().unwrap_or_default(),
            config.auth.issuer.as_deref(),
        )?),
        AuthProvider::Remote => Arc::new(RemoteProvider::new(
            config.auth.verify_url.as_deref().unwrap_or_default(),
            config.gateway.auth_timeout(),
        )?),
    };
    let directory = StaticDirectory::new(config.auth.users.clone(), config.auth.passthrough);

    Ok(Authenticator::new(provider, Arc::new(directory), config.gateway.auth_timeout()))
}

/// `importd serve`
pub async fn run(address: Option<SocketAddr>, config_path: Option<PathBuf>) -> Result<()> {
    info!("Loading configuration");
    let config = Config::load_with(config_path)?;
    let address = address.unwrap_or(config.server.bind_addr);

    let services = Services::start(config).await?;

    let listener = TcpListener::bind(address).await?;
    info!(%address, "importd listening");

    services.serve(listener, shutdown_signal()).await
}

/// What one `importd prune` run removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub status: PruneStats,
    /// Completed and failed queue entries past the status TTL
    pub queue_entries: usize,
    pub payloads_discarded: usize,
}

/// `importd prune`
pub async fn prune(config_path: Option<PathBuf>) -> Result<PruneReport> {
    let config = Config::load_with(config_path)?;
    prune_with(&config).await
}

/// Sweep expired status records, settled queue entries and their stored payloads
pub async fn prune_with(config: &Config) -> Result<PruneReport> {
    let status = StatusStore::open(config.server.status_path(), config.status.ttl())?;
    let queue = FjallQueue::open(config.server.queue_path())?;
    let source = PayloadSource::new(build_storage(config)?);

    let mut report = PruneReport {
        status: status.prune_expired()?,
        ..PruneReport::default()
    };
    status.persist()?;

    let ttl = chrono::Duration::from_std(config.status.ttl()).unwrap_or_else(|_| chrono::Duration::days(36500));
    let removed = queue.prune_settled(chrono::Utc::now() - ttl)?;
    queue.flush()?;
    report.queue_entries = removed.len();

    for entry in &removed {
        let Some(key) = entry.job.payload.storage_key() else {
            continue;
        };
        match source.discard(&entry.job).await {
            Ok(()) => report.payloads_discarded += 1,
            Err(e) => warn!(job_id = %entry.job.job_id, key, error = %e, "Failed to discard stored payload"),
        }
    }

    Ok(report)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ImportJob, ImportOptions, JobRequest, PayloadRef};
    use crate::queue::QueueEntry;
    use crate::storage::upload_key;
    use tempfile::TempDir;

    fn entry(job_id: &str, payload: PayloadRef) -> QueueEntry {
        QueueEntry::new(ImportJob::from_request(
            job_id.to_string(),
            JobRequest {
                user_id: Some("u1".to_string()),
                file_name: format!("{job_id}.csv"),
                payload,
                options: ImportOptions::default(),
            },
        ))
    }

    #[tokio::test]
    async fn test_prune_drops_stale_failures_and_their_payloads() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.data_path = temp_dir.path().join("data");
        config.storage.provider = StorageProvider::Local;
        config.storage.root = Some(temp_dir.path().join("blobs"));

        let storage = build_storage(&config).unwrap();
        let stale_key = upload_key("u1", "stale");
        let fresh_key = upload_key("u1", "fresh");
        storage.upload(&stale_key, b"YSxiCg==".to_vec()).await.unwrap();
        storage.upload(&fresh_key, b"YSxiCg==".to_vec()).await.unwrap();

        let now = chrono::Utc::now();
        {
            let queue = FjallQueue::open(config.server.queue_path()).unwrap();
            let mut stale = entry("stale", PayloadRef::Stored { key: stale_key.clone() });
            stale.fail("boom", now - chrono::Duration::days(2));
            let mut fresh = entry("fresh", PayloadRef::Stored { key: fresh_key.clone() });
            fresh.fail("boom", now);

            queue.insert(&stale).unwrap();
            queue.insert(&fresh).unwrap();
            queue.insert(&entry("pending", PayloadRef::Inline { content: "YSxiCg==".to_string() })).unwrap();
            queue.flush().unwrap();
        }

        let report = prune_with(&config).await.unwrap();
        assert_eq!(report.queue_entries, 1);
        assert_eq!(report.payloads_discarded, 1);
        assert!(!storage.exists(&stale_key).await.unwrap());
        assert!(storage.exists(&fresh_key).await.unwrap());

        let queue = FjallQueue::open(config.server.queue_path()).unwrap();
        assert!(queue.get("stale").unwrap().is_none());
        assert!(queue.get("fresh").unwrap().is_some());
        assert!(queue.get("pending").unwrap().is_some());
    }
}
