use std::sync::Arc;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::gateway::Gateway;
use crate::observability::Metrics;
use crate::queue::{ImportProducer, JobQueue};
use crate::status::StatusStore;
use crate::storage::StorageClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub producer: ImportProducer,
    pub queue: Arc<JobQueue>,
    pub status: StatusStore,
    pub storage: StorageClient,
    pub authenticator: Authenticator,
    pub gateway: Arc<Gateway>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        producer: ImportProducer,
        queue: Arc<JobQueue>,
        status: StatusStore,
        storage: StorageClient,
        authenticator: Authenticator,
        gateway: Arc<Gateway>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            producer,
            queue,
            status,
            storage,
            authenticator,
            gateway,
            metrics,
        }
    }
}
