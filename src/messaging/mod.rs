//! Pub/sub transport for job progress
//!
//! Workers publish JSON-encoded [`ProgressEvent`](crate::jobs::ProgressEvent)s
//! on a named channel and gateways subscribe to it. Delivery is at-most-once:
//! an event published while nobody listens is dropped, and clients fall back
//! to polling the status store.

pub mod bus;
pub mod publisher;

use async_trait::async_trait;
use thiserror::Error;

pub use bus::{LocalBus, Subscription};
pub use publisher::{ProgressPublisher, IMPORT_PROGRESS_CHANNEL};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Channel-addressed publish/subscribe transport
#[async_trait]
pub trait ProgressBus: Send + Sync {
    /// Publish a raw message; returns how many subscribers received it
    async fn publish(&self, channel: &str, message: String) -> Result<usize>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Drop the channel; open subscriptions end
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Shut the transport down; later publishes fail with [`BusError::Closed`]
    async fn close(&self) -> Result<()>;
}
