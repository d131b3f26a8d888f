//! WebSocket gateway for import progress
//!
//! The gateway authenticates upgrade requests, keeps a registry of open
//! connections keyed by internal user id, subscribes to the progress channel
//! and relays each event to the connections of the user who owns the job.
//!
//! Connection state never leaves this module: workers only publish on the
//! bus, and each socket is written by exactly one task.

mod connection;
pub mod dispatch;
pub mod handlers;
pub mod handshake;
pub mod registry;

use std::sync::Arc;

use axum::{
    Router,
    extract::{OriginalUri, State, ws::WebSocketUpgrade},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::messaging::{BusError, ProgressBus};
use crate::observability::Metrics;
use connection::ConnectionContext;

pub use dispatch::{ChannelHandler, Dispatcher, ProgressFanout};
pub use handlers::{MessageHandler, PingHandler};
pub use handshake::{Handshake, authenticate_upgrade};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, InMemoryRegistry, Outbound};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Malformed progress event: {0}")]
    MalformedEvent(String),

    #[error("Malformed client message: {0}")]
    MalformedMessage(String),

    #[error("No handler for channel: {0}")]
    UnknownChannel(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

pub struct Gateway {
    authenticator: Authenticator,
    registry: Arc<dyn ConnectionRegistry>,
    bus: Arc<dyn ProgressBus>,
    dispatcher: Dispatcher,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    connections: TaskTracker,
    subscribers: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Gateway relaying `channel` through [`ProgressFanout`], answering
    /// client messages with [`PingHandler`]
    pub fn new(
        authenticator: Authenticator,
        registry: Arc<dyn ConnectionRegistry>,
        bus: Arc<dyn ProgressBus>,
        metrics: Arc<Metrics>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            authenticator,
            registry,
            bus,
            dispatcher: Dispatcher::new().route(channel, Arc::new(ProgressFanout)),
            handler: Arc::new(PingHandler),
            metrics,
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Relay another channel; takes effect on [`Gateway::start`]
    pub fn with_channel(mut self, channel: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Self {
        self.dispatcher = self.dispatcher.route(channel, handler);
        self
    }

    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Subscribe to every routed channel and start relaying
    pub async fn start(&self) -> Result<()> {
        let dispatcher = Arc::new(self.dispatcher.clone());
        let mut subscribers = self.subscribers.lock().await;

        for channel in self.dispatcher.channels() {
            let subscription = self.bus.subscribe(channel).await?;
            info!(channel, "Gateway relaying channel");
            subscribers.push(tokio::spawn(dispatch::run_subscriber(
                subscription,
                dispatcher.clone(),
                self.registry.clone(),
            )));
        }
        Ok(())
    }

    /// Vet an upgrade request; see [`authenticate_upgrade`]
    pub async fn handshake(&self, url: Option<&str>) -> Handshake {
        authenticate_upgrade(&self.authenticator, url).await
    }

    /// Router serving WebSocket upgrades on `path`
    pub fn router(self: &Arc<Self>, path: &str) -> Router {
        Router::new().route(path, get(upgrade)).with_state(self.clone())
    }

    /// Stop relaying and close every connection
    ///
    /// The channel is unsubscribed and the bus closed first; a failing bus is
    /// logged and does not keep the connections open. `on_closed` runs once
    /// every connection task has finished.
    pub async fn close<F: FnOnce()>(&self, on_closed: F) {
        for channel in self.dispatcher.channels() {
            if let Err(e) = self.bus.unsubscribe(channel).await {
                warn!(channel, error = %e, "Failed to unsubscribe from channel");
            }
        }
        if let Err(e) = self.bus.close().await {
            warn!(error = %e, "Failed to close progress bus");
        }

        self.shutdown.cancel();
        let closing = self.registry.close_all();
        info!(connections = closing, "Closing WebSocket connections");

        self.connections.close();
        self.connections.wait().await;

        for subscriber in self.subscribers.lock().await.drain(..) {
            subscriber.abort();
            let _ = subscriber.await;
        }

        info!("WebSocket server closed");
        on_closed();
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: self.registry.clone(),
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

fn refuse(status: StatusCode) -> Response {
    (status, [(header::CONNECTION, "close")]).into_response()
}

async fn upgrade(
    State(gateway): State<Arc<Gateway>>,
    OriginalUri(uri): OriginalUri,
    ws: WebSocketUpgrade,
) -> Response {
    if gateway.is_closed() {
        return refuse(StatusCode::SERVICE_UNAVAILABLE);
    }

    match gateway.handshake(uri.path_and_query().map(|pq| pq.as_str())).await {
        Handshake::Accepted(user) => {
            let ctx = gateway.connection_context();
            let tracker = gateway.connections.clone();
            ws.on_upgrade(move |socket| tracker.track_future(connection::serve(socket, user, ctx)))
        }
        Handshake::Rejected(_) => refuse(StatusCode::UNAUTHORIZED),
        Handshake::Ignored => refuse(StatusCode::BAD_REQUEST),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticDirectory;
    use crate::auth::testing::StaticProvider;
    use crate::messaging::{LocalBus, Subscription};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn authenticator() -> Authenticator {
        Authenticator::new(
            Arc::new(StaticProvider::with_token("good", "ext-1")),
            Arc::new(StaticDirectory::from_pairs([("ext-1", "u1")])),
            Duration::from_secs(1),
        )
    }

    fn gateway(bus: Arc<dyn ProgressBus>) -> Gateway {
        Gateway::new(
            authenticator(),
            Arc::new(InMemoryRegistry::new()),
            bus,
            Arc::new(Metrics::new()),
            "import:progress",
        )
    }

    /// Bus whose teardown calls always fail
    struct BrokenBus(LocalBus);

    #[async_trait]
    impl ProgressBus for BrokenBus {
        async fn publish(&self, channel: &str, message: String) -> crate::messaging::Result<usize> {
            self.0.publish(channel, message).await
        }

        async fn subscribe(&self, channel: &str) -> crate::messaging::Result<Subscription> {
            self.0.subscribe(channel).await
        }

        async fn unsubscribe(&self, _channel: &str) -> crate::messaging::Result<()> {
            Err(BusError::PublishFailed("connection reset".to_string()))
        }

        async fn close(&self) -> crate::messaging::Result<()> {
            Err(BusError::PublishFailed("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_relays_events_to_registered_connections() {
        let bus = Arc::new(LocalBus::new(16));
        let gateway = gateway(bus.clone());
        gateway.start().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.registry().register(ConnectionHandle::new("u1", tx));

        let event = serde_json::json!({
            "channel": "import:progress",
            "jobId": "job-1",
            "userId": "u1",
            "status": "processing",
            "progress": 10,
            "stats": {"total": 10, "created": 1, "merged": 0, "skipped": 0, "invalid": 0, "progress": 10, "errors": []},
        });
        bus.publish("import:progress", event.to_string()).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(frame, Outbound::Text(text) if text.contains("job-1")));

        gateway.close(|| {}).await;
    }

    #[tokio::test]
    async fn test_close_survives_failing_bus() {
        let gateway = gateway(Arc::new(BrokenBus(LocalBus::new(16))));
        gateway.start().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.registry().register(ConnectionHandle::new("u1", tx));

        let closed = AtomicBool::new(false);
        gateway.close(|| closed.store(true, Ordering::SeqCst)).await;

        assert!(closed.load(Ordering::SeqCst));
        assert!(gateway.is_closed());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[tokio::test]
    async fn test_handshake_through_gateway() {
        let gateway = gateway(Arc::new(LocalBus::new(16)));
        assert_eq!(gateway.handshake(None).await, Handshake::Ignored);
        assert!(matches!(
            gateway.handshake(Some("/ws?token=good")).await,
            Handshake::Accepted(user) if user.id == "u1"
        ));
    }
}
