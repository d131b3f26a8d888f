use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use super::registry::ConnectionRegistry;
use super::{GatewayError, Result};
use crate::jobs::ProgressEvent;
use crate::messaging::Subscription;

/// Handles one raw pub/sub message for the connections in `registry`
pub trait ChannelHandler: Send + Sync {
    /// Returns how many connections the message was queued for
    fn handle(&self, registry: &dyn ConnectionRegistry, channel: &str, message: &str) -> Result<usize>;
}

/// Sends a progress event to every open connection of its owner
#[derive(Debug, Clone, Default)]
pub struct ProgressFanout;

impl ChannelHandler for ProgressFanout {
    fn handle(&self, registry: &dyn ConnectionRegistry, channel: &str, message: &str) -> Result<usize> {
        let event: ProgressEvent = serde_json::from_str(message)
            .map_err(|e| GatewayError::MalformedEvent(e.to_string()))?;
        let payload = serde_json::to_string(&event)?;

        let mut delivered = 0;
        for conn in registry.connections_for(&event.user_id) {
            if conn.send_text(payload.clone()) {
                delivered += 1;
            } else {
                debug!(connection_id = %conn.id, user_id = %event.user_id, "Connection gone, event dropped");
            }
        }

        debug!(channel, job_id = %event.job_id, user_id = %event.user_id, delivered, "Progress event dispatched");
        Ok(delivered)
    }
}

/// Routes channel messages to their handler
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn ChannelHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, channel: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Self {
        self.handlers.insert(channel.into(), handler);
        self
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn dispatch(&self, registry: &dyn ConnectionRegistry, channel: &str, message: &str) -> Result<usize> {
        let handler = self
            .handlers
            .get(channel)
            .ok_or_else(|| GatewayError::UnknownChannel(channel.to_string()))?;
        handler.handle(registry, channel, message)
    }
}

/// Drains a subscription until the channel ends
///
/// Every message is handled on its own: a failure is logged and the loop
/// moves on to the next one.
pub async fn run_subscriber(
    mut subscription: Subscription,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<dyn ConnectionRegistry>,
) {
    let channel = subscription.channel().to_string();
    while let Some(message) = subscription.next().await {
        if let Err(e) = dispatcher.dispatch(registry.as_ref(), &channel, &message) {
            error!(channel = %channel, error = %e, "Progress message handler error");
        }
    }
    debug!(channel = %channel, "Subscription ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::{ConnectionHandle, InMemoryRegistry, Outbound};
    use crate::jobs::{ImportJob, ImportOptions, JobRequest, JobStats, JobStatus, PayloadRef};
    use crate::messaging::{LocalBus, ProgressBus};
    use tokio::sync::mpsc;

    fn event_json(user_id: &str, job_id: &str) -> String {
        let job = ImportJob::from_request(
            job_id.to_string(),
            JobRequest {
                user_id: Some(user_id.to_string()),
                file_name: "data.csv".to_string(),
                payload: PayloadRef::Inline {
                    content: String::new(),
                },
                options: ImportOptions::default(),
            },
        );
        let event = ProgressEvent::new("import:progress", &job, user_id, JobStatus::Processing, &JobStats::default());
        serde_json::to_string(&event).unwrap()
    }

    fn connect(registry: &InMemoryRegistry, user_id: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(ConnectionHandle::new(user_id, tx));
        rx
    }

    fn text(outbound: Outbound) -> String {
        match outbound {
            Outbound::Text(text) => text,
            Outbound::Close => panic!("expected text frame"),
        }
    }

    #[test]
    fn test_fanout_reaches_only_owner() {
        let registry = InMemoryRegistry::new();
        let mut a1 = connect(&registry, "a");
        let mut a2 = connect(&registry, "a");
        let mut b1 = connect(&registry, "b");

        let delivered = ProgressFanout
            .handle(&registry, "import:progress", &event_json("a", "job-1"))
            .unwrap();
        assert_eq!(delivered, 2);

        for rx in [&mut a1, &mut a2] {
            let payload: serde_json::Value = serde_json::from_str(&text(rx.try_recv().unwrap())).unwrap();
            assert_eq!(payload["jobId"], "job-1");
        }
        assert!(b1.try_recv().is_err());
    }

    #[test]
    fn test_fanout_without_connections() {
        let registry = InMemoryRegistry::new();
        assert_eq!(
            ProgressFanout.handle(&registry, "import:progress", &event_json("a", "job-1")).unwrap(),
            0
        );
    }

    #[test]
    fn test_malformed_event_is_error() {
        let registry = InMemoryRegistry::new();
        let err = ProgressFanout.handle(&registry, "import:progress", "{not json").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedEvent(_)));
    }

    #[test]
    fn test_unknown_channel() {
        let registry = InMemoryRegistry::new();
        let dispatcher = Dispatcher::new().route("import:progress", Arc::new(ProgressFanout));
        assert!(matches!(
            dispatcher.dispatch(&registry, "other", "{}"),
            Err(GatewayError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_subscriber_survives_bad_messages() {
        let bus = LocalBus::new(16);
        let registry = Arc::new(InMemoryRegistry::new());
        let mut rx = connect(&registry, "a");
        let dispatcher = Arc::new(Dispatcher::new().route("import:progress", Arc::new(ProgressFanout)));

        let subscription = bus.subscribe("import:progress").await.unwrap();
        let task = tokio::spawn(run_subscriber(subscription, dispatcher, registry.clone()));

        bus.publish("import:progress", "garbage".to_string()).await.unwrap();
        bus.publish("import:progress", event_json("a", "job-2")).await.unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text(frame).contains("job-2"));

        bus.unsubscribe("import:progress").await.unwrap();
        task.await.unwrap();
    }
}
