use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{BusError, ProgressBus, Result};

/// In-process bus, one broadcast channel per topic
pub struct LocalBus {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
    closed: AtomicBool,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ProgressBus for LocalBus {
    async fn publish(&self, channel: &str, message: String) -> Result<usize> {
        self.ensure_open()?;

        let Some(tx) = self.channels.get(channel) else {
            debug!(channel, "No subscribers, message dropped");
            return Ok(0);
        };

        // Ignore errors - no active receivers is fine
        Ok(tx.send(message).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.ensure_open()?;

        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        info!(channel, "Subscribed to channel");
        Ok(Subscription {
            channel: channel.to_string(),
            rx,
        })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        if self.channels.remove(channel).is_some() {
            info!(channel, "Unsubscribed from channel");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.channels.clear();
        info!("Progress bus closed");
        Ok(())
    }
}

/// Receiving end of a channel
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the channel is gone
    ///
    /// A slow subscriber skips what it missed and keeps going.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
