use std::sync::Arc;

use tracing::{debug, warn};

use super::ProgressBus;
use crate::jobs::ProgressEvent;
use crate::observability::Metrics;

/// Well-known topic for import progress
pub const IMPORT_PROGRESS_CHANNEL: &str = "import:progress";

/// Worker-side handle that serializes and publishes progress events
///
/// Failures are logged and swallowed; a lost update never fails a job.
#[derive(Clone)]
pub struct ProgressPublisher {
    bus: Arc<dyn ProgressBus>,
    channel: String,
    metrics: Arc<Metrics>,
}

impl ProgressPublisher {
    pub fn new(bus: Arc<dyn ProgressBus>, channel: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            bus,
            channel: channel.into(),
            metrics,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish one event; returns the number of receivers reached
    pub async fn publish(&self, event: &ProgressEvent) -> usize {
        let message = match serde_json::to_string(event) {
            Ok(message) => message,
            Err(e) => {
                warn!(job_id = %event.job_id, error = %e, "Failed to serialize progress event");
                return 0;
            }
        };

        match self.bus.publish(&self.channel, message).await {
            Ok(receivers) => {
                self.metrics.event_published();
                debug!(
                    job_id = %event.job_id,
                    status = %event.status,
                    progress = event.progress,
                    receivers,
                    "Progress published"
                );
                receivers
            }
            Err(e) => {
                warn!(job_id = %event.job_id, channel = %self.channel, error = %e, "Failed to publish progress");
                0
            }
        }
    }
}
