//! Bus subscriber — relays `job_updates` and `alert_notifications` traffic
//! into the connection registry.
//!
//! Subscription errors and end-of-stream back off and re-subscribe.
//! Payloads that do not decode as an envelope are logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use jobwatch_core::traits::EventBus;
use jobwatch_core::types::{ALERT_CHANNEL, BusMessage, JOB_UPDATES_CHANNEL};

use crate::registry::ConnectionRegistry;

/// Lower bound on the re-subscribe delay.
pub const MIN_BACKOFF: Duration = Duration::from_millis(100);

pub struct Subscriber {
    bus: Arc<dyn EventBus>,
    registry: Arc<ConnectionRegistry>,
    backoff: Duration,
}

impl Subscriber {
    pub fn new(bus: Arc<dyn EventBus>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            bus,
            registry,
            backoff: Duration::from_secs(5),
        }
    }

    /// Delay before re-subscribing after an error, at least [`MIN_BACKOFF`].
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff.max(MIN_BACKOFF);
        self
    }

    /// Relay until `shutdown` fires. Dropping the stream unsubscribes.
    pub async fn run(&self, shutdown: CancellationToken) {
        let channels = [JOB_UPDATES_CHANNEL, ALERT_CHANNEL];
        loop {
            let mut stream = match self.bus.subscribe(&channels).await {
                Ok(stream) => {
                    tracing::info!("Subscribed to {:?} on {} bus", channels, self.bus.name());
                    stream
                }
                Err(e) => {
                    tracing::error!("Bus subscription failed: {e}");
                    if self.wait_backoff(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::info!("Bus subscriber stopped");
                        return;
                    }
                    item = stream.next() => match item {
                        Some(Ok(delivery)) => self.relay(&delivery.channel, &delivery.payload).await,
                        Some(Err(e)) => {
                            tracing::error!("Error in bus subscription: {e}");
                            break;
                        }
                        None => {
                            tracing::warn!("Bus subscription ended");
                            break;
                        }
                    }
                }
            }

            drop(stream);
            if self.wait_backoff(&shutdown).await {
                break;
            }
            tracing::info!("Re-subscribing to {} bus", self.bus.name());
        }
        tracing::info!("Bus subscriber stopped");
    }

    /// Returns true if shutdown fired during the wait.
    async fn wait_backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.backoff) => false,
        }
    }

    async fn relay(&self, channel: &str, payload: &str) {
        match BusMessage::from_json(payload) {
            Ok(message) => {
                let delivered = self.registry.broadcast_text(payload).await;
                tracing::debug!(
                    "Relayed {} from '{channel}' to {delivered} connection(s)",
                    message.type_name()
                );
            }
            Err(e) => tracing::warn!("Skipping malformed message on '{channel}': {e}"),
        }
    }
}
