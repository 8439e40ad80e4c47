//! In-process event bus — one tokio broadcast channel per channel name.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::traits::{BusDelivery, BusStream, EventBus};

/// Broadcast-channel bus. Subscribers that fall more than `capacity`
/// messages behind skip the overflow and keep going.
pub struct MemoryBus {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|e| JobWatchError::Bus(format!("Lock: {e}")))?;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(tx.clone())
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.sender(channel).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        match self.sender(channel)?.send(payload.to_string()) {
            Ok(receivers) => tracing::debug!("Published on '{channel}' to {receivers} subscriber(s)"),
            // No subscribers is not an error: there is no backlog to keep.
            Err(_) => tracing::debug!("Published on '{channel}' with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BusStream> {
        let mut streams: Vec<BusStream> = Vec::with_capacity(channels.len());
        for channel in channels {
            let name = channel.to_string();
            let rx = self.sender(channel)?.subscribe();
            let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
                Ok(payload) => Some(Ok(BusDelivery {
                    channel: name.clone(),
                    payload,
                })),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber on '{name}' lagged, skipped {skipped} message(s)");
                    None
                }
            });
            streams.push(Box::pin(stream));
        }
        Ok(Box::pin(futures::stream::select_all(streams)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next(stream: &mut BusStream) -> BusDelivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("bus error")
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = MemoryBus::default();
        let mut stream = bus.subscribe(&["job_updates", "alert_notifications"]).await.unwrap();

        bus.publish("job_updates", "one").await.unwrap();
        bus.publish("alert_notifications", "two").await.unwrap();

        let mut got = vec![next(&mut stream).await, next(&mut stream).await];
        got.sort_by(|a, b| a.payload.cmp(&b.payload));
        assert_eq!(got[0].channel, "job_updates");
        assert_eq!(got[0].payload, "one");
        assert_eq!(got[1].channel, "alert_notifications");
    }

    #[tokio::test]
    async fn test_fifo_per_channel() {
        let bus = MemoryBus::default();
        let mut stream = bus.subscribe(&["job_updates"]).await.unwrap();
        for i in 0..5 {
            bus.publish("job_updates", &i.to_string()).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(next(&mut stream).await.payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = MemoryBus::default();
        bus.publish("job_updates", "early").await.unwrap();

        let mut stream = bus.subscribe(&["job_updates"]).await.unwrap();
        bus.publish("job_updates", "late").await.unwrap();
        assert_eq!(next(&mut stream).await.payload, "late");
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = MemoryBus::default();
        let mut a = bus.subscribe(&["job_updates"]).await.unwrap();
        let mut b = bus.subscribe(&["job_updates"]).await.unwrap();
        assert_eq!(bus.subscriber_count("job_updates"), 2);

        bus.publish("job_updates", "x").await.unwrap();
        assert_eq!(next(&mut a).await.payload, "x");
        assert_eq!(next(&mut b).await.payload, "x");

        drop(a);
        assert_eq!(bus.subscriber_count("job_updates"), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_continues() {
        let bus = MemoryBus::new(2);
        let mut stream = bus.subscribe(&["job_updates"]).await.unwrap();
        for i in 0..5 {
            bus.publish("job_updates", &i.to_string()).await.unwrap();
        }
        // Oldest messages were overwritten; the newest survive.
        assert_eq!(next(&mut stream).await.payload, "3");
        assert_eq!(next(&mut stream).await.payload, "4");
    }
}
