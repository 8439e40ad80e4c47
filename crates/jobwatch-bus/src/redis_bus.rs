//! Redis pub/sub event bus.
//!
//! Publishing goes through a `ConnectionManager`, which reconnects on its own.
//! Each subscription opens a dedicated pub/sub connection; when that
//! connection drops the stream ends and the consumer re-subscribes.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::traits::{BusDelivery, BusStream, EventBus};

pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    /// Connect to `redis://host:port[/db]`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| JobWatchError::Bus(format!("Invalid Redis URL: {e}")))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| JobWatchError::Bus(format!("Redis connect failed: {e}")))?;
        tracing::info!("Event bus connected to Redis at {url}");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| JobWatchError::Bus(format!("Redis publish to '{channel}' failed: {e}")))?;
        tracing::debug!("Published on '{channel}' to {receivers} subscriber(s)");
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BusStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| JobWatchError::Bus(format!("Redis pub/sub connect failed: {e}")))?;
        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .map_err(|e| JobWatchError::Bus(format!("Redis subscribe '{channel}' failed: {e}")))?;
        }
        tracing::info!("Subscribed to Redis channels: {}", channels.join(", "));

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let channel = msg.get_channel_name().to_string();
            let delivery = match msg.get_payload::<String>() {
                Ok(payload) => Some(Ok(BusDelivery { channel, payload })),
                Err(e) => {
                    tracing::warn!("Skipping non-text payload on '{channel}': {e}");
                    None
                }
            };
            futures::future::ready(delivery)
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Live Redis for round-trip tests, e.g. `redis://127.0.0.1:6379`.
    fn live_url() -> Option<String> {
        std::env::var("JOBWATCH_TEST_REDIS_URL").ok()
    }

    async fn next(stream: &mut BusStream) -> Option<BusDelivery> {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("no delivery within 2s")
            .map(|item| item.unwrap())
    }

    #[tokio::test]
    async fn test_invalid_url_is_bus_error() {
        let err = RedisBus::connect("not a redis url").await.err().unwrap();
        assert!(matches!(err, JobWatchError::Bus(_)), "got {err}");
        assert!(err.to_string().contains("Invalid Redis URL"), "got {err}");
    }

    #[tokio::test]
    async fn test_round_trip_on_both_channels() {
        let Some(url) = live_url() else {
            return;
        };
        let bus = RedisBus::connect(&url).await.unwrap();
        let updates = format!("jobwatch-test-updates-{}", std::process::id());
        let alerts = format!("jobwatch-test-alerts-{}", std::process::id());
        let mut stream = bus.subscribe(&[updates.as_str(), alerts.as_str()]).await.unwrap();

        for i in 0..3 {
            bus.publish(&updates, &format!("u{i}")).await.unwrap();
        }
        bus.publish(&alerts, "a0").await.unwrap();

        for i in 0..3 {
            let d = next(&mut stream).await.unwrap();
            assert_eq!(d.channel, updates);
            assert_eq!(d.payload, format!("u{i}"));
        }
        let d = next(&mut stream).await.unwrap();
        assert_eq!(d.channel, alerts);
        assert_eq!(d.payload, "a0");
    }

    #[tokio::test]
    async fn test_non_text_payload_skipped() {
        let Some(url) = live_url() else {
            return;
        };
        let bus = RedisBus::connect(&url).await.unwrap();
        let channel = format!("jobwatch-test-binary-{}", std::process::id());
        let mut stream = bus.subscribe(&[channel.as_str()]).await.unwrap();

        let mut conn = bus.publisher.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(&[0xff_u8, 0xfe, 0x00][..])
            .query_async(&mut conn)
            .await
            .unwrap();
        bus.publish(&channel, "after").await.unwrap();

        assert_eq!(next(&mut stream).await.unwrap().payload, "after");
    }
}
