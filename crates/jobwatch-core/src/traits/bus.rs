//! Event bus trait — named-channel publish/subscribe.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;

/// One message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusDelivery {
    pub channel: String,
    pub payload: String,
}

/// Stream of deliveries. An `Err` item or the end of the stream means the
/// subscription is gone and the consumer should re-subscribe.
pub type BusStream = Pin<Box<dyn Stream<Item = Result<BusDelivery>> + Send>>;

/// Publish/subscribe broker. Delivery is at-least-once to subscribers present
/// at publish time, FIFO per channel per publisher, with no replay.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Backend name (for logs).
    fn name(&self) -> &str;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, channels: &[&str]) -> Result<BusStream>;
}
