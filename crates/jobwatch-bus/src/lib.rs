//! # JobWatch Bus
//!
//! Backends for the [`EventBus`] trait.
//!
//! - [`MemoryBus`] — tokio broadcast channels, one per channel name. Single
//!   process only.
//! - [`RedisBus`] — Redis pub/sub, lets several gateway instances observe the
//!   same stream of events.

pub mod memory;
pub mod redis_bus;

use std::sync::Arc;

use jobwatch_core::config::BusConfig;
use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::traits::EventBus;

pub use memory::MemoryBus;
pub use redis_bus::RedisBus;

/// Create the bus backend named in configuration.
pub async fn connect(config: &BusConfig) -> Result<Arc<dyn EventBus>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryBus::new(config.capacity))),
        "redis" => Ok(Arc::new(RedisBus::connect(&config.url).await?)),
        other => Err(JobWatchError::Config(format!("Unknown bus backend: {other}"))),
    }
}
