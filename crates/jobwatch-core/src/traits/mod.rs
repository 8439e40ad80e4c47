//! Trait definitions for the external boundaries of the pipeline.

pub mod bus;
pub mod sink;
pub mod source;

pub use bus::{BusDelivery, BusStream, EventBus};
pub use sink::HistorySink;
pub use source::JobSource;
