//! # JobWatch Core
//!
//! Shared vocabulary for the monitoring pipeline: job snapshots, normalized
//! statuses, status-change and alert events, the bus envelope, the traits at
//! every external boundary, configuration and the error type.
//!
//! ```text
//! JobSource ──► Poller ──► diff ──► HistorySink
//!                              └──► AlertEvaluator
//!                              └──► EventBus ──► Subscriber ──► ConnectionRegistry
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::JobWatchConfig;
pub use error::{JobWatchError, Result};
pub use traits::{BusDelivery, BusStream, EventBus, HistorySink, JobSource};
pub use types::{
    AlertEvent, AlertSeverity, BusMessage, JobSnapshot, JobStatus, SnapshotMap, StatusChangeEvent,
    StatusCode, ALERT_CHANNEL, JOB_UPDATES_CHANNEL,
};
