//! # JobWatch Monitor
//!
//! The polling side of JobWatch: fetch job streams, detect transitions,
//! decide alerts, record history and publish to the event bus.
//!
//! ## Architecture
//! ```text
//! Poller (tokio interval)
//!   ├── JobSource::list_job_streams   (HwaClient over REST)
//!   ├── diff(cache, current)          → Vec<StatusChangeEvent>
//!   └── per event, in order:
//!         ├── AlertEvaluator::evaluate → Option<AlertEvent>
//!         ├── HistorySink::append      (SqliteHistory)
//!         ├── publish job_updates
//!         └── publish alert_notifications (if any)
//! ```
//! The cache is swapped only after a successful query.

pub mod alerts;
pub mod diff;
pub mod history;
pub mod poller;
pub mod source;

pub use alerts::{AlertEvaluator, AlertRule, DEFAULT_RULE_NAME};
pub use history::SqliteHistory;
pub use poller::{CycleReport, Poller};
pub use source::HwaClient;
