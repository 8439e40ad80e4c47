//! Poller — the monitoring loop.
//!
//! One cycle: query source → diff against cache → per event: evaluate alert,
//! persist, publish → swap cache. The cache is only replaced after a
//! successful query, so an outage never looks like "every job disappeared".
//!
//! The cache is an immutable `Arc<SnapshotMap>` published through a
//! `watch` channel: the poller is the only writer, readers always see a
//! whole map.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use jobwatch_core::config::MonitorConfig;
use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::traits::{EventBus, HistorySink, JobSource};
use jobwatch_core::types::{AlertEvent, BusMessage, SnapshotMap, StatusChangeEvent};

use crate::alerts::AlertEvaluator;
use crate::diff;

/// What one successful cycle produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub jobs_seen: usize,
    pub events: Vec<StatusChangeEvent>,
    pub alerts: Vec<AlertEvent>,
}

pub struct Poller {
    source: Arc<dyn JobSource>,
    bus: Arc<dyn EventBus>,
    history: Option<Arc<dyn HistorySink>>,
    alerts: AlertEvaluator,
    interval: Duration,
    report_removed: bool,
    cache: watch::Sender<Arc<SnapshotMap>>,
    cycles: AtomicU64,
}

impl Poller {
    pub fn new(source: Arc<dyn JobSource>, bus: Arc<dyn EventBus>, alerts: AlertEvaluator) -> Self {
        let (cache, _) = watch::channel(Arc::new(SnapshotMap::new()));
        Self {
            source,
            bus,
            history: None,
            alerts,
            interval: Duration::from_secs(30),
            report_removed: false,
            cache,
            cycles: AtomicU64::new(0),
        }
    }

    /// Poller configured from the `[monitor]` section.
    pub fn from_config(
        config: &MonitorConfig,
        source: Arc<dyn JobSource>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self> {
        Ok(Self::new(source, bus, AlertEvaluator::from_config(config)?)
            .with_interval(Duration::from_secs(config.poll_interval_secs))
            .with_removals(config.report_removed))
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Report jobs that vanish from the source as `→ REMOVED`.
    pub fn with_removals(mut self, enabled: bool) -> Self {
        self.report_removed = enabled;
        self
    }

    /// Current cache contents.
    pub fn cache(&self) -> Arc<SnapshotMap> {
        self.cache.borrow().clone()
    }

    /// Read-only view that follows every cache swap.
    pub fn watch_cache(&self) -> watch::Receiver<Arc<SnapshotMap>> {
        self.cache.subscribe()
    }

    /// Number of successful cycles so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Run one poll cycle.
    ///
    /// A source failure is logged and returned; the cache is untouched and
    /// nothing is published. Sink and bus failures are logged and skipped.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        tracing::debug!("Polling {} for job status...", self.source.name());
        let jobs = match self.source.list_job_streams().await {
            Ok(jobs) => jobs,
            Err(e) => {
                match &e {
                    JobWatchError::SourceAuth(_) => {
                        tracing::error!("Source rejected credentials, skipping cycle: {e}")
                    }
                    JobWatchError::SourceConnection(_) => {
                        tracing::warn!("Source unreachable, skipping cycle: {e}")
                    }
                    _ => tracing::error!("Failed to query source for job streams: {e}"),
                }
                return Err(e);
            }
        };

        let current: SnapshotMap = jobs.into_iter().map(|job| (job.name.clone(), job)).collect();
        let previous = self.cache();
        let now = Utc::now();
        let events = if self.report_removed {
            diff::diff_with_removals(&previous, &current, now)
        } else {
            diff::diff_at(&previous, &current, now)
        };

        let mut report = CycleReport {
            jobs_seen: current.len(),
            ..CycleReport::default()
        };
        for event in events {
            if let Some(alert) = self.handle_event(&event).await {
                report.alerts.push(alert);
            }
            report.events.push(event);
        }

        self.cache.send_replace(Arc::new(current));
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            "Cycle {cycle}: {} job(s), {} change(s), {} alert(s)",
            report.jobs_seen,
            report.events.len(),
            report.alerts.len()
        );
        Ok(report)
    }

    async fn handle_event(&self, event: &StatusChangeEvent) -> Option<AlertEvent> {
        tracing::info!(
            "Job status change: {} | {} -> {}",
            event.job_name,
            event.old_status,
            event.new_status
        );
        let alert = self.alerts.evaluate(event);

        if let Some(history) = &self.history
            && let Err(e) = history.append(event).await
        {
            tracing::error!("Failed to store status history for '{}': {e}", event.job_name);
        }

        self.publish(&BusMessage::JobStatusUpdate(event.clone())).await;

        if let Some(alert) = &alert {
            tracing::warn!("ALERT [{}] {}", alert.severity, alert.message);
            self.publish(&BusMessage::AlertNotification(alert.clone())).await;
        }
        alert
    }

    async fn publish(&self, message: &BusMessage) {
        let payload = match message.to_json() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to encode {}: {e}", message.type_name());
                return;
            }
        };
        if let Err(e) = self.bus.publish(message.channel(), &payload).await {
            match message {
                BusMessage::AlertNotification(_) => tracing::error!("Alert not published: {e}"),
                BusMessage::JobStatusUpdate(_) => tracing::warn!("Status update not published: {e}"),
            }
        }
    }

    /// Poll on a fixed interval until `shutdown` fires. Cancellation is only
    /// observed between cycles; an in-flight cycle always completes.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            "Job monitor started (source={}, poll every {:?})",
            self.source.name(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Source failures are logged inside; the next tick retries.
            let _ = self.poll_once().await;
        }
        tracing::info!("Job monitor stopped after {} cycle(s)", self.cycles());
    }
}
