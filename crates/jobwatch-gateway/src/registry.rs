//! Connection registry — live viewer connections keyed by viewer id.
//!
//! Each connection is a bounded outbound queue drained by its own writer
//! task, so frames reach one connection in the order they were queued.
//! A viewer key exists only while it holds at least one connection.
//!
//! Broadcasts snapshot the handle set under the lock and send outside it;
//! a handle whose queue is closed, or stays full past the send timeout, is
//! disconnected on its own without affecting delivery to the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};

use jobwatch_core::config::GatewayConfig;
use jobwatch_core::error::Result;
use jobwatch_core::types::BusMessage;

pub type ConnectionId = u64;

/// Sending half of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

pub struct ConnectionRegistry {
    viewers: Mutex<HashMap<String, HashMap<ConnectionId, ConnectionHandle>>>,
    queue_capacity: usize,
    send_timeout: Duration,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize, send_timeout: Duration) -> Self {
        Self {
            viewers: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            send_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.queue_capacity,
            Duration::from_millis(config.send_timeout_ms),
        )
    }

    /// Allocate a handle and the queue its writer task drains.
    pub fn open(&self) -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (ConnectionHandle::new(id, tx), rx)
    }

    /// Register a handle under a viewer. Re-registering the same id is a no-op.
    pub async fn connect(&self, viewer_id: &str, handle: ConnectionHandle) {
        let mut viewers = self.viewers.lock().await;
        let conns = viewers.entry(viewer_id.to_string()).or_default();
        let id = handle.id;
        if conns.insert(id, handle).is_none() {
            tracing::info!(
                "Viewer '{viewer_id}' connected (conn #{id}, {} open)",
                conns.len()
            );
        }
    }

    /// Remove a handle. Returns false if it was not registered.
    pub async fn disconnect(&self, viewer_id: &str, id: ConnectionId) -> bool {
        let mut viewers = self.viewers.lock().await;
        let Some(conns) = viewers.get_mut(viewer_id) else {
            return false;
        };
        let removed = conns.remove(&id).is_some();
        if conns.is_empty() {
            viewers.remove(viewer_id);
        }
        if removed {
            tracing::info!("Viewer '{viewer_id}' disconnected (conn #{id})");
        }
        removed
    }

    /// Send to every live connection. Returns the number of deliveries.
    pub async fn broadcast(&self, message: &BusMessage) -> Result<usize> {
        let payload = message.to_json()?;
        Ok(self.broadcast_text(&payload).await)
    }

    /// Like [`broadcast`](Self::broadcast) for an already-encoded frame.
    pub async fn broadcast_text(&self, payload: &str) -> usize {
        let targets: Vec<(String, ConnectionHandle)> = {
            let viewers = self.viewers.lock().await;
            viewers
                .iter()
                .flat_map(|(viewer, conns)| conns.values().map(move |h| (viewer.clone(), h.clone())))
                .collect()
        };
        self.deliver(targets, payload).await
    }

    /// Send to every connection of one viewer.
    pub async fn send_to_viewer(&self, viewer_id: &str, message: &BusMessage) -> Result<usize> {
        let payload = message.to_json()?;
        let targets: Vec<(String, ConnectionHandle)> = {
            let viewers = self.viewers.lock().await;
            viewers
                .get(viewer_id)
                .map(|conns| {
                    conns
                        .values()
                        .map(|h| (viewer_id.to_string(), h.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(self.deliver(targets, &payload).await)
    }

    async fn deliver(&self, targets: Vec<(String, ConnectionHandle)>, payload: &str) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let sends = targets.iter().map(|(_, handle)| {
            handle
                .tx
                .send_timeout(payload.to_string(), self.send_timeout)
        });
        let results = join_all(sends).await;

        let mut delivered = 0;
        for ((viewer, handle), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("Dropping conn #{} of viewer '{viewer}': {e}", handle.id);
                    self.disconnect(viewer, handle.id).await;
                }
            }
        }
        delivered
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.lock().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.viewers.lock().await.values().map(HashMap::len).sum()
    }

    /// Drop every handle; writer tasks see their queue close and exit.
    pub async fn close_all(&self) -> usize {
        let mut viewers = self.viewers.lock().await;
        let closed = viewers.values().map(HashMap::len).sum();
        viewers.clear();
        if closed > 0 {
            tracing::info!("Closed {closed} viewer connection(s)");
        }
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobwatch_core::types::{JobSnapshot, StatusChangeEvent};

    fn update(name: &str) -> BusMessage {
        let snap = JobSnapshot::new(name, "EXEC", "CPU1");
        BusMessage::JobStatusUpdate(StatusChangeEvent::transition(None, &snap, Utc::now()))
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(8, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_broadcast_fans_out_to_every_connection() {
        let reg = registry();
        let (a1, mut rx_a1) = reg.open();
        let (a2, mut rx_a2) = reg.open();
        let (b1, mut rx_b1) = reg.open();
        reg.connect("A", a1).await;
        reg.connect("A", a2).await;
        reg.connect("B", b1).await;
        assert_eq!(reg.viewer_count().await, 2);
        assert_eq!(reg.connection_count().await, 3);

        assert_eq!(reg.broadcast(&update("JOB_A")).await.unwrap(), 3);
        for rx in [&mut rx_a1, &mut rx_a2, &mut rx_b1] {
            let frame = rx.recv().await.unwrap();
            assert!(frame.contains("\"type\":\"job_status_update\""));
        }
    }

    #[tokio::test]
    async fn test_dead_connection_is_isolated() {
        let reg = registry();
        let (a1, rx_a1) = reg.open();
        let (a2, mut rx_a2) = reg.open();
        let (b1, mut rx_b1) = reg.open();
        let dead_id = a1.id();
        reg.connect("A", a1).await;
        reg.connect("A", a2).await;
        reg.connect("B", b1).await;
        drop(rx_a1);

        assert_eq!(reg.broadcast(&update("JOB_A")).await.unwrap(), 2);
        assert!(rx_a2.recv().await.is_some());
        assert!(rx_b1.recv().await.is_some());
        assert_eq!(reg.connection_count().await, 2);
        assert!(!reg.disconnect("A", dead_id).await);
        assert_eq!(reg.viewer_count().await, 2);

        // Survivors keep receiving after the dead handle is gone.
        assert_eq!(reg.broadcast_text("next").await, 2);
        assert_eq!(rx_a2.recv().await.unwrap(), "next");
        assert_eq!(rx_b1.recv().await.unwrap(), "next");
    }

    #[tokio::test]
    async fn test_full_queue_times_out_and_is_dropped() {
        let reg = ConnectionRegistry::new(1, Duration::from_millis(20));
        let (slow, _rx_slow) = reg.open();
        let (fast, mut rx_fast) = reg.open();
        reg.connect("slow", slow).await;
        reg.connect("fast", fast).await;

        assert_eq!(reg.broadcast_text("one").await, 2);
        assert_eq!(rx_fast.recv().await.unwrap(), "one");
        // The slow viewer never drains, so its single slot is still taken.
        assert_eq!(reg.broadcast_text("two").await, 1);
        assert_eq!(rx_fast.recv().await.unwrap(), "two");
        assert_eq!(reg.viewer_count().await, 1);
    }

    #[tokio::test]
    async fn test_viewer_key_removed_with_last_connection() {
        let reg = registry();
        let (h1, _rx1) = reg.open();
        let (h2, _rx2) = reg.open();
        let (id1, id2) = (h1.id(), h2.id());
        reg.connect("A", h1).await;
        reg.connect("A", h2).await;

        assert!(reg.disconnect("A", id1).await);
        assert_eq!(reg.viewer_count().await, 1);
        assert!(reg.disconnect("A", id2).await);
        assert_eq!(reg.viewer_count().await, 0);
        assert!(!reg.disconnect("A", id2).await);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let reg = registry();
        let (h, _rx) = reg.open();
        reg.connect("A", h.clone()).await;
        reg.connect("A", h).await;
        assert_eq!(reg.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_send_to_viewer_targets_one_viewer() {
        let reg = registry();
        let (a, mut rx_a) = reg.open();
        let (b, mut rx_b) = reg.open();
        reg.connect("A", a).await;
        reg.connect("B", b).await;

        assert_eq!(reg.send_to_viewer("A", &update("JOB_A")).await.unwrap(), 1);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(reg.send_to_viewer("nobody", &update("JOB_A")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_all_closes_queues() {
        let reg = registry();
        let (a, mut rx_a) = reg.open();
        reg.connect("A", a).await;
        assert_eq!(reg.close_all().await, 1);
        assert!(rx_a.recv().await.is_none());
        assert_eq!(reg.broadcast_text("late").await, 0);
    }
}
