//! Poller → memory bus → subscriber → registry → WebSocket viewers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use jobwatch_bus::memory::MemoryBus;
use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::traits::{HistorySink, JobSource};
use jobwatch_core::types::{JOB_UPDATES_CHANNEL, JobSnapshot};
use jobwatch_gateway::{AppState, ConnectionRegistry, Subscriber, build_router, serve};
use jobwatch_monitor::{AlertEvaluator, Poller, SqliteHistory};

struct ScriptedSource {
    cycles: Mutex<VecDeque<Vec<(&'static str, &'static str)>>>,
}

#[async_trait]
impl JobSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_job_streams(&self) -> Result<Vec<JobSnapshot>> {
        let next = self.cycles.lock().unwrap().pop_front();
        next.map(|jobs| {
            jobs.into_iter()
                .map(|(name, status)| JobSnapshot::new(name, status, "CPU1"))
                .collect()
        })
        .ok_or_else(|| JobWatchError::SourceConnection("script exhausted".into()))
    }
}

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(base: &str, viewer: &str) -> Client {
    let url = format!("ws://{base}/ws/monitoring/{viewer}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Next text frame as JSON.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no frame within 2s")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let resp = build_router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let bus = Arc::new(MemoryBus::new(64));
    let registry = Arc::new(ConnectionRegistry::new(16, Duration::from_millis(500)));
    let history: Arc<dyn HistorySink> = Arc::new(SqliteHistory::in_memory().unwrap());
    let source = Arc::new(ScriptedSource {
        cycles: Mutex::new(
            vec![
                vec![("JOB_A", "EXEC")],
                vec![("JOB_A", "ABEND")],
                vec![("JOB_A", "ABEND")],
            ]
            .into(),
        ),
    });
    let poller = Arc::new(
        Poller::new(source, bus.clone(), AlertEvaluator::new(["ABEND", "ERROR", "FAIL"]))
            .with_history(history.clone()),
    );

    let shutdown = CancellationToken::new();
    let subscriber = Subscriber::new(bus.clone(), registry.clone());
    let sub_task = tokio::spawn({
        let token = shutdown.clone();
        async move { subscriber.run(token).await }
    });

    let state = AppState::new(registry.clone())
        .with_history(history)
        .with_poller(poller.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(serve(listener, state.clone(), shutdown.clone()));

    // Viewer "ops" has two tabs open, "dev" one.
    let mut clients = vec![
        connect(&base, "ops").await,
        connect(&base, "ops").await,
        connect(&base, "dev").await,
    ];
    eventually(async || registry.connection_count().await == 3).await;
    eventually(async || bus.subscriber_count(JOB_UPDATES_CHANNEL) > 0).await;
    assert_eq!(registry.viewer_count().await, 2);

    // Cycle 1: first sight.
    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.events.len(), 1);
    for ws in clients.iter_mut() {
        let frame = next_json(ws).await;
        assert_eq!(frame["type"], "job_status_update");
        assert_eq!(frame["data"]["old_status"], "NEW");
        assert_eq!(frame["data"]["new_status"], "EXEC");
    }

    // Cycle 2: crosses into a critical status → update plus alert.
    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.alerts.len(), 1);
    for ws in clients.iter_mut() {
        let mut types = vec![
            next_json(ws).await["type"].as_str().unwrap().to_string(),
            next_json(ws).await["type"].as_str().unwrap().to_string(),
        ];
        types.sort();
        assert_eq!(types, ["alert_notification", "job_status_update"]);
    }

    // Cycle 3: no change, nothing pushed.
    assert!(poller.poll_once().await.unwrap().events.is_empty());

    let (status, health) = get_json(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["viewers"], 2);
    assert_eq!(health["connections"], 3);
    assert_eq!(health["cycles"], 3);

    let (status, rows) = get_json(&state, "/api/monitoring/history?job=JOB_A&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows["count"], 2);
    assert_eq!(rows["events"][0]["new_status"], "ABEND");

    // A closed tab drops out without disturbing the others.
    let mut closed = clients.remove(0);
    closed.close(None).await.unwrap();
    eventually(async || registry.connection_count().await == 2).await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), sub_task)
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_history_disabled_is_unavailable() {
    let state = AppState::new(Arc::new(ConnectionRegistry::default()));
    let (status, body) = get_json(&state, "/api/monitoring/history").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ok"], false);

    let (_, health) = get_json(&state, "/health").await;
    assert_eq!(health["cycles"], 0);
    assert_eq!(health["viewers"], 0);
}
