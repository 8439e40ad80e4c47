//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use jobwatch_monitor::history::MAX_RECENT;

use super::server::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "jobwatch",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "viewers": state.registry.viewer_count().await,
        "connections": state.registry.connection_count().await,
        "cycles": state.poller.as_ref().map(|p| p.cycles()).unwrap_or(0),
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub job: Option<String>,
}

/// Recent status transitions, newest first.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<Value>) {
    let Some(history) = &state.history else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ok": false, "error": "History is disabled"})),
        );
    };

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_RECENT);
    match history.recent(query.job.as_deref(), limit).await {
        Ok(events) => (
            StatusCode::OK,
            Json(json!({"ok": true, "count": events.len(), "events": events})),
        ),
        Err(e) => {
            tracing::error!("History query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
        }
    }
}
