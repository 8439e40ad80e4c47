//! WebSocket handler for live monitoring pushes.
//!
//! Protocol:
//! ← Server pushes bus envelopes as text frames:
//!   {"type":"job_status_update","data":{...}}
//!   {"type":"alert_notification","data":{...}}
//! → Client text is logged and otherwise ignored.
//!
//! Each socket is split: a writer task drains the connection's queue in
//! order, the reader loop watches for close. Whichever ends first tears the
//! connection down and removes it from the registry.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use super::server::AppState;

/// WebSocket upgrade handler for `/ws/monitoring/{viewer_id}`.
pub async fn monitoring_ws(
    ws: WebSocketUpgrade,
    Path(viewer_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, viewer_id, state))
}

async fn handle_socket(socket: WebSocket, viewer_id: String, state: Arc<AppState>) {
    let (handle, mut queue) = state.registry.open();
    let conn_id = handle.id();
    state.registry.connect(&viewer_id, handle).await;

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                tracing::debug!("WS send failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = {
        let viewer_id = viewer_id.clone();
        async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        tracing::debug!("Received message from {viewer_id}: {}", text.as_str());
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("WebSocket error for {viewer_id}: {e}");
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = &mut writer => {}
        _ = reader => {}
    }

    state.registry.disconnect(&viewer_id, conn_id).await;
    writer.abort();
}
