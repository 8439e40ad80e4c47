//! # JobWatch Gateway
//!
//! Fans bus traffic out to live viewers over WebSocket.
//!
//! ```text
//! EventBus ──► Subscriber ──► ConnectionRegistry ──► per-connection queue
//!                                    ▲                   └─► writer task ─► socket
//!              /ws/monitoring/{id} ──┘ connect / disconnect
//! ```
//! Also serves `/health` and `/api/monitoring/history`.

pub mod registry;
pub mod routes;
pub mod server;
pub mod subscriber;
pub mod ws;

pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::{AppState, build_router, serve, start};
pub use subscriber::Subscriber;
