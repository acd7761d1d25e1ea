//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The relay exposes exactly two endpoints: the websocket upgrade at `/ws`
//! (the entire event protocol lives behind it) and a plain-text liveness
//! probe at `/healthz`. Everything else — document storage, AI endpoints,
//! access control — belongs to collaborator services.

pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Liveness: succeeds while the process is accepting connections.
async fn healthz() -> &'static str {
    "ok"
}
