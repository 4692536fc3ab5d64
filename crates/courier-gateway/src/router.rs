//! Axum router wiring for the delivery endpoints.
//!
//! - `GET|HEAD /v1/msgstream` long/short polling
//! - `GET /v1/msgstream/ws` WebSocket upgrade

use axum::{routing::get, Router};

use crate::{app_state::AppState, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/msgstream", get(transport::poll::poll))
        .route("/v1/msgstream/ws", get(transport::ws::ws_upgrade))
        .with_state(state)
}
