pub mod auth;
pub mod blacklist;
pub mod config;
pub mod decoder;
pub mod envelope;
pub mod pipeline;
pub mod state;
pub mod study_log;
pub mod ws_ingest;

pub use state::AppState;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/events", get(ws_ingest::ws_ingest_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}

mod health {
    use super::*;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
