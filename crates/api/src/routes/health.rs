use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Deployment profile the worker launches ComfyUI with.
    pub platform: &'static str,
    /// Runs queued or executing.
    pub active_runs: usize,
}

/// GET /health -- liveness of the wrapper itself, not of ComfyUI.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let dispatcher = &state.dispatcher;

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        platform: dispatcher.runner().config().profile.name(),
        active_runs: dispatcher.registry().active_count().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
