use std::sync::Arc;

use comfyrun_worker::dispatcher::Dispatcher;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Runs jobs in the background and records their outcomes.
    pub dispatcher: Arc<Dispatcher>,
}
