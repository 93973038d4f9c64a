//! `comfyrun-api` -- HTTP front end for running ComfyUI workflows.
//!
//! Accepts `POST /run`, runs each job against a locally launched ComfyUI
//! server in the background and records the outcome for `GET /runs/{id}`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use comfyrun_api::app::build_app;
use comfyrun_api::config::ServerConfig;
use comfyrun_api::state::AppState;
use comfyrun_worker::config::WorkerConfig;
use comfyrun_worker::dispatcher::Dispatcher;
use comfyrun_worker::invocation::JobRunner;
use comfyrun_worker::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    telemetry::init(telemetry::DEFAULT_LOG_FILTER);

    // --- Configuration ---
    let config = ServerConfig::from_env().context("invalid server configuration")?;
    let worker_config = WorkerConfig::from_env().context("invalid worker configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        deploy_test = config.deploy_test,
        "Loaded server configuration",
    );
    tracing::info!(
        platform = %worker_config.profile,
        gpu = %worker_config.gpu,
        policy = worker_config.process_policy.name(),
        max_concurrent_runs = worker_config.max_concurrent_runs,
        comfyui = %worker_config.endpoint().base_url(),
        "Loaded worker configuration",
    );

    // --- Dispatcher ---
    let dispatcher = Arc::new(Dispatcher::new(JobRunner::new(worker_config)));

    let state = AppState {
        config: Arc::new(config.clone()),
        dispatcher: Arc::clone(&dispatcher),
    };
    let app = build_app(state)?;

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cancelling runs");
    dispatcher
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
