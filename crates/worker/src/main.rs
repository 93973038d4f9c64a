//! `comfyrun-worker` -- run a single job and exit.
//!
//! Reads a `{"input": {...}}` document from the file given as the first
//! argument (or stdin when absent or `-`), launches ComfyUI, runs the
//! job to completion and prints the outcome as one JSON line:
//! `{"status": "success", "prompt_id": ...}` or `{"error": ..., "kind": ...}`.
//! Exits non-zero unless the job succeeded.
//!
//! Configuration comes from the environment; see
//! [`WorkerConfig::from_env`](comfyrun_worker::config::WorkerConfig::from_env).

use std::io::Read;

use anyhow::Context;
use comfyrun_core::job::{JobStatus, RunRequest};
use comfyrun_worker::config::WorkerConfig;
use comfyrun_worker::invocation::JobRunner;
use comfyrun_worker::telemetry;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init(telemetry::DEFAULT_LOG_FILTER);

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let request = read_request(std::env::args().nth(1).as_deref())?;

    tracing::info!(
        platform = %config.profile,
        gpu = %config.gpu,
        policy = config.process_policy.name(),
        "Starting comfyrun-worker",
    );

    request.input.validate().context("invalid run input")?;
    let job = request.input.into_request();
    let prompt_id = job.job_id.clone();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling run");
            on_signal.cancel();
        }
    });

    let runner = JobRunner::new(config);
    let outcome = runner.run(&job, &cancel).await;
    runner.shutdown().await;

    match outcome {
        Ok(status) => {
            println!("{}", json!({ "status": status.as_str(), "prompt_id": prompt_id }));
            if status != JobStatus::Success {
                std::process::exit(1);
            }
        }
        Err(e) => {
            println!(
                "{}",
                json!({ "error": e.to_string(), "kind": e.kind(), "prompt_id": prompt_id })
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

fn read_request(path: Option<&str>) -> anyhow::Result<RunRequest> {
    let raw = match path {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read run request from stdin")?;
            buf
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run request from {path}"))?,
    };

    serde_json::from_str(&raw).context("run request is not a valid {\"input\": ...} document")
}
