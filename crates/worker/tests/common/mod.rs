//! Shared helpers: a mockito server standing in for ComfyUI and a
//! `sleep` child standing in for its process.

#![allow(dead_code)]

use std::time::Duration;

use comfyrun_core::job::{JobRequest, RunInput};
use comfyrun_core::lifecycle::ProcessPolicy;
use comfyrun_core::profile::DeploymentProfile;
use comfyrun_core::retry::RetryPolicy;
use comfyrun_worker::config::WorkerConfig;
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;

/// Worker config pointing at `server`, launching `sh -c <script>`.
///
/// Budgets are small so failure paths finish quickly.
pub fn config(server: &ServerGuard, script: &str) -> WorkerConfig {
    let mut config = WorkerConfig::for_profile(DeploymentProfile::Modal);
    config.platform.host = "127.0.0.1".to_string();
    config.platform.port = server.socket_address().port();
    config.platform.working_dir = None;
    config.platform.command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    config.reachability = RetryPolicy::new(10, Duration::from_millis(20)).unwrap();
    config.completion = RetryPolicy::new(10, Duration::from_millis(20)).unwrap();
    config.terminate_grace = Duration::from_secs(2);
    config
}

pub fn keep_warm(mut config: WorkerConfig, max_concurrent_runs: usize) -> WorkerConfig {
    config.process_policy = ProcessPolicy::KeepWarm;
    config.max_concurrent_runs = max_concurrent_runs;
    config
}

/// A long-lived child whose command line carries `marker`.
pub fn sleeper(marker: &str) -> String {
    format!("exec sleep {marker}")
}

pub fn input(prompt_id: &str) -> RunInput {
    RunInput {
        prompt_id: Some(prompt_id.to_string()),
        workflow_api: json!({"3": {"class_type": "KSampler", "inputs": {}}}),
        status_endpoint: "https://app.example/api/update-run".to_string(),
        file_upload_endpoint: "https://app.example/api/file-upload".to_string(),
    }
}

pub fn request(prompt_id: &str) -> JobRequest {
    input(prompt_id).into_request()
}

pub async fn mock_health(server: &mut ServerGuard, status: usize) -> Mock {
    server
        .mock("GET", "/")
        .with_status(status)
        .create_async()
        .await
}

pub async fn mock_run(server: &mut ServerGuard, prompt_id: &str) -> Mock {
    server
        .mock("POST", "/comfyui-deploy/run")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "prompt_id": prompt_id }).to_string())
        .create_async()
        .await
}

pub async fn mock_status(server: &mut ServerGuard, prompt_id: &str, status: &str) -> Mock {
    server
        .mock("GET", "/comfyui-deploy/check-status")
        .match_query(Matcher::UrlEncoded("prompt_id".into(), prompt_id.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "status": status }).to_string())
        .create_async()
        .await
}

/// Number of live processes whose command line contains `marker`.
///
/// Reaped children disappear from `/proc`; zombies have an empty
/// command line, so neither is counted.
pub fn live_processes(marker: &str) -> usize {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            std::fs::read(entry.path().join("cmdline"))
                .map(|raw| String::from_utf8_lossy(&raw).contains(marker))
                .unwrap_or(false)
        })
        .count()
}

/// Poll until no live process matches `marker`, for up to two seconds.
/// Returns the count left at the end.
///
/// Orphaned grandchildren are reaped by init, not by us, so they can
/// linger briefly after a kill.
pub async fn wait_until_gone(marker: &str) -> usize {
    for _ in 0..100 {
        if live_processes(marker) == 0 {
            return 0;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    live_processes(marker)
}

/// A launcher script that backgrounds the long-lived child carrying
/// `marker`, the way `/start.sh` launches ComfyUI.
pub fn launcher(marker: &str) -> String {
    format!("sleep {marker} & wait")
}
