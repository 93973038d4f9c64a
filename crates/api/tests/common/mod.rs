#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use comfyrun_api::app::build_app;
use comfyrun_api::config::ServerConfig;
use comfyrun_api::state::AppState;
use comfyrun_core::profile::DeploymentProfile;
use comfyrun_core::retry::RetryPolicy;
use comfyrun_worker::config::WorkerConfig;
use comfyrun_worker::dispatcher::Dispatcher;
use comfyrun_worker::invocation::JobRunner;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// Worker config whose ComfyUI lives at `127.0.0.1:port` and is launched
/// with `command`. Budgets are small so failures surface quickly.
pub fn worker_config(port: u16, command: &[&str]) -> WorkerConfig {
    let mut config = WorkerConfig::for_profile(DeploymentProfile::Modal);
    config.platform.host = "127.0.0.1".to_string();
    config.platform.port = port;
    config.platform.working_dir = None;
    config.platform.command = command.iter().map(|s| s.to_string()).collect();
    config.reachability = RetryPolicy::new(10, Duration::from_millis(20)).unwrap();
    config.completion = RetryPolicy::new(10, Duration::from_millis(20)).unwrap();
    config.terminate_grace = Duration::from_secs(2);
    config
}

/// A worker whose ComfyUI binary does not exist.
pub fn broken_worker() -> WorkerConfig {
    worker_config(1, &["/nonexistent/comfyui/main"])
}

/// Build the full application router with all middleware layers.
///
/// Returns the dispatcher too so tests can inspect and shut it down.
pub fn build_test_app(config: ServerConfig, worker: WorkerConfig) -> (Router, Arc<Dispatcher>) {
    let dispatcher = Arc::new(Dispatcher::new(JobRunner::new(worker)));
    let state = AppState {
        config: Arc::new(config),
        dispatcher: Arc::clone(&dispatcher),
    };
    (build_app(state).unwrap(), dispatcher)
}

pub fn run_body(prompt_id: Option<&str>) -> Value {
    let mut input = json!({
        "workflow_api": {"3": {"class_type": "KSampler", "inputs": {}}},
        "status_endpoint": "https://app.example/api/update-run",
        "file_upload_endpoint": "https://app.example/api/file-upload",
    });
    if let Some(id) = prompt_id {
        input["prompt_id"] = json!(id);
    }
    json!({ "input": input })
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET /runs/{id}` until the run has finished or 10s pass.
pub async fn wait_for_finished(app: &Router, prompt_id: &str) -> Value {
    for _ in 0..500 {
        let response = get(app.clone(), &format!("/runs/{prompt_id}")).await;
        let json = body_json(response).await;
        let state = json["data"]["state"].as_str().unwrap_or_default();
        if !matches!(state, "queued" | "running") {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {prompt_id} did not finish");
}
