//! Background dispatch: admission, outcome recording and shutdown.

#![cfg(target_os = "linux")]

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use comfyrun_core::error::CoreError;
use comfyrun_core::retry::RetryPolicy;
use comfyrun_worker::dispatcher::Dispatcher;
use comfyrun_worker::invocation::JobRunner;
use comfyrun_worker::registry::{RunRegistry, RunState};
use common::{
    config, input, keep_warm, live_processes, mock_health, mock_run, mock_status, sleeper,
};
use mockito::Server;
use serde_json::json;

/// Poll the registry until the run reaches `predicate` or 10s pass.
async fn wait_for_state<P>(registry: &RunRegistry, prompt_id: &str, predicate: P) -> RunState
where
    P: Fn(RunState) -> bool,
{
    for _ in 0..500 {
        if let Some(record) = registry.get(prompt_id).await {
            if predicate(record.state) {
                return record.state;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {prompt_id} did not reach the expected state");
}

#[tokio::test]
async fn dispatch_returns_before_run_completes() {
    let marker = "32.0201";
    let mut server = Server::new_async().await;
    mock_health(&mut server, 200).await;
    mock_run(&mut server, "d-1").await;
    mock_status(&mut server, "d-1", "success").await;

    let dispatcher = Dispatcher::new(JobRunner::new(config(&server, &sleeper(marker))));
    let prompt_id = dispatcher.dispatch(input("d-1")).await.unwrap();

    assert_eq!(prompt_id, "d-1");
    let record = dispatcher.registry().get("d-1").await.unwrap();
    assert!(!record.state.is_finished());

    let state = wait_for_state(dispatcher.registry(), "d-1", |s| s.is_finished()).await;
    assert_eq!(state, RunState::Success);

    let record = dispatcher.registry().get("d-1").await.unwrap();
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    assert_eq!(live_processes(marker), 0);
}

#[tokio::test]
async fn invalid_input_is_rejected_synchronously() {
    let server = Server::new_async().await;
    let dispatcher = Dispatcher::new(JobRunner::new(config(&server, &sleeper("32.0202"))));

    let mut bad = input("d-2");
    bad.workflow_api = json!("not a workflow");

    assert_matches!(dispatcher.dispatch(bad).await, Err(CoreError::Validation(_)));
    assert!(dispatcher.registry().get("d-2").await.is_none());
}

#[tokio::test]
async fn missing_prompt_id_is_generated() {
    let server = Server::new_async().await;
    let mut config = config(&server, "unused");
    config.platform.command = vec!["/nonexistent/comfyui/main".to_string()];
    let dispatcher = Dispatcher::new(JobRunner::new(config));

    let mut anonymous = input("ignored");
    anonymous.prompt_id = None;
    let prompt_id = dispatcher.dispatch(anonymous).await.unwrap();

    assert_eq!(prompt_id.len(), 36);
    assert!(dispatcher.registry().get(&prompt_id).await.is_some());
}

#[tokio::test]
async fn spawn_failure_is_recorded() {
    let server = Server::new_async().await;
    let mut config = config(&server, "unused");
    config.platform.command = vec!["/nonexistent/comfyui/main".to_string()];
    let dispatcher = Dispatcher::new(JobRunner::new(config));

    dispatcher.dispatch(input("d-4")).await.unwrap();

    let state = wait_for_state(dispatcher.registry(), "d-4", |s| s.is_finished()).await;
    assert_eq!(state, RunState::SpawnFailed);
    let record = dispatcher.registry().get("d-4").await.unwrap();
    assert!(record.error.unwrap().contains("Failed to launch"));
}

#[tokio::test]
async fn admission_bound_queues_excess_runs() {
    let marker = "32.0205";
    let mut server = Server::new_async().await;
    mock_health(&mut server, 200).await;
    mock_run(&mut server, "first").await;
    mock_status(&mut server, "first", "running").await;

    let mut config = config(&server, &sleeper(marker));
    config.completion = RetryPolicy::new(1000, Duration::from_millis(20)).unwrap();
    let dispatcher = Dispatcher::new(JobRunner::new(config));

    dispatcher.dispatch(input("first")).await.unwrap();
    wait_for_state(dispatcher.registry(), "first", |s| s == RunState::Running).await;
    dispatcher.dispatch(input("second")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        dispatcher.registry().get("second").await.unwrap().state,
        RunState::Queued
    );
    assert_eq!(dispatcher.registry().active_count().await, 2);

    dispatcher.shutdown(Duration::from_secs(5)).await;

    for id in ["first", "second"] {
        assert_eq!(
            dispatcher.registry().get(id).await.unwrap().state,
            RunState::Cancelled,
            "{id}"
        );
    }
    assert_eq!(live_processes(marker), 0);
}

#[tokio::test]
async fn active_prompt_id_cannot_be_dispatched_twice() {
    let marker = "32.0207";
    let mut server = Server::new_async().await;
    mock_health(&mut server, 200).await;
    let run = server
        .mock("POST", "/comfyui-deploy/run")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "prompt_id": "dup" }).to_string())
        .expect(1)
        .create_async()
        .await;
    mock_status(&mut server, "dup", "running").await;

    let mut config = keep_warm(config(&server, &sleeper(marker)), 1);
    config.completion = RetryPolicy::new(1000, Duration::from_millis(20)).unwrap();
    let dispatcher = Dispatcher::new(JobRunner::new(config));

    dispatcher.dispatch(input("dup")).await.unwrap();
    wait_for_state(dispatcher.registry(), "dup", |s| s == RunState::Running).await;

    assert_matches!(
        dispatcher.dispatch(input("dup")).await,
        Err(CoreError::Conflict(_))
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let record = dispatcher.registry().get("dup").await.unwrap();
    assert_eq!(record.state, RunState::Running);
    assert!(record.started_at.is_some());
    assert_eq!(dispatcher.registry().active_count().await, 1);

    dispatcher.shutdown(Duration::from_secs(5)).await;
    run.assert_async().await;
    assert_eq!(live_processes(marker), 0);
}

#[tokio::test]
async fn dispatch_after_shutdown_is_refused() {
    let server = Server::new_async().await;
    let dispatcher = Dispatcher::new(JobRunner::new(config(&server, &sleeper("32.0206"))));

    dispatcher.shutdown(Duration::from_secs(1)).await;

    assert_matches!(
        dispatcher.dispatch(input("late")).await,
        Err(CoreError::Internal(_))
    );
}
