//! Scripted [`SubordinateService`] used by the supervisor tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use comfyrun_comfyui::api::{ComfyDeployApiError, StatusReport};
use comfyrun_comfyui::service::SubordinateService;
use comfyrun_core::job::JobRequest;
use comfyrun_core::retry::RetryPolicy;
use serde_json::json;

/// One scripted answer to a status poll.
#[derive(Debug, Clone, Copy)]
pub enum Poll {
    Status(&'static str),
    NoStatusField,
    TransportError,
}

/// Fake service whose behaviour is fixed up front.
///
/// * Probes fail until the `ready_on`-th probe (1-based); `None` never.
/// * Submission returns the configured body (default `{"prompt_id": ...}`).
/// * Status polls walk `polls`, repeating the last entry once exhausted.
pub struct FakeService {
    ready_on: Option<u32>,
    submit_body: Mutex<Option<Result<serde_json::Value, ComfyDeployApiError>>>,
    polls: Vec<Poll>,
    pub probe_count: AtomicU32,
    pub submit_count: AtomicU32,
    pub poll_count: AtomicU32,
    last_polled: Mutex<Option<String>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            ready_on: Some(1),
            submit_body: Mutex::new(None),
            polls: vec![Poll::Status("success")],
            probe_count: AtomicU32::new(0),
            submit_count: AtomicU32::new(0),
            poll_count: AtomicU32::new(0),
            last_polled: Mutex::new(None),
        }
    }

    pub fn ready_on(mut self, probe: Option<u32>) -> Self {
        self.ready_on = probe;
        self
    }

    pub fn submit_returns(self, result: Result<serde_json::Value, ComfyDeployApiError>) -> Self {
        *self.submit_body.lock().unwrap() = Some(result);
        self
    }

    pub fn polls(mut self, polls: &[Poll]) -> Self {
        self.polls = polls.to_vec();
        self
    }

    pub fn probes(&self) -> u32 {
        self.probe_count.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> u32 {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn last_polled(&self) -> Option<String> {
        self.last_polled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubordinateService for FakeService {
    async fn probe(&self) -> Result<(), ComfyDeployApiError> {
        let n = self.probe_count.fetch_add(1, Ordering::SeqCst) + 1;
        match self.ready_on {
            Some(ready) if n >= ready => Ok(()),
            _ => Err(ComfyDeployApiError::ApiError {
                status: 502,
                body: "booting".to_string(),
            }),
        }
    }

    async fn submit(&self, request: &JobRequest) -> Result<serde_json::Value, ComfyDeployApiError> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        match self.submit_body.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(json!({ "prompt_id": request.job_id })),
        }
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport, ComfyDeployApiError> {
        *self.last_polled.lock().unwrap() = Some(job_id.to_string());
        let n = self.poll_count.fetch_add(1, Ordering::SeqCst) as usize;
        let step = self.polls[n.min(self.polls.len() - 1)];
        match step {
            Poll::Status(s) => Ok(StatusReport {
                status: Some(s.to_string()),
            }),
            Poll::NoStatusField => Ok(StatusReport { status: None }),
            Poll::TransportError => Err(ComfyDeployApiError::ApiError {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }
}

pub fn request() -> JobRequest {
    JobRequest {
        job_id: "7c0e6a4e-run".to_string(),
        payload: json!({"3": {"class_type": "KSampler", "inputs": {"seed": 1}}}),
        status_endpoint: "https://app.example/api/update-run".to_string(),
        upload_endpoint: "https://app.example/api/file-upload".to_string(),
    }
}

/// Policy with a small real interval; tests run with paused time.
pub fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(100)).unwrap()
}
