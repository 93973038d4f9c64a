//! In-memory record of dispatched runs.
//!
//! `POST /run` returns before the job executes, so this is where a
//! caller (or an operator) can see how a run ended. The registry is
//! bounded; once full, the oldest finished record is evicted first.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use comfyrun_comfyui::supervisor::SupervisorError;
use comfyrun_core::error::CoreError;
use comfyrun_core::job::JobStatus;
use serde::Serialize;
use tokio::sync::RwLock;

/// Default number of run records retained.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 1024;

/// Lifecycle of a dispatched run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Success,
    Failed,
    Unreachable,
    SubmissionFailed,
    MalformedResponse,
    TimedOut,
    ProcessExited,
    SpawnFailed,
    InvalidRequest,
    Cancelled,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Classify the outcome of an invocation.
    pub fn from_outcome(outcome: &Result<JobStatus, SupervisorError>) -> Self {
        match outcome {
            Ok(JobStatus::Success) => Self::Success,
            // The supervisor only returns terminal statuses.
            Ok(JobStatus::Failed | JobStatus::Pending) => Self::Failed,
            Err(SupervisorError::Unreachable { .. }) => Self::Unreachable,
            Err(SupervisorError::Submission(_)) => Self::SubmissionFailed,
            Err(SupervisorError::MalformedResponse(_)) => Self::MalformedResponse,
            Err(SupervisorError::Timeout { .. }) => Self::TimedOut,
            Err(SupervisorError::ProcessExit { .. }) => Self::ProcessExited,
            Err(SupervisorError::Spawn(_)) => Self::SpawnFailed,
            Err(SupervisorError::InvalidRequest(_)) => Self::InvalidRequest,
            Err(SupervisorError::Cancelled) => Self::Cancelled,
        }
    }
}

/// What is known about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub prompt_id: String,
    pub state: RunState,
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct Inner {
    records: HashMap<String, RunRecord>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

pub struct RunRegistry {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record a newly dispatched run. A finished record with the same id
    /// is replaced; a queued or running one is a conflict.
    pub async fn insert_queued(&self, prompt_id: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.records.get(prompt_id) {
            if !existing.state.is_finished() {
                return Err(CoreError::Conflict(format!(
                    "Run '{prompt_id}' is still active"
                )));
            }
            inner.order.retain(|id| id != prompt_id);
        }

        inner.records.insert(
            prompt_id.to_string(),
            RunRecord {
                prompt_id: prompt_id.to_string(),
                state: RunState::Queued,
                error: None,
                queued_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
        );
        inner.order.push_back(prompt_id.to_string());

        while inner.records.len() > self.capacity {
            let victim = inner
                .order
                .iter()
                .position(|id| inner.records.get(id).is_some_and(|r| r.state.is_finished()))
                .unwrap_or(0);
            if let Some(id) = inner.order.remove(victim) {
                inner.records.remove(&id);
            }
        }

        Ok(())
    }

    pub async fn mark_running(&self, prompt_id: &str) {
        if let Some(record) = self.inner.write().await.records.get_mut(prompt_id) {
            record.state = RunState::Running;
            record.started_at = Some(Utc::now());
        }
    }

    /// Store the final outcome of a run.
    pub async fn finish(&self, prompt_id: &str, outcome: &Result<JobStatus, SupervisorError>) {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.records.get_mut(prompt_id) else {
            tracing::debug!(prompt_id, "Run record already evicted");
            return;
        };

        record.state = RunState::from_outcome(outcome);
        record.error = outcome.as_ref().err().map(ToString::to_string);
        record.finished_at = Some(Utc::now());
    }

    pub async fn get(&self, prompt_id: &str) -> Option<RunRecord> {
        self.inner.read().await.records.get(prompt_id).cloned()
    }

    /// Runs queued or in progress.
    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|r| !r.state.is_finished())
            .count()
    }
}
