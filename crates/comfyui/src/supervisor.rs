//! Readiness and completion supervision for one job.
//!
//! The supervisor walks a single job through
//! `NotSubmitted -> Submitted -> {Succeeded | Failed}` and classifies
//! every other outcome as a [`SupervisorError`]:
//!
//! ```text
//! await_reachable ──false──> Unreachable
//!       │ true
//! submit_job ──────err─────> Submission | MalformedResponse | InvalidRequest
//!       │ JobHandle
//! await_completion ──err───> Timeout | Cancelled
//!       │
//!  success | failed
//! ```
//!
//! Retries happen only inside the two polling loops. Submission is a
//! single attempt; whether to resubmit is the caller's decision.

use std::convert::Infallible;

use comfyrun_core::error::CoreError;
use comfyrun_core::job::{JobHandle, JobRequest, JobStatus};
use comfyrun_core::retry::{retry_bounded, Attempt, RetryError, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::api::ComfyDeployApiError;
use crate::service::SubordinateService;

/// Name of the response field carrying the accepted job's id.
const JOB_ID_FIELD: &str = "prompt_id";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every way a supervised job can end without a terminal status.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The readiness budget ran out.
    #[error("Subordinate service unreachable after {attempts} attempts")]
    Unreachable { attempts: u32 },

    /// Transport failure or non-2xx response on submission.
    #[error("Error queuing workflow: {0}")]
    Submission(#[source] ComfyDeployApiError),

    /// A response lacked a required field or was not valid JSON.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The completion budget ran out. The job may still be running.
    #[error("Max retries reached while waiting for image generation ({attempts} polls)")]
    Timeout { attempts: u32 },

    /// The subordinate process exited before becoming ready.
    #[error("Subordinate process exited unexpectedly with code {code:?}")]
    ProcessExit { code: Option<i32> },

    /// The subordinate process could not be launched.
    #[error("Failed to launch subordinate process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The job request was rejected before submission.
    #[error(transparent)]
    InvalidRequest(#[from] CoreError),

    /// The invocation was cancelled between attempts.
    #[error("Cancelled")]
    Cancelled,
}

impl SupervisorError {
    /// Stable snake_case label, used for run records and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
            Self::Submission(_) => "submission_failed",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Timeout { .. } => "timed_out",
            Self::ProcessExit { .. } => "process_exited",
            Self::Spawn(_) => "spawn_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Probe `service` until it answers or the budget runs out.
///
/// Returns `true` on the first successful probe. Probe failures are
/// expected while the server boots and are only logged at debug level.
/// Cancellation is reported as `false`.
pub async fn await_reachable<S>(
    service: &S,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> bool
where
    S: SubordinateService + ?Sized,
{
    let result = retry_bounded::<_, Infallible, _, _>(policy, cancel, |attempt| async move {
        match service.probe().await {
            Ok(()) => Attempt::Done(attempt),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Readiness probe failed");
                Attempt::Retry
            }
        }
    })
    .await;

    match result {
        Ok(attempts) => {
            tracing::info!(attempts, "Subordinate service is reachable");
            true
        }
        Err(RetryError::Exhausted { attempts }) => {
            tracing::warn!(attempts, "Subordinate service did not become reachable");
            false
        }
        Err(RetryError::Cancelled) => {
            tracing::info!("Readiness wait cancelled");
            false
        }
        Err(RetryError::Aborted(never)) => match never {},
    }
}

/// Submit `request` exactly once.
///
/// Fails with [`SupervisorError::MalformedResponse`] when the response
/// does not carry a non-empty string `prompt_id`; no partial handle is
/// ever returned.
pub async fn submit_job<S>(service: &S, request: &JobRequest) -> Result<JobHandle, SupervisorError>
where
    S: SubordinateService + ?Sized,
{
    request.validate()?;

    let body = service.submit(request).await.map_err(|e| match e {
        ComfyDeployApiError::Decode(msg) => SupervisorError::MalformedResponse(msg),
        other => SupervisorError::Submission(other),
    })?;

    let job_id = body
        .get(JOB_ID_FIELD)
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            SupervisorError::MalformedResponse(format!(
                "submission response is missing '{JOB_ID_FIELD}': {body}"
            ))
        })?;

    tracing::info!(prompt_id = %job_id, "Queued workflow");

    Ok(JobHandle {
        job_id: job_id.to_string(),
    })
}

/// Poll the job's status until it is terminal or the budget runs out.
///
/// A poll that fails (transport error, bad status code, undecodable
/// body) uses up one attempt but does not end the loop.
pub async fn await_completion<S>(
    service: &S,
    handle: &JobHandle,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<JobStatus, SupervisorError>
where
    S: SubordinateService + ?Sized,
{
    let job_id = handle.job_id.as_str();

    let result = retry_bounded::<_, Infallible, _, _>(policy, cancel, |attempt| async move {
        match service.status(job_id).await {
            Ok(report) => {
                let status = JobStatus::from_wire(report.status.as_deref().unwrap_or_default());
                if status.is_terminal() {
                    Attempt::Done(status)
                } else {
                    tracing::trace!(
                        prompt_id = %job_id,
                        attempt,
                        reported = ?report.status,
                        "Job still pending",
                    );
                    Attempt::Retry
                }
            }
            Err(e) => {
                tracing::warn!(prompt_id = %job_id, attempt, error = %e, "Status poll failed");
                Attempt::Retry
            }
        }
    })
    .await;

    match result {
        Ok(status) => {
            tracing::info!(prompt_id = %job_id, %status, "Job reached terminal status");
            Ok(status)
        }
        Err(RetryError::Exhausted { attempts }) => {
            tracing::warn!(prompt_id = %job_id, attempts, "Gave up waiting for job");
            Err(SupervisorError::Timeout { attempts })
        }
        Err(RetryError::Cancelled) => Err(SupervisorError::Cancelled),
        Err(RetryError::Aborted(never)) => match never {},
    }
}

/// Reachability, then submission, then completion.
///
/// Each step starts only once the previous one has a definite outcome.
/// If the service never becomes reachable nothing is submitted.
pub async fn run_job<S>(
    service: &S,
    request: &JobRequest,
    reachability: &RetryPolicy,
    completion: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<JobStatus, SupervisorError>
where
    S: SubordinateService + ?Sized,
{
    if !await_reachable(service, reachability, cancel).await {
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }
        return Err(SupervisorError::Unreachable {
            attempts: reachability.max_attempts(),
        });
    }

    let handle = submit_job(service, request).await?;
    await_completion(service, &handle, completion, cancel).await
}
