//! Job types exchanged with the subordinate generation service.
//!
//! A [`JobRequest`] is built once per invocation from the inbound
//! [`RunInput`], submitted exactly once, and then tracked through a
//! [`JobHandle`] until a terminal [`JobStatus`] is observed.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Wire value for a successfully completed job.
pub const STATUS_SUCCESS: &str = "success";

/// Wire value for a job that finished with an error.
pub const STATUS_FAILED: &str = "failed";

/// Wire value for any job that has not reached a terminal state.
pub const STATUS_PENDING: &str = "pending";

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Classification of a status poll.
///
/// `Success` and `Failed` are terminal. The subordinate service reports
/// several intermediate states (`not-started`, `running`, `uploading`);
/// all of them, and anything unrecognised, collapse into `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Success,
    Failed,
}

impl JobStatus {
    /// Classify a raw status string as reported by the service.
    pub fn from_wire(value: &str) -> Self {
        match value {
            STATUS_SUCCESS => Self::Success,
            STATUS_FAILED => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => STATUS_PENDING,
            Self::Success => STATUS_SUCCESS,
            Self::Failed => STATUS_FAILED,
        }
    }

    /// Whether polling must stop once this status is observed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunInput
// ---------------------------------------------------------------------------

/// The `input` object accepted by `POST /run`.
///
/// `prompt_id` is normally assigned by the caller (it is the key the
/// caller's status callback uses). When omitted, one is generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    #[serde(default)]
    pub prompt_id: Option<String>,
    pub workflow_api: serde_json::Value,
    pub status_endpoint: String,
    pub file_upload_endpoint: String,
}

impl RunInput {
    /// Reject inputs the subordinate service could never execute.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(id) = &self.prompt_id {
            if id.trim().is_empty() {
                return Err(CoreError::Validation(
                    "prompt_id must not be empty".to_string(),
                ));
            }
        }
        validate_payload(&self.workflow_api)
    }

    /// Convert into a [`JobRequest`], assigning a UUID v4 `job_id` when
    /// the caller did not provide one.
    pub fn into_request(self) -> JobRequest {
        let job_id = self
            .prompt_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        JobRequest {
            job_id,
            payload: self.workflow_api,
            status_endpoint: self.status_endpoint,
            upload_endpoint: self.file_upload_endpoint,
        }
    }
}

/// Envelope of `POST /run`: `{ "input": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub input: RunInput,
}

// ---------------------------------------------------------------------------
// JobRequest / JobHandle
// ---------------------------------------------------------------------------

/// One unit of work for the subordinate service.
///
/// Serializes to the body expected by the `comfyui-deploy` run endpoint.
/// The two endpoints are passed through unexamined; the service uses them
/// to report progress and upload outputs directly to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "prompt_id")]
    pub job_id: String,
    #[serde(rename = "workflow_api")]
    pub payload: serde_json::Value,
    pub status_endpoint: String,
    #[serde(rename = "file_upload_endpoint")]
    pub upload_endpoint: String,
}

impl JobRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.job_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "job_id must not be empty".to_string(),
            ));
        }
        validate_payload(&self.payload)
    }
}

/// Handle to an accepted job, keyed by the id the service echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub job_id: String,
}

/// A workflow payload must be a JSON object with at least one node.
fn validate_payload(payload: &serde_json::Value) -> Result<(), CoreError> {
    match payload.as_object() {
        Some(nodes) if !nodes.is_empty() => Ok(()),
        Some(_) => Err(CoreError::Validation(
            "workflow_api must contain at least one node".to_string(),
        )),
        None => Err(CoreError::Validation(
            "workflow_api must be a JSON object".to_string(),
        )),
    }
}
