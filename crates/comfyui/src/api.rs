//! REST client for the `comfyui-deploy` HTTP endpoints.
//!
//! Wraps the three routes the supervisor needs (readiness probe,
//! workflow submission, status check) using [`reqwest`].

use std::time::Duration;

use comfyrun_core::endpoint::ServiceEndpoint;
use comfyrun_core::job::JobRequest;
use serde::Deserialize;

/// Per-request timeout for the readiness probe. The server either
/// answers the index page quickly or is not up yet.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-request timeout for submission and status calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client bound to one subordinate ComfyUI instance.
pub struct ComfyDeployApi {
    client: reqwest::Client,
    endpoint: ServiceEndpoint,
}

/// Body of the `check-status` response. Only `status` is interpreted;
/// the deploy node may add other fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub status: Option<String>,
}

/// Errors from the deploy REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyDeployApiError {
    /// The HTTP request itself failed (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned an unexpected status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A success response whose body is not the expected JSON.
    #[error("Undecodable response body: {0}")]
    Decode(String),
}

impl ComfyDeployApi {
    /// Create a new API client for the given endpoint.
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Readiness probe: `GET <health-path>` must answer `200 OK`.
    pub async fn health_check(&self) -> Result<(), ComfyDeployApiError> {
        let response = self
            .client
            .get(self.endpoint.health_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ComfyDeployApiError::ApiError {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }

    /// Queue a workflow.
    ///
    /// Sends `POST <run-path>` with the serialized [`JobRequest`] and
    /// returns the decoded JSON body. Extracting `prompt_id` is left to
    /// the caller so a missing field can be reported distinctly.
    pub async fn run(&self, request: &JobRequest) -> Result<serde_json::Value, ComfyDeployApiError> {
        let response = self
            .client
            .post(self.endpoint.run_url())
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Query the status of a queued workflow.
    ///
    /// Sends `GET <status-path>?prompt_id=<id>`.
    pub async fn check_status(&self, prompt_id: &str) -> Result<StatusReport, ComfyDeployApiError> {
        let response = self
            .client
            .get(self.endpoint.status_url())
            .query(&[("prompt_id", prompt_id)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyDeployApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyDeployApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyDeployApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// The body is read as text first so that a malformed body is
    /// reported as [`ComfyDeployApiError::Decode`] rather than as a
    /// transport failure.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyDeployApiError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ComfyDeployApiError::Decode(format!("{e}: {text}")))
    }
}
