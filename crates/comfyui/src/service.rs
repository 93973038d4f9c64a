//! The seam between the supervisor and a concrete subordinate service.

use async_trait::async_trait;
use comfyrun_core::job::JobRequest;

use crate::api::{ComfyDeployApi, ComfyDeployApiError, StatusReport};

/// Operations the supervisor needs from the service it drives.
///
/// [`ComfyDeployApi`] is the production implementation. Tests substitute
/// scripted fakes to exercise the polling loops deterministically.
#[async_trait]
pub trait SubordinateService: Send + Sync {
    /// Lightweight readiness probe.
    async fn probe(&self) -> Result<(), ComfyDeployApiError>;

    /// Submit one job. Returns the raw response body.
    async fn submit(&self, request: &JobRequest) -> Result<serde_json::Value, ComfyDeployApiError>;

    /// Query the status of a previously submitted job.
    async fn status(&self, job_id: &str) -> Result<StatusReport, ComfyDeployApiError>;
}

#[async_trait]
impl SubordinateService for ComfyDeployApi {
    async fn probe(&self) -> Result<(), ComfyDeployApiError> {
        self.health_check().await
    }

    async fn submit(&self, request: &JobRequest) -> Result<serde_json::Value, ComfyDeployApiError> {
        self.run(request).await
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport, ComfyDeployApiError> {
        self.check_status(job_id).await
    }
}
