//! Shared response envelope types for API handlers.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Body of an accepted `POST /run`.
#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}
