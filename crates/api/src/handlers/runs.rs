//! Handlers for job submission and run lookup.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use comfyrun_core::job::{RunRequest, STATUS_SUCCESS};
use comfyrun_worker::registry::RunRecord;

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, RunAccepted};
use crate::state::AppState;

/// POST /run
///
/// Validates the input and hands it to the dispatcher. Returns as soon as
/// the run is queued; the outcome is available from `GET /runs/{prompt_id}`.
/// In deploy-test mode the request is validated and acknowledged only.
pub async fn submit_run(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> AppResult<Json<RunAccepted>> {
    let Json(RunRequest { input }) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    if state.config.deploy_test {
        input.validate()?;
        tracing::info!(prompt_id = ?input.prompt_id, "Deploy test run acknowledged");
        return Ok(Json(RunAccepted {
            status: STATUS_SUCCESS,
            prompt_id: input.prompt_id,
        }));
    }

    let prompt_id = state.dispatcher.dispatch(input).await?;

    Ok(Json(RunAccepted {
        status: STATUS_SUCCESS,
        prompt_id: Some(prompt_id),
    }))
}

/// GET /runs/{prompt_id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> AppResult<Json<DataResponse<RunRecord>>> {
    let record = state
        .dispatcher
        .registry()
        .get(&prompt_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Run {prompt_id}")))?;

    Ok(Json(DataResponse { data: record }))
}
