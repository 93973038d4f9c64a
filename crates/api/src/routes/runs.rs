use axum::routing::{get, post};
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

/// Job routes.
///
/// ```text
/// /run                    submit (POST)
/// /runs/{prompt_id}       outcome of a dispatched run (GET)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", post(runs::submit_run))
        .route("/runs/{prompt_id}", get(runs::get_run))
}
