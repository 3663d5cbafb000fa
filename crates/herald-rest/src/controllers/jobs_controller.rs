//! Job status controller.

use crate::responses::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use herald_jobs::{JobId, JobStatusView};

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new().route("/jobs/:job_id", get(get_job))
}

/// Job status. Unknown and expired ids answer `200` with `not_found`.
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let view = state
        .notifications
        .get_job_status(&JobId::from(job_id))
        .await?;
    Ok(Json(view))
}
