//! Dead-letter administration (admin only).

use crate::error::AppError;
use crate::extractors::{AppPath, AppQuery, CurrentCaller};
use crate::state::AppState;
use axum::{Json, extract::State};
use orderdesk_core::queue::{DeadLetter, JobId};
use orderdesk_core::types::Caller;
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Query of `GET /admin/jobs/dead`.
#[derive(Debug, Default, Deserialize)]
pub struct DeadJobsQuery {
    /// Maximum rows (default 50, capped at 500).
    pub limit: Option<usize>,
}

/// Body of `GET /admin/jobs/dead`.
#[derive(Debug, Serialize)]
pub struct DeadJobsResponse {
    /// Dead jobs, most recent first.
    pub jobs: Vec<DeadLetter>,
}

/// Body of `POST /admin/jobs/:id/requeue`.
#[derive(Debug, Serialize)]
pub struct RequeueResponse {
    /// Summary message.
    pub message: String,
    /// The requeued job.
    pub job_id: JobId,
}

fn require_admin(caller: &Caller) -> Result<(), AppError> {
    if caller.role.is_privileged() {
        Ok(())
    } else {
        tracing::warn!(caller_id = %caller.id, "Non-admin caller attempted job administration");
        Err(AppError::forbidden("Admin role required"))
    }
}

/// `GET /admin/jobs/dead`
///
/// # Errors
///
/// 403 for non-admin callers; 500 if the queue is unavailable.
pub async fn list_dead_jobs(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    AppQuery(query): AppQuery<DeadJobsQuery>,
) -> Result<Json<DeadJobsResponse>, AppError> {
    require_admin(&caller)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let jobs = state.queue.dead_letters(limit).await?;
    Ok(Json(DeadJobsResponse { jobs }))
}

/// `POST /admin/jobs/:id/requeue`
///
/// # Errors
///
/// 403 for non-admin callers; 404 if no dead job has this id.
pub async fn requeue_job(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    AppPath(id): AppPath<i64>,
) -> Result<Json<RequeueResponse>, AppError> {
    require_admin(&caller)?;
    let job_id = JobId::new(id);
    state.queue.requeue(job_id).await?;

    tracing::info!(caller_id = %caller.id, job_id = %job_id, "Dead job requeued");
    Ok(Json(RequeueResponse {
        message: format!("Job {job_id} requeued"),
        job_id,
    }))
}
