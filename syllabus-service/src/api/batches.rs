//! Batch ingestion API endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::db::JobItem;
use crate::error::ServiceError;
use crate::service::{BatchSubmission, BatchSubmitted};

use super::{AppState, CancelResponse, JobStatusResponse};

/// Submit papers for ingestion. Duplicates are dropped; 409 if nothing is left.
pub async fn submit_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<BatchSubmission>,
) -> Result<(StatusCode, Json<BatchSubmitted>), ServiceError> {
    let submitted = state.service.submit_batch(submission)?;
    Ok((StatusCode::ACCEPTED, Json(submitted)))
}

pub async fn batch_status_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ServiceError> {
    let job = state.service.batch_status(&job_id)?;
    Ok(Json(job.into()))
}

pub async fn batch_items_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<JobItem>>, ServiceError> {
    Ok(Json(state.service.batch_items(&job_id)?))
}

pub async fn cancel_batch_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ServiceError> {
    state.service.cancel_batch(&job_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            cancelled: true,
        }),
    ))
}
