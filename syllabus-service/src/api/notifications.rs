//! Notification API endpoints.

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use crate::db::Notification;
use crate::error::ServiceError;

use super::AppState;

/// The notification mirroring a batch job.
pub async fn job_notification_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Notification>, ServiceError> {
    Ok(Json(state.service.notification_for_job(&job_id)?))
}
