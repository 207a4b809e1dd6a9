//! HTTP API for the syllabus service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Extraction runs with SSE progress
//! - Batch paper ingestion
//! - Job notifications

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::{BatchJob, ExtractionJob, JobStatus};
use crate::service::SyllabusService;

pub mod batches;
pub mod extractions;
pub mod notifications;

use batches::{
    batch_items_handler, batch_status_handler, cancel_batch_handler, submit_batch_handler,
};
use extractions::{
    cancel_extraction_handler, extraction_events_handler, extraction_status_handler,
    start_extraction_job_handler, stream_extraction_handler,
};
use notifications::job_notification_handler;

/// Application state
pub struct AppState {
    pub service: Arc<SyllabusService>,
    pub metrics: PrometheusHandle,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(service: Arc<SyllabusService>, metrics: PrometheusHandle) -> Router {
    let state = Arc::new(AppState {
        service,
        metrics,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Extraction endpoints
        .route("/extractions", post(stream_extraction_handler))
        .route("/extractions/jobs", post(start_extraction_job_handler))
        .route("/extractions/{job_id}", get(extraction_status_handler))
        .route("/extractions/{job_id}/events", get(extraction_events_handler))
        .route("/extractions/{job_id}/cancel", post(cancel_extraction_handler))
        // Batch endpoints
        .route("/batches", post(submit_batch_handler))
        .route("/batches/{job_id}", get(batch_status_handler))
        .route("/batches/{job_id}/items", get(batch_items_handler))
        .route("/batches/{job_id}/cancel", post(cancel_batch_handler))
        // Notification endpoints
        .route("/notifications/jobs/{job_id}", get(job_notification_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Poll response shared by extraction and batch jobs. For extraction jobs the items
/// are chunks.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ids: Option<Vec<i64>>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ExtractionJob> for JobStatusResponse {
    fn from(job: ExtractionJob) -> Self {
        let result_ids = (!job.result_ids.is_empty()).then_some(job.result_ids);
        Self {
            job_id: job.job_id,
            status: job.status,
            progress: job.progress,
            current_phase: job.phase,
            message: job.error_message.or(job.message),
            total_items: job.total_chunks,
            completed_items: job.completed_chunks,
            failed_items: job.failed_chunks,
            error_type: job.error_type,
            result_ids,
            started_at: job.started_at,
            updated_at: job.updated_at,
        }
    }
}

impl From<BatchJob> for JobStatusResponse {
    fn from(job: BatchJob) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            progress: job.progress,
            current_phase: job.current_phase,
            message: job.message,
            total_items: job.total_items,
            completed_items: job.completed_items,
            failed_items: job.failed_items,
            error_type: None,
            result_ids: None,
            started_at: job.started_at,
            updated_at: job.updated_at,
        }
    }
}

/// Response for cancel requests
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        knowledge_base_enabled: state.service.config.knowledge_base.is_some(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    knowledge_base_enabled: bool,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
