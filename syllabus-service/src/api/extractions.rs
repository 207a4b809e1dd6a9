//! Extraction API endpoints.
//!
//! A run is either streamed over SSE for the life of the request, or started detached
//! and followed by polling. Reconnecting clients get one snapshot event.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::ServiceError;
use crate::pipeline::events::ExtractionEvent;
use crate::service::ExtractionRequest;

use super::{AppState, CancelResponse, JobStatusResponse};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Response for a detached start
#[derive(Serialize)]
pub struct ExtractionJobResponse {
    pub job_id: String,
}

fn to_sse_event(event: &ExtractionEvent) -> Event {
    Event::default()
        .event(event.event_type.as_ref())
        .data(event.to_json())
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping")
}

/// Start a run and stream its events until the terminal one.
pub async fn stream_extraction_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractionRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let started = state.service.start_extraction(request)?;
    debug!(job_id = %started.job_id, "Streaming extraction events");

    let stream = ReceiverStream::new(started.events)
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

/// Start a run without holding the connection open.
pub async fn start_extraction_job_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractionRequest>,
) -> Result<(StatusCode, Json<ExtractionJobResponse>), ServiceError> {
    let started = state.service.start_extraction(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExtractionJobResponse {
            job_id: started.job_id,
        }),
    ))
}

/// Reconnect: the current snapshot as a single event, then the stream closes.
pub async fn extraction_events_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let snapshot = state.service.extraction_snapshot(&job_id)?;
    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(to_sse_event(&snapshot));
    };
    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

pub async fn extraction_status_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ServiceError> {
    let job = state.service.extraction_status(&job_id)?;
    Ok(Json(job.into()))
}

pub async fn cancel_extraction_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ServiceError> {
    state.service.cancel_extraction(&job_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            cancelled: true,
        }),
    ))
}
