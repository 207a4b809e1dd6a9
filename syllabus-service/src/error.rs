use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Notification not found for job {job_id}")]
    NotificationNotFound { job_id: String },

    #[error("An extraction job is already running for target {target_key} ({job_id})")]
    Conflict { target_key: String, job_id: String },

    #[error("All items already exist for target {target_key}")]
    AlreadyExists { target_key: String },

    #[error("Job {job_id} is already finished")]
    JobFinished { job_id: String },

    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Closed set of failure kinds, as reported in progress events and metrics.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Llm,
    Validation,
    Database,
    Pdf,
    Cancelled,
}

/// Failure of one unit of work (a chunk or a batch item).
///
/// Retry policy dispatches on [`ExtractionError::is_recoverable`], never on the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Network error: {message}")]
    Network { message: String, recoverable: bool },

    #[error("Timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Inference request failed: {message}")]
    Llm {
        status: Option<u16>,
        message: String,
        recoverable: bool,
    },

    #[error("Malformed structured output: {message}")]
    MalformedOutput { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Document error: {message}")]
    Pdf { message: String },

    #[error("Cancelled before start")]
    Cancelled,
}

impl ExtractionError {
    pub fn timeout(after: Duration) -> Self {
        ExtractionError::Timeout {
            elapsed_ms: after.as_millis() as u64,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractionError::Network { .. } => ErrorKind::Network,
            ExtractionError::Timeout { .. } => ErrorKind::Timeout,
            ExtractionError::Llm { .. } => ErrorKind::Llm,
            ExtractionError::MalformedOutput { .. } | ExtractionError::Validation { .. } => {
                ErrorKind::Validation
            }
            ExtractionError::Database { .. } => ErrorKind::Database,
            ExtractionError::Pdf { .. } => ErrorKind::Pdf,
            ExtractionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            ExtractionError::Network { recoverable, .. }
            | ExtractionError::Llm { recoverable, .. } => *recoverable,
            ExtractionError::Timeout { .. } | ExtractionError::MalformedOutput { .. } => true,
            ExtractionError::Validation { .. }
            | ExtractionError::Database { .. }
            | ExtractionError::Pdf { .. }
            | ExtractionError::Cancelled => false,
        }
    }
}

impl From<DatabaseError> for ExtractionError {
    fn from(err: DatabaseError) -> Self {
        ExtractionError::Database {
            message: format_error_chain_ref(&err),
        }
    }
}

impl From<InferenceError> for ExtractionError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Connection { source, .. } if source.is_timeout() => {
                ExtractionError::Timeout { elapsed_ms: 0 }
            }
            InferenceError::Connection { url, source } => ExtractionError::Network {
                message: format!("{url}: {}", format_error_chain_ref(&source)),
                recoverable: true,
            },
            InferenceError::Http { status, message } => ExtractionError::Llm {
                status: Some(status),
                message,
                recoverable: status == 429 || status >= 500,
            },
            InferenceError::EmptyResponse => ExtractionError::Llm {
                status: None,
                message: "response contained no choices".to_string(),
                recoverable: true,
            },
            InferenceError::InvalidResponse { source } => ExtractionError::Llm {
                status: None,
                message: source.to_string(),
                recoverable: true,
            },
            InferenceError::Schema { message } => ExtractionError::MalformedOutput { message },
        }
    }
}

/// Inference service client errors
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Connection failed to inference service at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Inference request failed (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Inference response contained no choices")]
    EmptyResponse,

    #[error("Invalid response from inference service")]
    InvalidResponse {
        #[source]
        source: reqwest::Error,
    },

    #[error("Response did not match the extraction schema: {message}")]
    Schema { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Render an error and all of its sources as `outer: inner: root`.
pub fn format_error_chain_ref(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::JobNotFound { .. } | ServiceError::NotificationNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::Conflict { .. }
            | ServiceError::AlreadyExists { .. }
            | ServiceError::JobFinished { .. } => StatusCode::CONFLICT,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Extraction(e) if e.kind() == ErrorKind::Validation => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Extraction(e) if e.kind() == ErrorKind::Network => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::JobNotFound { .. } => "JOB_NOT_FOUND",
            ServiceError::NotificationNotFound { .. } => "NOTIFICATION_NOT_FOUND",
            ServiceError::Conflict { .. } => "JOB_IN_PROGRESS",
            ServiceError::AlreadyExists { .. } => "ALREADY_EXISTS",
            ServiceError::JobFinished { .. } => "JOB_FINISHED",
            ServiceError::Extraction(_) => "EXTRACTION_FAILED",
            ServiceError::Database(_) => "DATABASE_ERROR",
            ServiceError::InvalidRequest { .. } => "INVALID_REQUEST",
            ServiceError::Config { .. } => "CONFIG_ERROR",
            ServiceError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ServiceError::Conflict { job_id, .. } => Some(serde_json::json!({ "job_id": job_id })),
            ServiceError::Extraction(e) => Some(serde_json::json!({
                "error_type": e.kind(),
                "recoverable": e.is_recoverable(),
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %format_error_chain_ref(&self), "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
            details: self.details(),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ExtractionError::timeout(Duration::from_secs(1)).is_recoverable());
        assert!(
            ExtractionError::MalformedOutput {
                message: "missing subjects".into()
            }
            .is_recoverable()
        );
        assert!(
            !ExtractionError::Database {
                message: "disk full".into()
            }
            .is_recoverable()
        );
        assert!(!ExtractionError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_malformed_output_is_validation_kind() {
        let err = ExtractionError::MalformedOutput {
            message: "expected object".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.kind().to_string(), "validation");
    }

    #[test]
    fn test_http_status_recoverability() {
        let throttled: ExtractionError = InferenceError::Http {
            status: 429,
            message: "slow down".into(),
        }
        .into();
        assert!(throttled.is_recoverable());

        let unauthorized: ExtractionError = InferenceError::Http {
            status: 401,
            message: "bad key".into(),
        }
        .into();
        assert!(!unauthorized.is_recoverable());
        assert_eq!(unauthorized.kind(), ErrorKind::Llm);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Pdf).unwrap();
        assert_eq!(json, "\"pdf\"");
        assert_eq!("timeout".parse::<ErrorKind>().unwrap(), ErrorKind::Timeout);
    }

    #[test]
    fn test_format_error_chain() {
        let err = DatabaseError::Migration {
            message: "bad column".into(),
        };
        assert_eq!(format_error_chain_ref(&err), "Migration failed: bad column");
    }
}
