//! Startup errors and the problem-JSON error responses of the HTTP API.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use ddc_log::{LogError, SnapshotInfo};
use ddc_object::ObjectError;
use ddc_refs::RefError;
use ddc_replication::ReplicationError;
use ddc_store::{PayloadError, StoreError};

/// Failures while configuring, starting, or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("ref store error: {0}")]
    Refs(#[from] RefError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// An error returned to an HTTP client as a problem document:
/// `{ "type", "title", "status", "detail" }` plus optional extra fields.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
    extra: Map<String, Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
            extra: Map::new(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", detail)
    }

    pub fn not_found(kind: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, kind, detail)
    }

    /// The log cannot serve the requested cursor; the client should
    /// bootstrap from `snapshot`.
    pub fn use_snapshot(snapshot: &SnapshotInfo) -> Self {
        let mut err = Self::new(
            StatusCode::BAD_REQUEST,
            "UseSnapshot",
            format!(
                "incremental log for {} is not available from the requested cursor",
                snapshot.namespace
            ),
        );
        err.extra
            .insert("SnapshotId".into(), json!(snapshot.snapshot_blob_id));
        err.extra
            .insert("BlobNamespace".into(), json!(snapshot.blob_namespace));
        err
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<RefError> for ApiError {
    fn from(err: RefError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        RefError::from(err).into()
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        RefError::from(err).into()
    }
}

impl From<ObjectError> for ApiError {
    fn from(err: ObjectError) -> Self {
        RefError::from(err).into()
    }
}

impl From<PayloadError> for ApiError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::ClientTooSlow { .. } => {
                Self::new(StatusCode::REQUEST_TIMEOUT, "ClientTooSlow", err.to_string())
            }
            PayloadError::Cancelled { .. } => {
                Self::new(StatusCode::REQUEST_TIMEOUT, "UploadCancelled", err.to_string())
            }
            PayloadError::TooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge", err.to_string())
            }
            PayloadError::Io(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "StorageError", err.to_string())
            }
        }
    }
}

impl From<ReplicationError> for ApiError {
    fn from(err: ReplicationError) -> Self {
        match err {
            ReplicationError::UseSnapshot { snapshot, .. } => Self::use_snapshot(&snapshot),
            ReplicationError::Refs(e) => e.into(),
            ReplicationError::Store(e) => e.into(),
            ReplicationError::Log(e) => e.into(),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", other.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "StorageError", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Server-side details stay in the log.
        let detail = if self.status.is_server_error() {
            error!(kind = self.kind, detail = %self.detail, "request failed");
            "internal error".to_string()
        } else {
            if self.status == StatusCode::REQUEST_TIMEOUT {
                warn!(kind = self.kind, detail = %self.detail, "upload aborted");
            }
            self.detail
        };

        let mut body = Map::new();
        body.insert("type".into(), json!(self.kind));
        body.insert(
            "title".into(),
            json!(self.status.canonical_reason().unwrap_or("Error")),
        );
        body.insert("status".into(), json!(self.status.as_u16()));
        body.insert("detail".into(), json!(detail));
        body.extend(self.extra);

        (
            self.status,
            [(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            Value::Object(body).to_string(),
        )
            .into_response()
    }
}
