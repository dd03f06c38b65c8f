//! API error types.

use crate::coordinator::UploadError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Error code for programmatic handling.
    pub code: String,
    /// Chunk accounting for `incomplete_upload` errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<IncompleteDetails>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteDetails {
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub missing: Vec<u32>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("link expired")]
    Gone,

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("storage error: {0}")]
    Storage(#[from] parcel_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] parcel_metadata::MetadataError),
}

impl From<parcel_core::Error> for ApiError {
    fn from(err: parcel_core::Error) -> Self {
        Self::Upload(UploadError::Validation(err))
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Gone => "link_expired",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Internal(_) => "internal_error",
            Self::Upload(e) => match e {
                UploadError::Validation(parcel_core::Error::FileTooLarge { .. }) => {
                    "file_too_large"
                }
                UploadError::Validation(parcel_core::Error::DisallowedType(_)) => {
                    "disallowed_type"
                }
                UploadError::Validation(_) => "validation_error",
                UploadError::NotFound(_) => "session_not_found",
                UploadError::IncompleteUpload { .. } => "incomplete_upload",
                UploadError::SizeMismatch { .. } => "size_mismatch",
                UploadError::IdGenerationExhausted { .. } => "id_generation_exhausted",
                UploadError::SessionBusy { .. } => "session_busy",
                UploadError::Timeout(_) => "timeout",
                UploadError::Storage(_) => "storage_error",
                UploadError::Metadata(_) => "metadata_error",
            },
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Gone => StatusCode::GONE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upload(e) => match e {
                UploadError::Validation(parcel_core::Error::FileTooLarge { .. }) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                UploadError::Validation(parcel_core::Error::InvalidDomain(_)) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                UploadError::Validation(_) => StatusCode::BAD_REQUEST,
                UploadError::NotFound(_) => StatusCode::NOT_FOUND,
                UploadError::IncompleteUpload { .. } | UploadError::SessionBusy { .. } => {
                    StatusCode::CONFLICT
                }
                UploadError::SizeMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                UploadError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                UploadError::IdGenerationExhausted { .. }
                | UploadError::Storage(_)
                | UploadError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(parcel_metadata::MetadataError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<IncompleteDetails> {
        match self {
            Self::Upload(UploadError::IncompleteUpload {
                received,
                total,
                missing,
            }) => Some(IncompleteDetails {
                received_chunks: *received,
                total_chunks: *total,
                missing: missing.clone(),
            }),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
