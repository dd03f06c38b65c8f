//! Chunk, finalize and simple upload handlers.

use crate::coordinator::SimpleUpload;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{parse_query, read_body};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use parcel_core::{ChunkReceipt, ChunkSubmission, FileId, FinalizeRequest, UploadResult};
use serde::Deserialize;

/// Finalize bodies only carry a handful of optional fields.
const MAX_FINALIZE_BODY_SIZE: usize = 64 * 1024;

/// PUT /v1/uploads/{file_id}/chunks/{chunk_index}
///
/// Query: `totalChunks`, `fileName`, `fileType`, `fileSize`. Body: raw chunk bytes.
#[tracing::instrument(skip(state, req), fields(file_id = %file_id, chunk_index = %chunk_index))]
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((file_id, chunk_index)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<ChunkReceipt>> {
    let file_id = FileId::parse(&file_id)?;
    let chunk_index: u32 = chunk_index.parse().map_err(|_| {
        parcel_core::Error::InvalidChunk(format!("chunk index is not a number: {chunk_index}"))
    })?;
    let submission: ChunkSubmission = parse_query(&req)?;

    let limit = usize::try_from(state.config.server.max_request_bytes).unwrap_or(usize::MAX);
    let data = read_body(req, limit).await?;

    let receipt = state
        .coordinator
        .submit_chunk(&file_id, chunk_index, &submission, data)
        .await?;
    Ok(Json(receipt))
}

/// POST /v1/uploads/{file_id}/finalize
///
/// The JSON body is optional; omitted fields fall back to what the session
/// recorded from its chunks.
#[tracing::instrument(skip(state, req), fields(file_id = %file_id))]
pub async fn finalize_upload(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    req: Request,
) -> ApiResult<Json<UploadResult>> {
    let file_id = FileId::parse(&file_id)?;
    let body = read_body(req, MAX_FINALIZE_BODY_SIZE).await?;
    let request: FinalizeRequest = if body.iter().all(u8::is_ascii_whitespace) {
        FinalizeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?
    };

    let result = state.coordinator.finalize(&file_id, &request).await?;
    Ok(Json(result))
}

/// Query parameters of a simple upload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleUploadQuery {
    pub file_name: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// POST /v1/uploads
///
/// Whole file in one request. Without `fileType` the request Content-Type
/// is used.
#[tracing::instrument(skip(state, req))]
pub async fn simple_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<UploadResult>> {
    let query: SimpleUploadQuery = parse_query(&req)?;
    let session_id = query
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(FileId::parse)
        .transpose()?;
    let file_type = query.file_type.or_else(|| {
        req.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).to_string())
    });

    let limit = usize::try_from(state.config.server.max_request_bytes).unwrap_or(usize::MAX);
    let data = read_body(req, limit).await?;

    let upload = SimpleUpload {
        session_id,
        file_name: query.file_name,
        file_type,
        expires: query.expires,
        domain: query.domain,
    };
    let result = state.coordinator.upload_simple(upload, data).await?;
    Ok(Json(result))
}
