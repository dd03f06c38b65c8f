//! Capability discovery endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use parcel_core::ExpiresIn;
use serde::Serialize;

/// Capabilities response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    /// Largest accepted file in bytes.
    pub max_file_size: u64,
    /// Files above this size should be sent in chunks.
    pub chunking_threshold: u64,
    /// Largest request body (one chunk or one simple upload).
    pub max_request_bytes: u64,
    /// Payloads above this size are committed as multipart uploads.
    pub multipart_threshold: u64,
    pub part_size: u64,
    pub large_part_size: u64,
    /// Accepted values of the `expires` field.
    pub expiry_options: Vec<&'static str>,
    pub default_expiry: &'static str,
    /// Domains a link may be served from; the first is the default.
    pub allowed_domains: Vec<String>,
    pub allowed_mime_types: Vec<String>,
    /// API version.
    pub api_version: &'static str,
}

/// GET /v1/capabilities
pub async fn get_capabilities(
    State(state): State<AppState>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    let upload = &state.config.upload;
    Ok(Json(CapabilitiesResponse {
        max_file_size: upload.max_file_size,
        chunking_threshold: upload.chunking_threshold,
        max_request_bytes: state.config.server.max_request_bytes,
        multipart_threshold: upload.multipart_threshold,
        part_size: upload.part_size,
        large_part_size: upload.large_part_size,
        expiry_options: ExpiresIn::ALL.iter().map(ExpiresIn::as_str).collect(),
        default_expiry: upload.default_expiry.as_str(),
        allowed_domains: state.config.domains.allowed.clone(),
        allowed_mime_types: upload.allowed_mime_types.clone(),
        api_version: "v1",
    }))
}
