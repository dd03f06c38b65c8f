//! HTTP request handlers.

pub mod admin;
pub mod capabilities;
pub mod links;
pub mod progress;
pub mod uploads;

pub use admin::*;
pub use capabilities::*;
pub use links::*;
pub use progress::*;
pub use uploads::*;

use crate::error::{ApiError, ApiResult};
use axum::body::Bytes;
use axum::extract::{Query, Request};
use axum::http::header::CONTENT_LENGTH;
use serde::de::DeserializeOwned;

/// Read a request body of at most `limit` bytes.
pub(crate) async fn read_body(req: Request, limit: usize) -> ApiResult<Bytes> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared
        && len > limit as u64
    {
        return Err(ApiError::PayloadTooLarge(format!(
            "body of {len} bytes exceeds limit of {limit}"
        )));
    }

    axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))
}

/// Parse the query string, reporting problems in the API error format.
pub(crate) fn parse_query<T: DeserializeOwned>(req: &Request) -> ApiResult<T> {
    Query::<T>::try_from_uri(req.uri())
        .map(|Query(query)| query)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}
