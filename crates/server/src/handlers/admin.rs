//! Health and administrative endpoints.

use crate::auth::require_admin;
use crate::coordinator::SweepReport;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health
///
/// Unauthenticated so load balancers can poll it.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /v1/admin/sweep - Remove abandoned sessions and stale progress.
///
/// Meant to be called by an external scheduler.
#[tracing::instrument(skip(state, headers))]
pub async fn run_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SweepReport>> {
    require_admin(&state, &headers)?;
    let report = state.coordinator.sweep().await?;
    Ok(Json(report))
}
