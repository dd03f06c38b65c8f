//! Route configuration.

use crate::auth::trace_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Capability discovery
        .route("/v1/capabilities", get(handlers::get_capabilities))
        // Health check (unauthenticated for load balancers)
        .route("/v1/health", get(handlers::health_check))
        // Uploads
        .route("/v1/uploads", post(handlers::simple_upload))
        .route(
            "/v1/uploads/{file_id}/chunks/{chunk_index}",
            put(handlers::put_chunk),
        )
        .route(
            "/v1/uploads/{file_id}/finalize",
            post(handlers::finalize_upload),
        )
        .route(
            "/v1/uploads/{file_id}/progress",
            get(handlers::get_progress),
        )
        .route(
            "/v1/uploads/{file_id}/events",
            get(handlers::progress_events),
        )
        // Admin
        .route("/v1/admin/sweep", post(handlers::run_sweep));

    let link_routes = Router::new().route("/{slug}", get(handlers::resolve_link));

    let mut router = Router::new().merge(api_routes).merge(link_routes);

    // SECURITY: When enabled, this endpoint should be network-restricted
    // to the Prometheus scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Handlers enforce their own body limits.
    router
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
