//! Prometheus metrics for the parcel server.
//!
//! Metrics carry no file names, slugs or session ids, only aggregate
//! counts. The `/metrics` endpoint is unauthenticated for scraping and
//! should be kept off public networks.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Registry for all parcel metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Sessions and chunks
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_created_total",
        "Total number of chunked upload sessions created",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_chunks_received_total",
        "Total number of chunks stored and recorded",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_DUPLICATE: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_chunks_duplicate_total",
        "Total number of chunk submissions for an index already recorded",
    )
    .expect("metric creation failed")
});

pub static CHUNK_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_chunk_bytes_total",
        "Total bytes of newly recorded chunks",
    )
    .expect("metric creation failed")
});

// Finalize
pub static FINALIZE_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parcel_finalize_total",
            "Finalize and simple upload attempts by path and outcome",
        ),
        &["path", "outcome"],
    )
    .expect("metric creation failed")
});

pub static COMMIT_STRATEGY: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parcel_commit_strategy_total",
            "Final objects written by commit strategy",
        ),
        &["strategy"],
    )
    .expect("metric creation failed")
});

pub static FINALIZE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_finalize_duration_seconds",
            "Time taken to commit a completed upload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
    )
    .expect("metric creation failed")
});

pub static ID_COLLISIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_id_collisions_total",
        "Total number of upload id or slug collisions retried",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parcel_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Sweep
pub static SESSIONS_SWEPT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_sessions_swept_total",
        "Total number of abandoned sessions removed by the sweep",
    )
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOAD_SESSIONS_CREATED.clone()),
            Box::new(CHUNKS_RECEIVED.clone()),
            Box::new(CHUNKS_DUPLICATE.clone()),
            Box::new(CHUNK_BYTES.clone()),
            Box::new(FINALIZE_OUTCOMES.clone()),
            Box::new(COMMIT_STRATEGY.clone()),
            Box::new(FINALIZE_DURATION.clone()),
            Box::new(ID_COLLISIONS.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(SESSIONS_SWEPT.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!(error = %e, "Failed to register metric");
            }
        }
    });
}

/// Count an upload error by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
