//! HTTP upload service for parcel.
//!
//! This crate provides:
//! - The upload coordinator (chunk intake, finalize, simple uploads)
//! - Durable progress with live server-sent events
//! - The inactivity sweep for abandoned sessions
//! - Public link lookup

pub mod auth;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod notifier;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use coordinator::{Coordinator, SweepReport, UploadError};
pub use error::ApiError;
pub use notifier::{EventHub, ProgressNotifier, StoreNotifier};
pub use routes::create_router;
pub use state::AppState;
