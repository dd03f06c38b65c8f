//! Core domain types and shared logic for the parcel upload service.
//!
//! This crate defines the data model used across all other crates:
//! - Upload sessions, chunk submissions and finalize contracts
//! - Progress values and push events
//! - Link expiry, domain resolution and identifier generation
//! - File validation and configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod expiry;
pub mod ids;
pub mod progress;
pub mod upload;
pub mod validate;

pub use error::{Error, Result};
pub use expiry::ExpiresIn;
pub use ids::{IdProvider, RandomIdProvider};
pub use progress::{FAILED_PROGRESS, ProgressEvent, ProgressSnapshot, ProgressState};
pub use upload::{
    ChunkReceipt, ChunkSubmission, FileId, FinalizeRequest, SessionState, UploadPhase,
    UploadResult, UploadSession, chunk_progress,
};

/// Key of a stored chunk.
pub fn chunk_key(file_id: &FileId, chunk_index: u32) -> String {
    format!("chunks/{file_id}/{chunk_index}")
}

/// Prefix under which all chunks of a session live.
pub fn chunk_prefix(file_id: &FileId) -> String {
    format!("chunks/{file_id}/")
}

/// Key of a completed object.
pub fn final_key(upload_id: &uuid::Uuid, file_name: &str) -> String {
    format!("{upload_id}/{file_name}")
}
