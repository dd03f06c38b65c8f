//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("file type not allowed: {0}")]
    DisallowedType(String),

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("no usable public domain: {0}")]
    InvalidDomain(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
