//! Object storage abstraction, backends and the blob relay for parcel.
//!
//! This crate provides:
//! - The `ObjectStore` trait, including the S3 multipart protocol
//! - Backends: local filesystem, S3-compatible and in-memory
//! - `BlobRelay`, which stores upload chunks and commits final objects

pub mod backends;
pub mod error;
pub mod relay;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use relay::{BlobRelay, ChunkCleanup, CommitPolicy, CommitStrategy, PartProgress};
pub use traits::{CompletedPart, ObjectMeta, ObjectStore};

use parcel_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage: objects are lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
