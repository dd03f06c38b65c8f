//! Completed upload repository.

use crate::error::MetadataResult;
use crate::models::UploadRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for publicly resolvable upload records.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Insert an upload record.
    ///
    /// Fails with `MetadataError::AlreadyExists` if the id or slug is taken,
    /// which callers use as the collision signal for id generation.
    async fn create_upload(&self, upload: &UploadRow) -> MetadataResult<()>;

    /// Get an upload by id.
    async fn get_upload(&self, upload_id: Uuid) -> MetadataResult<Option<UploadRow>>;

    /// Get an upload by slug.
    async fn get_upload_by_slug(&self, slug: &str) -> MetadataResult<Option<UploadRow>>;

    /// Attach the committed storage key and serving domain.
    async fn set_upload_storage(
        &self,
        upload_id: Uuid,
        storage_key: &str,
        domain: &str,
    ) -> MetadataResult<()>;

    /// Delete an upload record. Returns `false` if it didn't exist.
    async fn delete_upload(&self, upload_id: Uuid) -> MetadataResult<bool>;
}
