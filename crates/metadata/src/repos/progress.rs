//! Durable progress repository.
//!
//! Progress rows are what a polling client reads back after missing push
//! events, so the store itself enforces the ordering rules: a progress value
//! only ever moves forward and a failure (-1) is final.

use crate::error::MetadataResult;
use crate::models::ProgressRow;
use async_trait::async_trait;
use time::OffsetDateTime;

#[async_trait]
pub trait ProgressRepo: Send + Sync {
    /// Store `progress` if it is greater than the stored value and the session
    /// has not failed. Returns `true` if the row changed.
    async fn record_progress(
        &self,
        file_id: &str,
        progress: i32,
        updated_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Mark the session failed with an error message.
    async fn record_failure(
        &self,
        file_id: &str,
        error: &str,
        updated_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Store the final result and set progress to 100.
    async fn record_result(
        &self,
        file_id: &str,
        result_json: &str,
        updated_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Get the progress row unless it expired before `now`.
    async fn get_progress(
        &self,
        file_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<Option<ProgressRow>>;

    /// Purge rows that expired before `now`.
    async fn delete_expired_progress(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}
