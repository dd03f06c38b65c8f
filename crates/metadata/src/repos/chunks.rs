//! Chunk ledger repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Durable record of which chunk indices of a session have been stored.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Mark a chunk as received. Returns `true` when the index was newly
    /// recorded and `false` when it was already present.
    async fn record_chunk(
        &self,
        file_id: &str,
        chunk_index: u32,
        received_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Check whether a chunk index has been recorded.
    async fn is_chunk_recorded(&self, file_id: &str, chunk_index: u32) -> MetadataResult<bool>;

    /// Number of distinct indices recorded.
    async fn count_chunks(&self, file_id: &str) -> MetadataResult<u32>;

    /// Recorded indices in ascending order.
    async fn list_chunks(&self, file_id: &str) -> MetadataResult<Vec<u32>>;

    /// Remove every chunk record of a session.
    async fn delete_chunks(&self, file_id: &str) -> MetadataResult<u64>;
}
