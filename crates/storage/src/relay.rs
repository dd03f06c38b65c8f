//! Blob relay: chunk persistence and final object commits.
//!
//! Chunks are written to `chunks/{file_id}/{index}` as soon as they arrive and
//! read back in index order at finalize time. The assembled object is written
//! with a single put when it is small enough, otherwise through a multipart
//! upload whose parts are sent concurrently and completed in ascending order.

use crate::error::{StorageError, StorageResult};
use crate::traits::{CompletedPart, ObjectStore};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use parcel_core::config::UploadConfig;
use parcel_core::{FileId, chunk_key, chunk_prefix};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::instrument;

/// Concurrent chunk reads during reassembly.
const READ_CONCURRENCY: usize = 8;

/// Size policy for final commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitPolicy {
    /// Payloads at or below this size use a single put.
    pub multipart_threshold: u64,
    pub part_size: u64,
    /// Payloads above this size use `large_part_size`.
    pub large_file_threshold: u64,
    pub large_part_size: u64,
    /// Parts in flight at once.
    pub part_concurrency: usize,
}

impl CommitPolicy {
    pub fn part_size_for(&self, total: u64) -> u64 {
        if total > self.large_file_threshold {
            self.large_part_size
        } else {
            self.part_size
        }
    }

    /// Whether a payload of `len` bytes needs a multipart upload.
    pub fn needs_multipart(&self, len: u64) -> bool {
        len > self.multipart_threshold
    }
}

impl From<&UploadConfig> for CommitPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            multipart_threshold: config.multipart_threshold,
            part_size: config.part_size,
            large_file_threshold: config.large_file_threshold,
            large_part_size: config.large_part_size,
            part_concurrency: config.part_concurrency,
        }
    }
}

/// How a final object was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitStrategy {
    SinglePut,
    Multipart { parts: usize },
}

impl CommitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePut => "single_put",
            Self::Multipart { .. } => "multipart",
        }
    }
}

/// Emitted after each multipart part is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartProgress {
    pub completed: usize,
    pub total: usize,
}

/// Result of removing a session's stored chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkCleanup {
    pub deleted: usize,
    pub failed: usize,
}

/// Moves chunk bytes and final objects in and out of the object store.
#[derive(Clone)]
pub struct BlobRelay {
    store: Arc<dyn ObjectStore>,
    policy: CommitPolicy,
}

impl BlobRelay {
    pub fn new(store: Arc<dyn ObjectStore>, policy: CommitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn policy(&self) -> &CommitPolicy {
        &self.policy
    }

    /// Durably store one chunk. Errors propagate so the chunk is not recorded.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn store_chunk(
        &self,
        file_id: &FileId,
        chunk_index: u32,
        data: Bytes,
    ) -> StorageResult<()> {
        self.store
            .put(&chunk_key(file_id, chunk_index), data, None)
            .await
    }

    /// Read one chunk back. `NotFound` means the ledger and the store disagree.
    #[instrument(skip(self))]
    pub async fn read_chunk(&self, file_id: &FileId, chunk_index: u32) -> StorageResult<Bytes> {
        self.store.get(&chunk_key(file_id, chunk_index)).await
    }

    /// Read the given chunks and concatenate them in the order given.
    ///
    /// Reads run concurrently but the output preserves `indices` order.
    #[instrument(skip(self, indices), fields(chunks = indices.len()))]
    pub async fn read_all(&self, file_id: &FileId, indices: &[u32]) -> StorageResult<Bytes> {
        let parts: Vec<Bytes> = stream::iter(indices.iter().copied())
            .map(|index| self.read_chunk(file_id, index))
            .buffered(READ_CONCURRENCY)
            .try_collect()
            .await?;

        let total: usize = parts.iter().map(Bytes::len).sum();
        let mut assembled = BytesMut::with_capacity(total);
        for part in parts {
            assembled.extend_from_slice(&part);
        }
        Ok(assembled.freeze())
    }

    /// Best-effort removal of one chunk. Failures are logged and reported as `false`.
    pub async fn delete_chunk(&self, file_id: &FileId, chunk_index: u32) -> bool {
        let key = chunk_key(file_id, chunk_index);
        match self.store.delete(&key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to delete chunk");
                false
            }
        }
    }

    /// Best-effort removal of every stored chunk of a session.
    ///
    /// Lists the session prefix so bytes stored without a ledger entry (a
    /// crash between store and record) are removed too.
    #[instrument(skip(self))]
    pub async fn clear_chunks(&self, file_id: &FileId) -> ChunkCleanup {
        let keys = match self.store.list(&chunk_prefix(file_id)).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(file_id = %file_id, error = %e, "Failed to list session chunks");
                return ChunkCleanup {
                    deleted: 0,
                    failed: 1,
                };
            }
        };

        let mut cleanup = ChunkCleanup::default();
        for key in keys {
            match self.store.delete(&key).await {
                Ok(()) => cleanup.deleted += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to delete chunk");
                    cleanup.failed += 1;
                }
            }
        }
        cleanup
    }

    /// Write the assembled object, choosing single put or multipart by size.
    ///
    /// On any multipart failure the upload is aborted before the error is
    /// returned. `progress` receives one message per accepted part.
    pub async fn commit_final(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: Option<mpsc::UnboundedSender<PartProgress>>,
    ) -> StorageResult<CommitStrategy> {
        self.commit_final_before(key, data, content_type, progress, None)
            .await
    }

    /// Like [`commit_final`](Self::commit_final), giving up at `deadline`.
    ///
    /// A multipart upload still running at the deadline is aborted and the
    /// call fails with [`StorageError::Timeout`].
    #[instrument(skip(self, data, progress), fields(size = data.len()))]
    pub async fn commit_final_before(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: Option<mpsc::UnboundedSender<PartProgress>>,
        deadline: Option<Instant>,
    ) -> StorageResult<CommitStrategy> {
        let len = data.len() as u64;
        if !self.policy.needs_multipart(len) {
            with_deadline(deadline, self.store.put(key, data, Some(content_type))).await?;
            return Ok(CommitStrategy::SinglePut);
        }

        let upload_id = with_deadline(
            deadline,
            self.store.create_multipart(key, Some(content_type)),
        )
        .await?;

        let outcome = with_deadline(deadline, async {
            let parts = self
                .upload_parts(key, &upload_id, data, progress.as_ref())
                .await?;
            self.store
                .complete_multipart(key, &upload_id, &parts)
                .await?;
            Ok(parts.len())
        })
        .await;

        match outcome {
            Ok(count) => {
                tracing::debug!(key = %key, parts = count, "Multipart upload completed");
                Ok(CommitStrategy::Multipart { parts: count })
            }
            Err(e) => {
                self.abort(key, &upload_id).await;
                Err(e)
            }
        }
    }

    /// Upload all parts with bounded concurrency and return them sorted by part number.
    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        data: Bytes,
        progress: Option<&mpsc::UnboundedSender<PartProgress>>,
    ) -> StorageResult<Vec<CompletedPart>> {
        let len = data.len();
        let part_size = usize::try_from(self.policy.part_size_for(len as u64))
            .map_err(|_| StorageError::Config("part size exceeds address space".to_string()))?;
        if part_size == 0 {
            return Err(StorageError::Config("part size must be non-zero".to_string()));
        }
        let total = len.div_ceil(part_size);

        let mut uploads = stream::iter((0..total).map(|i| {
            let start = i * part_size;
            let end = (start + part_size).min(len);
            let body = data.slice(start..end);
            let part_number = i32::try_from(i + 1).unwrap_or(i32::MAX);
            async move {
                self.store
                    .upload_part(key, upload_id, part_number, body)
                    .await
            }
        }))
        .buffer_unordered(self.policy.part_concurrency.max(1));

        let mut parts = Vec::with_capacity(total);
        while let Some(result) = uploads.next().await {
            // Dropping the stream on error cancels parts still in flight.
            let part = result?;
            parts.push(part);
            if let Some(tx) = progress {
                let _ = tx.send(PartProgress {
                    completed: parts.len(),
                    total,
                });
            }
        }

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        if let Err(e) = self.store.abort_multipart(key, upload_id).await {
            tracing::warn!(
                key = %key,
                upload_id = %upload_id,
                error = %e,
                "Failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| StorageError::Timeout("object commit did not finish in time".to_string()))?,
        None => fut.await,
    }
}
