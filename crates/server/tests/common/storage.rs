//! Instrumented object stores and id providers for tests.

use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::{IdProvider, RandomIdProvider};
use parcel_storage::{
    CompletedPart, MemoryBackend, ObjectMeta, ObjectStore, StorageError, StorageResult,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

/// Memory-backed store with switchable failures and call counters.
///
/// Failure switches are atomics so a test can flip them while the store is
/// shared with a running server.
#[allow(dead_code)]
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryBackend,
    /// Fail puts of final objects (keys outside `chunks/`).
    pub fail_final_put: AtomicBool,
    /// Fail puts of chunk objects.
    pub fail_chunk_put: AtomicBool,
    /// Fail this multipart part number (0 disables).
    pub fail_part: AtomicUsize,
    /// Make every multipart part hang for an hour.
    pub stall_parts: AtomicBool,
    /// Fail deletes.
    pub fail_delete: AtomicBool,
    /// Store final objects, then hang for an hour before acknowledging.
    pub stall_final_put: AtomicBool,
    chunk_puts: AtomicUsize,
    aborts: AtomicUsize,
    multipart_starts: AtomicUsize,
}

#[allow(dead_code)]
impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunk objects written so far.
    pub fn chunk_puts(&self) -> usize {
        self.chunk_puts.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn multipart_starts(&self) -> usize {
        self.multipart_starts.load(Ordering::SeqCst)
    }

    /// Keys of every stored object, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys = self.inner.list("").await.expect("memory list");
        keys.sort();
        keys
    }

    fn injected(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("injected {what} failure")))
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<()> {
        if key.starts_with("chunks/") {
            if self.fail_chunk_put.load(Ordering::SeqCst) {
                return Err(Self::injected("chunk put"));
            }
            self.chunk_puts.fetch_add(1, Ordering::SeqCst);
        } else if self.fail_final_put.load(Ordering::SeqCst) {
            return Err(Self::injected("final put"));
        } else if self.stall_final_put.load(Ordering::SeqCst) {
            self.inner.put(key, data, content_type).await?;
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            return Ok(());
        }
        self.inner.put(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        self.multipart_starts.fetch_add(1, Ordering::SeqCst);
        self.inner.create_multipart(key, content_type).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<CompletedPart> {
        let fail_part = self.fail_part.load(Ordering::SeqCst);
        if fail_part != 0 && usize::try_from(part_number).ok() == Some(fail_part) {
            return Err(Self::injected("part"));
        }
        if self.stall_parts.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        self.inner.upload_part(key, upload_id, part_number, data).await
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        self.inner.complete_multipart(key, upload_id, parts).await
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_multipart(key, upload_id).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

/// Hands out queued slugs first, then random ones.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedIds {
    slugs: Mutex<VecDeque<String>>,
    issued: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedIds {
    pub fn new<I, S>(slugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slugs: Mutex::new(slugs.into_iter().map(Into::into).collect()),
            issued: AtomicUsize::new(0),
        }
    }

    /// A provider that returns `slug` forever.
    pub fn always(slug: &str) -> Self {
        Self::new(std::iter::repeat_n(slug.to_string(), 1000))
    }

    /// Number of slugs handed out.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl IdProvider for ScriptedIds {
    fn slug(&self) -> String {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.slugs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RandomIdProvider.slug())
    }

    fn upload_id(&self) -> Uuid {
        Uuid::now_v7()
    }
}
