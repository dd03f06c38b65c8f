use async_trait::async_trait;
use bytes::Bytes;
use parcel_storage::MemoryBackend;
use parcel_storage::error::{StorageError, StorageResult};
use parcel_storage::traits::{CompletedPart, ObjectMeta, ObjectStore};
use std::sync::Mutex;

/// One call observed by [`RecordingStore`].
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    Put { key: String, len: usize },
    Delete { key: String },
    CreateMultipart { key: String },
    UploadPart { part_number: i32, len: usize },
    Complete { part_numbers: Vec<i32> },
    Abort { upload_id: String },
}

/// Memory-backed store that records every write and can be told to fail.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryBackend,
    /// Writes observed so far, in call order.
    pub calls: Mutex<Vec<RecordedCall>>,
    /// Fail `upload_part` for this part number.
    pub fail_part: Option<i32>,
    /// Fail `put` for keys starting with this prefix.
    pub fail_put_prefix: Option<String>,
    /// Fail `complete_multipart`.
    pub fail_complete: bool,
    /// Fail `delete`.
    pub fail_delete: bool,
    /// Make `upload_part` hang for an hour.
    pub stall_parts: bool,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_part(part_number: i32) -> Self {
        Self {
            fail_part: Some(part_number),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploaded_parts(&self) -> Vec<i32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::UploadPart { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matcher: impl Fn(&RecordedCall) -> bool) -> usize {
        self.calls().iter().filter(|c| matcher(c)).count()
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn injected(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("injected {what} failure")))
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
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
        self.record(RecordedCall::Put {
            key: key.to_string(),
            len: data.len(),
        });
        if let Some(prefix) = &self.fail_put_prefix
            && key.starts_with(prefix.as_str())
        {
            return Err(Self::injected("put"));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.record(RecordedCall::Delete {
            key: key.to_string(),
        });
        if self.fail_delete {
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
        self.record(RecordedCall::CreateMultipart {
            key: key.to_string(),
        });
        self.inner.create_multipart(key, content_type).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<CompletedPart> {
        self.record(RecordedCall::UploadPart {
            part_number,
            len: data.len(),
        });
        if self.fail_part == Some(part_number) {
            return Err(Self::injected("part"));
        }
        if self.stall_parts {
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
        self.record(RecordedCall::Complete {
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });
        if self.fail_complete {
            return Err(Self::injected("complete"));
        }
        self.inner.complete_multipart(key, upload_id, parts).await
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.record(RecordedCall::Abort {
            upload_id: upload_id.to_string(),
        });
        self.inner.abort_multipart(key, upload_id).await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}
