//! Process-local storage backend.
//!
//! Objects live in a concurrent map and vanish when the process exits, so
//! this backend restricts a deployment to a single process. Used for
//! development and tests.

use crate::error::{StorageError, StorageResult};
use crate::traits::{CompletedPart, ObjectMeta, ObjectStore, check_part_order};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    modified: OffsetDateTime,
}

struct PendingUpload {
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<i32, Bytes>,
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryBackend {
    objects: DashMap<String, StoredObject>,
    uploads: DashMap<String, PendingUpload>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of multipart uploads neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    fn not_found(key: &str) -> StorageError {
        StorageError::NotFound(key.to_string())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let obj = self.objects.get(key).ok_or_else(|| Self::not_found(key))?;
        Ok(ObjectMeta {
            size: obj.data.len() as u64,
            last_modified: Some(obj.modified),
            content_type: obj.content_type.clone(),
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| Self::not_found(key))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.map(str::to_string),
                modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<CompletedPart> {
        if part_number < 1 {
            return Err(StorageError::Multipart(format!(
                "part numbers start at 1, got {part_number}"
            )));
        }
        let mut upload = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::UnknownUpload(upload_id.to_string()))?;
        if upload.key != key {
            return Err(StorageError::Multipart(format!(
                "upload {upload_id} targets {}, not {key}",
                upload.key
            )));
        }
        let etag = format!("\"{upload_id}-{part_number}-{}\"", data.len());
        upload.parts.insert(part_number, data);
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        check_part_order(parts)?;
        let (_, upload) = self
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::UnknownUpload(upload_id.to_string()))?;

        let mut assembled = BytesMut::new();
        for part in parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::Multipart(format!("part {} was never uploaded", part.part_number))
            })?;
            assembled.extend_from_slice(data);
        }

        self.put(key, assembled.freeze(), upload.content_type.as_deref())
            .await
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        self.uploads.remove(upload_id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
