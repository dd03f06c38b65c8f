//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use parcel_core::{FileId, SessionState, UploadResult, UploadSession};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Upload sessions
// =============================================================================

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub total_chunks: i32,
    pub state: String,
    pub created_at: OffsetDateTime,
    /// Last chunk activity. Drives the inactivity sweep.
    pub updated_at: OffsetDateTime,
}

impl SessionRow {
    /// Build the stored form, rejecting sizes the integer columns cannot hold.
    pub fn try_from_session(session: &UploadSession) -> MetadataResult<Self> {
        let file_size = i64::try_from(session.file_size).map_err(|_| {
            MetadataError::Constraint(format!("file size {} out of range", session.file_size))
        })?;
        let total_chunks = i32::try_from(session.total_chunks).map_err(|_| {
            MetadataError::Constraint(format!(
                "chunk count {} out of range",
                session.total_chunks
            ))
        })?;
        Ok(Self {
            file_id: session.file_id.to_string(),
            file_name: session.file_name.clone(),
            file_type: session.file_type.clone(),
            file_size,
            total_chunks,
            state: session.state.as_str().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        })
    }

    /// Convert back into the domain type, rejecting rows written by
    /// something other than this crate.
    pub fn to_session(&self) -> MetadataResult<UploadSession> {
        let file_id = FileId::parse(&self.file_id)
            .map_err(|e| MetadataError::Internal(format!("stored session id: {e}")))?;
        let state = self
            .state
            .parse::<SessionState>()
            .map_err(|e| MetadataError::Internal(format!("stored session state: {e}")))?;
        let file_size = u64::try_from(self.file_size)
            .map_err(|_| MetadataError::Internal(format!("negative file size {}", self.file_size)))?;
        let total_chunks = u32::try_from(self.total_chunks).map_err(|_| {
            MetadataError::Internal(format!("negative chunk count {}", self.total_chunks))
        })?;

        Ok(UploadSession {
            file_id,
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            file_size,
            total_chunks,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Received chunk marker. Presence means the bytes are durably stored.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub file_id: String,
    pub chunk_index: i32,
    pub received_at: OffsetDateTime,
}

// =============================================================================
// Completed uploads
// =============================================================================

/// Publicly resolvable upload record.
///
/// `storage_key` stays empty until the object write has committed; such rows
/// are placeholders holding the id and slug and must never be served.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub upload_id: Uuid,
    pub slug: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub domain: String,
    pub storage_key: String,
    pub uploaded_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl UploadRow {
    /// Whether the object behind this record has been written.
    pub fn is_committed(&self) -> bool {
        !self.storage_key.is_empty()
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Durable progress record for a session, kept until `expires_at`.
#[derive(Debug, Clone, FromRow)]
pub struct ProgressRow {
    pub file_id: String,
    /// 0..=100, or -1 after a failure.
    pub progress: i32,
    pub result_json: Option<String>,
    pub error: Option<String>,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl ProgressRow {
    /// Decode the stored result payload, if any.
    pub fn result(&self) -> MetadataResult<Option<UploadResult>> {
        self.result_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| MetadataError::Internal(format!("stored upload result: {e}")))
    }
}
