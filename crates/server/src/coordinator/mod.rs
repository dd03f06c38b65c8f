//! Upload coordinator.
//!
//! Drives an upload from its first chunk to a committed, publicly resolvable
//! object:
//!
//! ```text
//! created -> receiving -> ready -> finalizing -> completed
//!                  \                    |
//!                   \-------------------+--> failed
//! ```
//!
//! All bookkeeping lives in the metadata store and chunk bytes live in the
//! object store, so any number of server processes can serve chunks and
//! finalize calls for the same session.

mod finalize;
mod sweep;

pub use finalize::SimpleUpload;
pub use sweep::SweepReport;

use crate::metrics;
use crate::notifier::ProgressNotifier;
use bytes::Bytes;
use parcel_core::config::AppConfig;
use parcel_core::validate::{
    normalize_content_type, sanitize_file_name, validate_chunk_count, validate_chunk_index,
    validate_file,
};
use parcel_core::{
    ChunkReceipt, ChunkSubmission, FAILED_PROGRESS, FileId, IdProvider, ProgressSnapshot,
    SessionState, UploadPhase, UploadSession, chunk_progress,
};
use parcel_metadata::models::SessionRow;
use parcel_metadata::{MetadataError, MetadataStore};
use parcel_storage::{BlobRelay, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

/// Errors surfaced by coordinator operations.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] parcel_core::Error),

    #[error("upload session not found: {0}")]
    NotFound(String),

    #[error(
        "upload incomplete: received {received} of {total} chunks, missing {}",
        format_missing(.missing)
    )]
    IncompleteUpload {
        received: u32,
        total: u32,
        missing: Vec<u32>,
    },

    #[error("size mismatch: expected {expected} bytes, assembled {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("could not allocate a unique link after {attempts} attempts")]
    IdGenerationExhausted { attempts: u32 },

    #[error("upload session {file_id} is {state}")]
    SessionBusy {
        file_id: String,
        state: SessionState,
    },

    #[error("upload did not finish within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl UploadError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::IdGenerationExhausted { .. } => "id_exhausted",
            Self::SessionBusy { .. } => "session_busy",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage",
            Self::Metadata(_) => "metadata",
        }
    }

    /// Whether progress listeners should see this failure.
    ///
    /// Conditions the client can fix by itself (missing chunks, a finalize
    /// already running, an unknown session) leave the progress record alone.
    fn is_reportable(&self) -> bool {
        !matches!(
            self,
            Self::NotFound(_) | Self::IncompleteUpload { .. } | Self::SessionBusy { .. }
        )
    }
}

/// Render missing chunk indices for a message, listing at most five.
fn format_missing(missing: &[u32]) -> String {
    const SHOWN: usize = 5;
    let listed: Vec<String> = missing.iter().take(SHOWN).map(u32::to_string).collect();
    if missing.len() > SHOWN {
        format!("{} and {} more", listed.join(", "), missing.len() - SHOWN)
    } else {
        listed.join(", ")
    }
}

/// Orchestrates sessions, the chunk ledger, the blob relay and progress
/// reporting.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<AppConfig>,
    metadata: Arc<dyn MetadataStore>,
    relay: BlobRelay,
    notifier: Arc<dyn ProgressNotifier>,
    ids: Arc<dyn IdProvider>,
}

impl Coordinator {
    pub fn new(
        config: Arc<AppConfig>,
        metadata: Arc<dyn MetadataStore>,
        relay: BlobRelay,
        notifier: Arc<dyn ProgressNotifier>,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            config,
            metadata,
            relay,
            notifier,
            ids,
        }
    }

    pub fn relay(&self) -> &BlobRelay {
        &self.relay
    }

    pub fn notifier(&self) -> &Arc<dyn ProgressNotifier> {
        &self.notifier
    }

    /// Create the session for `file_id`, or return the existing one.
    ///
    /// The first submission's file metadata is kept; later submissions must
    /// agree on the chunk count.
    #[instrument(skip(self, submission), fields(file_id = %file_id, total_chunks = submission.total_chunks))]
    pub async fn open_session(
        &self,
        file_id: &FileId,
        submission: &ChunkSubmission,
    ) -> Result<UploadSession, UploadError> {
        validate_chunk_count(submission.total_chunks, submission.file_size)?;
        let file_name = sanitize_file_name(&submission.file_name)?;
        let file_type = normalize_content_type(submission.file_type.as_deref());
        validate_file(
            &self.config.upload,
            &file_name,
            &file_type,
            submission.file_size,
        )?;

        let now = OffsetDateTime::now_utc();
        let fresh = UploadSession {
            file_id: file_id.clone(),
            file_name,
            file_type,
            file_size: submission.file_size,
            total_chunks: submission.total_chunks,
            state: SessionState::Receiving,
            created_at: now,
            updated_at: now,
        };

        if self
            .metadata
            .create_session(&SessionRow::try_from_session(&fresh)?)
            .await?
        {
            metrics::UPLOAD_SESSIONS_CREATED.inc();
            tracing::info!(
                file_size = fresh.file_size,
                file_name = %fresh.file_name,
                "Upload session created"
            );
            return Ok(fresh);
        }

        // Lost the creation race or a retry: the stored session wins.
        let session = self.session(file_id).await?;
        if session.total_chunks != submission.total_chunks {
            return Err(parcel_core::Error::InvalidChunk(format!(
                "session expects {} chunks, submission declares {}",
                session.total_chunks, submission.total_chunks
            ))
            .into());
        }
        Ok(session)
    }

    /// Accept one chunk of an upload.
    ///
    /// Bytes are stored before the index is recorded, so a recorded index
    /// always has durable bytes behind it. Resubmitting a recorded index is
    /// acknowledged without touching storage.
    #[instrument(skip(self, submission, data), fields(file_id = %file_id, size = data.len()))]
    pub async fn submit_chunk(
        &self,
        file_id: &FileId,
        chunk_index: u32,
        submission: &ChunkSubmission,
        data: Bytes,
    ) -> Result<ChunkReceipt, UploadError> {
        validate_chunk_index(chunk_index, submission.total_chunks)?;
        if data.is_empty() {
            return Err(parcel_core::Error::InvalidChunk("chunk body is empty".to_string()).into());
        }

        let session = self.open_session(file_id, submission).await?;
        let id = file_id.as_str();

        if self.metadata.is_chunk_recorded(id, chunk_index).await? {
            metrics::CHUNKS_DUPLICATE.inc();
            tracing::debug!(chunk_index, "Chunk already recorded");
            return self.receipt(&session, true).await;
        }

        if session.state != SessionState::Receiving {
            return Err(UploadError::SessionBusy {
                file_id: id.to_string(),
                state: session.state,
            });
        }

        let size = data.len() as u64;
        self.relay.store_chunk(file_id, chunk_index, data).await?;

        let now = OffsetDateTime::now_utc();
        let newly_recorded = self.metadata.record_chunk(id, chunk_index, now).await?;
        if newly_recorded {
            metrics::CHUNKS_RECEIVED.inc();
            metrics::CHUNK_BYTES.inc_by(size);
        } else {
            // A concurrent submission of the same index recorded it first.
            metrics::CHUNKS_DUPLICATE.inc();
        }
        self.metadata.touch_session(id, now).await?;

        let receipt = self.receipt(&session, !newly_recorded).await?;
        tracing::debug!(
            chunk_index,
            received = receipt.received_chunks,
            total = receipt.total_chunks,
            "Chunk recorded"
        );
        self.notifier
            .publish_progress(id, i32::from(receipt.progress))
            .await;
        Ok(receipt)
    }

    /// Look up an in-progress session.
    pub async fn session(&self, file_id: &FileId) -> Result<UploadSession, UploadError> {
        let row = self
            .metadata
            .get_session(file_id.as_str())
            .await?
            .ok_or_else(|| UploadError::NotFound(file_id.to_string()))?;
        Ok(row.to_session()?)
    }

    /// Poll view of an upload, rebuilt from durable state only.
    ///
    /// Works for in-progress sessions, for sessions that already completed
    /// (until the progress record expires) and for simple uploads that
    /// supplied a session id.
    #[instrument(skip(self), fields(file_id = %file_id))]
    pub async fn progress(&self, file_id: &FileId) -> Result<ProgressSnapshot, UploadError> {
        let id = file_id.as_str();
        let record = self.notifier.last_record(id).await;
        let session = match self.metadata.get_session(id).await? {
            Some(row) => Some(row.to_session()?),
            None => None,
        };
        if session.is_none() && record.is_none() {
            return Err(UploadError::NotFound(id.to_string()));
        }

        let (received, total) = match &session {
            Some(s) => (self.metadata.count_chunks(id).await?, s.total_chunks),
            None => (0, 0),
        };
        let result = record.as_ref().and_then(|r| r.result.clone());
        let error = record.as_ref().and_then(|r| r.error.clone());
        let progress = match &record {
            Some(r) => r.state.progress,
            None => i32::from(chunk_progress(received, total)),
        };

        let phase = match (&result, &session) {
            (Some(_), _) => UploadPhase::Completed,
            (None, Some(s)) => s.phase(received),
            (None, None) if progress == FAILED_PROGRESS => UploadPhase::Failed,
            (None, None) => UploadPhase::Finalizing,
        };
        let is_complete = result.is_some() || (session.is_some() && received >= total);

        Ok(ProgressSnapshot {
            progress,
            received_chunks: received,
            total_chunks: total,
            is_complete,
            phase,
            has_result: result.is_some(),
            result,
            error,
        })
    }

    async fn receipt(
        &self,
        session: &UploadSession,
        duplicate: bool,
    ) -> Result<ChunkReceipt, UploadError> {
        let received = self
            .metadata
            .count_chunks(session.file_id.as_str())
            .await?;
        Ok(ChunkReceipt {
            received_chunks: received,
            total_chunks: session.total_chunks,
            is_complete: received >= session.total_chunks,
            progress: chunk_progress(received, session.total_chunks),
            duplicate,
        })
    }
}
