//! Finalize and simple-upload commit paths.

use super::{Coordinator, UploadError};
use crate::metrics;
use bytes::Bytes;
use parcel_core::config::AppConfig;
use parcel_core::domain::{public_url, relative_url, resolve_domain};
use parcel_core::validate::{normalize_content_type, sanitize_file_name, validate_file};
use parcel_core::{ExpiresIn, FileId, FinalizeRequest, SessionState, UploadResult, final_key};
use parcel_metadata::models::UploadRow;
use parcel_metadata::repos::FinalizeClaim;
use parcel_storage::{CommitStrategy, PartProgress, StorageError};
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::instrument;
use uuid::Uuid;

/// Extra time past the storage deadline for aborting a multipart upload
/// before the whole operation is abandoned.
const ABORT_GRACE: std::time::Duration = std::time::Duration::from_secs(30);

/// A whole-file upload that skips the chunk ledger.
#[derive(Clone, Debug)]
pub struct SimpleUpload {
    /// Optional id under which progress is published.
    pub session_id: Option<FileId>,
    pub file_name: String,
    pub file_type: Option<String>,
    pub expires: Option<String>,
    pub domain: Option<String>,
}

/// Side effects of a commit attempt that must be undone on failure.
#[derive(Debug, Default)]
struct Attempt {
    /// The session was moved to 'finalizing' by this attempt.
    claimed: bool,
    /// Upload row inserted with an empty storage key.
    placeholder: Option<Uuid>,
    /// Object written but not yet attached to the upload row.
    stored_key: Option<String>,
}

/// Validated file attributes for a commit.
struct PreparedFile {
    file_name: String,
    content_type: String,
    size: u64,
    expires: ExpiresIn,
    domain: String,
}

impl PreparedFile {
    fn resolve(
        config: &AppConfig,
        file_name: &str,
        file_type: Option<&str>,
        size: u64,
        expires: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Self, UploadError> {
        let file_name = sanitize_file_name(file_name)?;
        let content_type = normalize_content_type(file_type);
        validate_file(&config.upload, &file_name, &content_type, size)?;
        let domain = resolve_domain(domain, &config.domains.allowed)
            .ok_or_else(|| parcel_core::Error::InvalidDomain("no allowed domains".to_string()))?
            .to_string();

        Ok(Self {
            file_name,
            content_type,
            size,
            expires: ExpiresIn::resolve(expires, config.upload.default_expiry),
            domain,
        })
    }
}

/// Maps multipart part completion onto a slice of the 0..=100 scale.
#[derive(Clone, Copy)]
struct ProgressSpan<'a> {
    session_id: &'a str,
    from: i32,
    to: i32,
}

impl ProgressSpan<'_> {
    fn at(&self, part: PartProgress) -> i32 {
        if part.total == 0 {
            return self.to;
        }
        let width = i64::from(self.to - self.from);
        let done = i64::try_from(part.completed.min(part.total)).unwrap_or(0);
        let total = i64::try_from(part.total).unwrap_or(1);
        self.from + i32::try_from(width * done / total).unwrap_or(0)
    }
}

impl Coordinator {
    /// Assemble a complete session and commit it as a public upload.
    ///
    /// Only one finalize can own a session at a time. On failure every side
    /// effect of the attempt is rolled back and the session returns to
    /// `receiving` so the client can retry, except for a size mismatch which
    /// leaves the session `failed`.
    #[instrument(skip(self, request), fields(file_id = %file_id))]
    pub async fn finalize(
        &self,
        file_id: &FileId,
        request: &FinalizeRequest,
    ) -> Result<UploadResult, UploadError> {
        let started = Instant::now();
        let limit = self.config.server.finalize_timeout();
        let deadline = tokio::time::Instant::now() + limit;
        let mut attempt = Attempt::default();

        let outcome = tokio::time::timeout_at(
            deadline + ABORT_GRACE,
            self.run_finalize(file_id, request, deadline, &mut attempt),
        )
        .await
        .unwrap_or(Err(UploadError::Timeout(limit)));

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "Finalize failed");
            self.rollback(Some(file_id), &attempt, e).await;
        }
        self.settle(Some(file_id.as_str()), "chunked", &outcome, started)
            .await;
        outcome
    }

    async fn run_finalize(
        &self,
        file_id: &FileId,
        request: &FinalizeRequest,
        deadline: tokio::time::Instant,
        attempt: &mut Attempt,
    ) -> Result<UploadResult, UploadError> {
        let id = file_id.as_str();
        let session = self.session(file_id).await?;

        let received = self.metadata.list_chunks(id).await?;
        let count = u32::try_from(received.len()).unwrap_or(u32::MAX);
        if count < session.total_chunks {
            return Err(UploadError::IncompleteUpload {
                received: count,
                total: session.total_chunks,
                missing: session.missing_indices(&received),
            });
        }

        let session = match self
            .metadata
            .begin_finalize(id, OffsetDateTime::now_utc())
            .await?
        {
            FinalizeClaim::Claimed(row) => {
                attempt.claimed = true;
                row.to_session()?
            }
            FinalizeClaim::Busy(row) => {
                return Err(UploadError::SessionBusy {
                    file_id: id.to_string(),
                    state: row.to_session()?.state,
                });
            }
            FinalizeClaim::Missing => return Err(UploadError::NotFound(id.to_string())),
        };
        tracing::info!(chunks = count, "Finalize started");

        let file = PreparedFile::resolve(
            &self.config,
            request.file_name.as_deref().unwrap_or(&session.file_name),
            request
                .file_type
                .as_deref()
                .or(Some(session.file_type.as_str())),
            request.file_size.unwrap_or(session.file_size),
            request.expires.as_deref(),
            request.domain.as_deref(),
        )?;

        let data = self.relay.read_all(file_id, &received).await?;
        let actual = data.len() as u64;
        if actual != file.size {
            return Err(UploadError::SizeMismatch {
                expected: file.size,
                actual,
            });
        }

        let result = self.commit(file, data, None, deadline, attempt).await?;

        // The upload is public now; cleanup failures only leave garbage for the sweep.
        let cleanup = self.relay.clear_chunks(file_id).await;
        if cleanup.failed > 0 {
            tracing::warn!(failed = cleanup.failed, "Some chunk objects were not removed");
        }
        if let Err(e) = self.metadata.delete_session(id).await {
            tracing::warn!(error = %e, "Failed to delete finalized session");
        }

        Ok(result)
    }

    /// Commit a whole file received in one request.
    ///
    /// Progress is published under `session_id` when one is given: 5 on
    /// receipt, 10 after validation, per multipart part up to 95, then 100.
    #[instrument(skip(self, upload, data), fields(session_id = ?upload.session_id, size = data.len()))]
    pub async fn upload_simple(
        &self,
        upload: SimpleUpload,
        data: Bytes,
    ) -> Result<UploadResult, UploadError> {
        let started = Instant::now();
        let limit = self.config.server.finalize_timeout();
        let deadline = tokio::time::Instant::now() + limit;
        let mut attempt = Attempt::default();

        let outcome = tokio::time::timeout_at(
            deadline + ABORT_GRACE,
            self.run_simple(&upload, data, deadline, &mut attempt),
        )
        .await
        .unwrap_or(Err(UploadError::Timeout(limit)));

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "Simple upload failed");
            self.rollback(None, &attempt, e).await;
        }
        let session_id = upload.session_id.as_ref().map(FileId::as_str);
        self.settle(session_id, "simple", &outcome, started).await;
        outcome
    }

    async fn run_simple(
        &self,
        upload: &SimpleUpload,
        data: Bytes,
        deadline: tokio::time::Instant,
        attempt: &mut Attempt,
    ) -> Result<UploadResult, UploadError> {
        let session_id = upload.session_id.as_ref().map(FileId::as_str);
        if let Some(id) = session_id {
            self.notifier.publish_progress(id, 5).await;
        }

        let file = PreparedFile::resolve(
            &self.config,
            &upload.file_name,
            upload.file_type.as_deref(),
            data.len() as u64,
            upload.expires.as_deref(),
            upload.domain.as_deref(),
        )?;

        let span = session_id.map(|id| ProgressSpan {
            session_id: id,
            from: 10,
            to: 95,
        });
        if let Some(id) = session_id {
            self.notifier.publish_progress(id, 10).await;
        }

        self.commit(file, data, span, deadline, attempt).await
    }

    /// Reserve a link, write the object and attach it to the link.
    async fn commit(
        &self,
        file: PreparedFile,
        data: Bytes,
        span: Option<ProgressSpan<'_>>,
        deadline: tokio::time::Instant,
        attempt: &mut Attempt,
    ) -> Result<UploadResult, UploadError> {
        let now = OffsetDateTime::now_utc();
        let expires_at = file.expires.expires_at(now);
        let row = self.reserve_upload(&file, now, expires_at).await?;
        attempt.placeholder = Some(row.upload_id);

        let key = final_key(&row.upload_id, &file.file_name);
        // A write that fails or times out may still have landed.
        attempt.stored_key = Some(key.clone());
        let strategy = self
            .write_object(&key, data, &file.content_type, span, deadline)
            .await?;
        metrics::COMMIT_STRATEGY
            .with_label_values(&[strategy.as_str()])
            .inc();

        self.metadata
            .set_upload_storage(row.upload_id, &key, &file.domain)
            .await?;
        attempt.placeholder = None;
        attempt.stored_key = None;

        Ok(UploadResult {
            url: relative_url(&row.slug),
            public_url: public_url(&file.domain, &row.slug),
            slug: row.slug,
            filename: file.file_name,
            size: file.size,
            content_type: file.content_type,
            domain: file.domain,
            expires_at,
            completed: true,
        })
    }

    /// Insert a placeholder upload row under a fresh id and slug.
    ///
    /// Uniqueness is enforced by the store; a conflicting insert is retried
    /// with new identifiers up to `server.max_id_attempts` times.
    async fn reserve_upload(
        &self,
        file: &PreparedFile,
        now: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<UploadRow, UploadError> {
        let attempts = self.config.server.max_id_attempts;
        for attempt in 1..=attempts {
            let row = UploadRow {
                upload_id: self.ids.upload_id(),
                slug: self.ids.slug(),
                filename: file.file_name.clone(),
                content_type: file.content_type.clone(),
                size: i64::try_from(file.size).unwrap_or(i64::MAX),
                domain: file.domain.clone(),
                storage_key: String::new(),
                uploaded_at: now,
                expires_at,
            };
            match self.metadata.create_upload(&row).await {
                Ok(()) => return Ok(row),
                Err(e) if e.is_conflict() => {
                    metrics::ID_COLLISIONS.inc();
                    tracing::debug!(attempt, slug = %row.slug, "Link id collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(UploadError::IdGenerationExhausted { attempts })
    }

    async fn write_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        span: Option<ProgressSpan<'_>>,
        deadline: tokio::time::Instant,
    ) -> Result<CommitStrategy, UploadError> {
        let outcome = match span {
            None => {
                self.relay
                    .commit_final_before(key, data, content_type, None, Some(deadline))
                    .await
            }
            Some(span) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<PartProgress>();
                let commit = self.relay.commit_final_before(
                    key,
                    data,
                    content_type,
                    Some(tx),
                    Some(deadline),
                );
                // Ends once the commit drops its sender.
                let forward = async {
                    while let Some(part) = rx.recv().await {
                        self.notifier
                            .publish_progress(span.session_id, span.at(part))
                            .await;
                    }
                };
                let (outcome, ()) = tokio::join!(commit, forward);
                outcome
            }
        };

        outcome.map_err(|e| match e {
            StorageError::Timeout(_) => UploadError::Timeout(self.config.server.finalize_timeout()),
            other => UploadError::Storage(other),
        })
    }

    /// Undo the side effects recorded in `attempt`. Best-effort.
    async fn rollback(&self, file_id: Option<&FileId>, attempt: &Attempt, error: &UploadError) {
        if let Some(key) = &attempt.stored_key
            && let Err(e) = self.relay.store().delete(key).await
        {
            tracing::warn!(key = %key, error = %e, "Failed to remove uncommitted object");
        }
        if let Some(upload_id) = attempt.placeholder
            && let Err(e) = self.metadata.delete_upload(upload_id).await
        {
            tracing::warn!(upload_id = %upload_id, error = %e, "Failed to remove placeholder upload");
        }

        if attempt.claimed
            && let Some(file_id) = file_id
        {
            // Assembled bytes that disagree with the declared size will not
            // improve on retry; keep the session for inspection.
            let next = match error {
                UploadError::SizeMismatch { .. } => SessionState::Failed,
                _ => SessionState::Receiving,
            };
            match self
                .metadata
                .update_state(file_id.as_str(), next.as_str(), OffsetDateTime::now_utc())
                .await
            {
                Ok(()) => tracing::info!(state = %next, "Session released after failed finalize"),
                Err(e) => tracing::warn!(error = %e, "Failed to release session"),
            }
        }
    }

    /// Record metrics and report the outcome to progress listeners.
    async fn settle(
        &self,
        session_id: Option<&str>,
        path: &'static str,
        outcome: &Result<UploadResult, UploadError>,
        started: Instant,
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Ok(result) => {
                metrics::FINALIZE_DURATION.observe(elapsed);
                metrics::FINALIZE_OUTCOMES
                    .with_label_values(&[path, "completed"])
                    .inc();
                tracing::info!(
                    slug = %result.slug,
                    size = result.size,
                    domain = %result.domain,
                    elapsed_secs = elapsed,
                    "Upload committed"
                );
                if let Some(id) = session_id {
                    self.notifier.publish_result(id, result).await;
                }
            }
            Err(e) => {
                metrics::FINALIZE_OUTCOMES
                    .with_label_values(&[path, e.kind()])
                    .inc();
                metrics::record_upload_error(e.kind());
                if e.is_reportable()
                    && let Some(id) = session_id
                {
                    self.notifier.publish_error(id, &e.to_string()).await;
                }
            }
        }
    }
}
