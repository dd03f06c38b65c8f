//! Session registry repository.

use crate::error::MetadataResult;
use crate::models::SessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Result of [`SessionRepo::begin_finalize`].
#[derive(Debug, Clone)]
pub enum FinalizeClaim {
    /// The caller moved the session to 'finalizing' and owns it.
    Claimed(SessionRow),
    /// The session was not 'receiving'; it is returned unchanged.
    Busy(SessionRow),
    /// No such session.
    Missing,
}

/// Repository for upload session metadata.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Insert a session unless one already exists for the same `file_id`.
    /// Returns `true` if this call created it; an existing session is left
    /// untouched and is not an error.
    async fn create_session(&self, session: &SessionRow) -> MetadataResult<bool>;

    /// Get a session by file id.
    async fn get_session(&self, file_id: &str) -> MetadataResult<Option<SessionRow>>;

    /// Atomically transition a session from 'receiving' to 'finalizing'.
    /// Only one concurrent caller can claim a session.
    async fn begin_finalize(
        &self,
        file_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<FinalizeClaim>;

    /// Set the session state.
    async fn update_state(
        &self,
        file_id: &str,
        state: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Record chunk activity on a session.
    async fn touch_session(&self, file_id: &str, updated_at: OffsetDateTime)
    -> MetadataResult<()>;

    /// Sessions with no activity since `older_than`, oldest first.
    async fn get_inactive_sessions(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<SessionRow>>;

    /// Delete a session together with its chunk records.
    /// Returns `false` if there was no such session.
    async fn delete_session(&self, file_id: &str) -> MetadataResult<bool>;

    /// Delete a session and its chunk records only if it is still inactive
    /// since `older_than`. A chunk landing between listing and deletion keeps
    /// the session alive.
    async fn delete_inactive_session(
        &self,
        file_id: &str,
        older_than: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Number of sessions currently stored.
    async fn count_sessions(&self) -> MetadataResult<u64>;
}
