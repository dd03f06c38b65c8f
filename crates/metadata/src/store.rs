//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChunkRepo, FinalizeClaim, ProgressRepo, SessionRepo, UploadRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    SessionRepo + ChunkRepo + UploadRepo + ProgressRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        let opts = if path.as_os_str() == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        };

        let opts = opts
            .foreign_keys(true)
            // Avoid transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite allows a single writer; one connection serializes the
            // ledger and session transitions instead of failing them.
            .max_connections(1)
            // An in-memory database lives as long as its connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        if let Some(secs) = query_timeout_secs {
            tracing::debug!(
                query_timeout_secs = secs,
                "SQLite has no statement cancellation; query timeout is advisory"
            );
        }

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn create_session(&self, session: &SessionRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    file_id, file_name, file_type, file_size, total_chunks,
                    state, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(file_id) DO NOTHING
                "#,
            )
            .bind(&session.file_id)
            .bind(&session.file_name)
            .bind(&session.file_type)
            .bind(session.file_size)
            .bind(session.total_chunks)
            .bind(&session.state)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_session(&self, file_id: &str) -> MetadataResult<Option<SessionRow>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE file_id = ?",
            )
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn begin_finalize(
            &self,
            file_id: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<FinalizeClaim> {
            // The write takes SQLite's exclusive lock, so two finalize calls
            // cannot both observe 'receiving'.
            let mut tx = self.pool.begin().await?;

            let Some(mut session) = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE file_id = ?",
            )
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?
            else {
                tx.commit().await?;
                return Ok(FinalizeClaim::Missing);
            };

            let result = sqlx::query(
                "UPDATE upload_sessions SET state = 'finalizing', updated_at = ? WHERE file_id = ? AND state = 'receiving'",
            )
            .bind(updated_at)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            if result.rows_affected() == 0 {
                return Ok(FinalizeClaim::Busy(session));
            }
            session.state = "finalizing".to_string();
            session.updated_at = updated_at;
            Ok(FinalizeClaim::Claimed(session))
        }

        async fn update_state(
            &self,
            file_id: &str,
            state: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET state = ?, updated_at = ? WHERE file_id = ?",
            )
            .bind(state)
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("session {file_id}")));
            }
            Ok(())
        }

        async fn touch_session(
            &self,
            file_id: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE upload_sessions SET updated_at = ? WHERE file_id = ?")
                .bind(updated_at)
                .bind(file_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn get_inactive_sessions(
            &self,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<SessionRow>> {
            let rows = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE updated_at < ? ORDER BY updated_at LIMIT ?",
            )
            .bind(older_than)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_session(&self, file_id: &str) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM upload_chunks WHERE file_id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM upload_sessions WHERE file_id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_inactive_session(
            &self,
            file_id: &str,
            older_than: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            let result =
                sqlx::query("DELETE FROM upload_sessions WHERE file_id = ? AND updated_at < ?")
                    .bind(file_id)
                    .bind(older_than)
                    .execute(&mut *tx)
                    .await?;
            let deleted = result.rows_affected() > 0;
            if deleted {
                sqlx::query("DELETE FROM upload_chunks WHERE file_id = ?")
                    .bind(file_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(deleted)
        }

        async fn count_sessions(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn record_chunk(
            &self,
            file_id: &str,
            chunk_index: u32,
            received_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO upload_chunks (file_id, chunk_index, received_at) VALUES (?, ?, ?) ON CONFLICT(file_id, chunk_index) DO NOTHING",
            )
            .bind(file_id)
            .bind(i64::from(chunk_index))
            .bind(received_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn is_chunk_recorded(&self, file_id: &str, chunk_index: u32) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM upload_chunks WHERE file_id = ? AND chunk_index = ?)",
            )
            .bind(file_id)
            .bind(i64::from(chunk_index))
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn count_chunks(&self, file_id: &str) -> MetadataResult<u32> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_chunks WHERE file_id = ?")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u32)
        }

        async fn list_chunks(&self, file_id: &str) -> MetadataResult<Vec<u32>> {
            let indices: Vec<i64> = sqlx::query_scalar(
                "SELECT chunk_index FROM upload_chunks WHERE file_id = ? ORDER BY chunk_index ASC",
            )
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(indices.into_iter().map(|i| i as u32).collect())
        }

        async fn delete_chunks(&self, file_id: &str) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM upload_chunks WHERE file_id = ?")
                .bind(file_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_upload(&self, upload: &UploadRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO uploads (
                    upload_id, slug, filename, content_type, size, domain,
                    storage_key, uploaded_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(upload.upload_id)
            .bind(&upload.slug)
            .bind(&upload.filename)
            .bind(&upload.content_type)
            .bind(upload.size)
            .bind(&upload.domain)
            .bind(&upload.storage_key)
            .bind(upload.uploaded_at)
            .bind(upload.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || {
                    format!("upload {} / slug {}", upload.upload_id, upload.slug)
                })
            })?;
            Ok(())
        }

        async fn get_upload(&self, upload_id: Uuid) -> MetadataResult<Option<UploadRow>> {
            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE upload_id = ?")
                .bind(upload_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_upload_by_slug(&self, slug: &str) -> MetadataResult<Option<UploadRow>> {
            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE slug = ?")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn set_upload_storage(
            &self,
            upload_id: Uuid,
            storage_key: &str,
            domain: &str,
        ) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE uploads SET storage_key = ?, domain = ? WHERE upload_id = ?")
                    .bind(storage_key)
                    .bind(domain)
                    .bind(upload_id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("upload {upload_id}")));
            }
            Ok(())
        }

        async fn delete_upload(&self, upload_id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM uploads WHERE upload_id = ?")
                .bind(upload_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl ProgressRepo for SqliteStore {
        async fn record_progress(
            &self,
            file_id: &str,
            progress: i32,
            updated_at: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO upload_progress (file_id, progress, updated_at, expires_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(file_id) DO UPDATE SET
                    progress = excluded.progress,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at
                WHERE upload_progress.progress >= 0
                  AND upload_progress.progress < excluded.progress
                "#,
            )
            .bind(file_id)
            .bind(progress)
            .bind(updated_at)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn record_failure(
            &self,
            file_id: &str,
            error: &str,
            updated_at: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO upload_progress (file_id, progress, error, updated_at, expires_at)
                VALUES (?, -1, ?, ?, ?)
                ON CONFLICT(file_id) DO UPDATE SET
                    progress = -1,
                    error = excluded.error,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at
                WHERE upload_progress.result_json IS NULL
                "#,
            )
            .bind(file_id)
            .bind(error)
            .bind(updated_at)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn record_result(
            &self,
            file_id: &str,
            result_json: &str,
            updated_at: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO upload_progress (file_id, progress, result_json, updated_at, expires_at)
                VALUES (?, 100, ?, ?, ?)
                ON CONFLICT(file_id) DO UPDATE SET
                    progress = 100,
                    result_json = excluded.result_json,
                    error = NULL,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(file_id)
            .bind(result_json)
            .bind(updated_at)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_progress(
            &self,
            file_id: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<Option<ProgressRow>> {
            let row = sqlx::query_as::<_, ProgressRow>(
                "SELECT * FROM upload_progress WHERE file_id = ? AND expires_at > ?",
            )
            .bind(file_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_expired_progress(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM upload_progress WHERE expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Upload sessions (session registry)
CREATE TABLE IF NOT EXISTS upload_sessions (
    file_id TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    file_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'receiving',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_updated ON upload_sessions(updated_at);

-- Received chunks (chunk ledger)
CREATE TABLE IF NOT EXISTS upload_chunks (
    file_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    received_at TEXT NOT NULL,
    PRIMARY KEY (file_id, chunk_index)
);

-- Completed uploads, storage_key is empty until the object is written
CREATE TABLE IF NOT EXISTS uploads (
    upload_id BLOB PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    domain TEXT NOT NULL,
    storage_key TEXT NOT NULL DEFAULT '',
    uploaded_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_uploads_expires ON uploads(expires_at);

-- Durable progress for polling clients
CREATE TABLE IF NOT EXISTS upload_progress (
    file_id TEXT PRIMARY KEY,
    progress INTEGER NOT NULL,
    result_json TEXT,
    error TEXT,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_progress_expires ON upload_progress(expires_at);
"#;
