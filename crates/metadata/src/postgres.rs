//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{ChunkRepo, FinalizeClaim, ProgressRepo, SessionRepo, UploadRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Split the schema into single statements.
///
/// Comment lines are removed first so a `;` inside a comment cannot cut a
/// statement in two.
fn postgres_schema_statements(schema: &str) -> Vec<String> {
    let sql: String = schema
        .lines()
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");

    sql.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(String::from)
        .collect()
}

/// Chunk indices are stored in an `INTEGER` column.
fn chunk_index_column(chunk_index: u32) -> MetadataResult<i32> {
    i32::try_from(chunk_index)
        .map_err(|_| MetadataError::Constraint(format!("chunk index {chunk_index} out of range")))
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a connection URL and run migrations.
    pub async fn new(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::from_str(url)?;

        // Bounds every query, including long ledger scans during sweeps.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepo for PostgresStore {
    async fn create_session(&self, session: &SessionRow) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                file_id, file_name, file_type, file_size, total_chunks,
                state, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (file_id) DO NOTHING
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
        let row =
            sqlx::query_as::<_, SessionRow>("SELECT * FROM upload_sessions WHERE file_id = $1")
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
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent finalize attempts on one session.
        let Some(mut session) = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM upload_sessions WHERE file_id = $1 FOR UPDATE",
        )
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.commit().await?;
            return Ok(FinalizeClaim::Missing);
        };

        if session.state != "receiving" {
            tx.commit().await?;
            return Ok(FinalizeClaim::Busy(session));
        }

        sqlx::query(
            "UPDATE upload_sessions SET state = 'finalizing', updated_at = $1 WHERE file_id = $2",
        )
        .bind(updated_at)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

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
            "UPDATE upload_sessions SET state = $1, updated_at = $2 WHERE file_id = $3",
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

    async fn touch_session(&self, file_id: &str, updated_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE upload_sessions SET updated_at = $1 WHERE file_id = $2")
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
            "SELECT * FROM upload_sessions WHERE updated_at < $1 ORDER BY updated_at LIMIT $2",
        )
        .bind(older_than)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_session(&self, file_id: &str) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM upload_chunks WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM upload_sessions WHERE file_id = $1")
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
            sqlx::query("DELETE FROM upload_sessions WHERE file_id = $1 AND updated_at < $2")
                .bind(file_id)
                .bind(older_than)
                .execute(&mut *tx)
                .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            sqlx::query("DELETE FROM upload_chunks WHERE file_id = $1")
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
impl ChunkRepo for PostgresStore {
    async fn record_chunk(
        &self,
        file_id: &str,
        chunk_index: u32,
        received_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "INSERT INTO upload_chunks (file_id, chunk_index, received_at) VALUES ($1, $2, $3) ON CONFLICT (file_id, chunk_index) DO NOTHING",
        )
        .bind(file_id)
        .bind(chunk_index_column(chunk_index)?)
        .bind(received_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_chunk_recorded(&self, file_id: &str, chunk_index: u32) -> MetadataResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM upload_chunks WHERE file_id = $1 AND chunk_index = $2)",
        )
        .bind(file_id)
        .bind(chunk_index_column(chunk_index)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn count_chunks(&self, file_id: &str) -> MetadataResult<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_chunks WHERE file_id = $1")
            .bind(file_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    async fn list_chunks(&self, file_id: &str) -> MetadataResult<Vec<u32>> {
        let indices: Vec<i32> = sqlx::query_scalar(
            "SELECT chunk_index FROM upload_chunks WHERE file_id = $1 ORDER BY chunk_index ASC",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(indices.into_iter().map(|i| i as u32).collect())
    }

    async fn delete_chunks(&self, file_id: &str) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM upload_chunks WHERE file_id = $1")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UploadRepo for PostgresStore {
    async fn create_upload(&self, upload: &UploadRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads (
                upload_id, slug, filename, content_type, size, domain,
                storage_key, uploaded_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
        let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE upload_id = $1")
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_upload_by_slug(&self, slug: &str) -> MetadataResult<Option<UploadRow>> {
        let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE slug = $1")
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
            sqlx::query("UPDATE uploads SET storage_key = $1, domain = $2 WHERE upload_id = $3")
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
        let result = sqlx::query("DELETE FROM uploads WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProgressRepo for PostgresStore {
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (file_id) DO UPDATE SET
                progress = EXCLUDED.progress,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            WHERE upload_progress.progress >= 0
              AND upload_progress.progress < EXCLUDED.progress
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
            VALUES ($1, -1, $2, $3, $4)
            ON CONFLICT (file_id) DO UPDATE SET
                progress = -1,
                error = EXCLUDED.error,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
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
            VALUES ($1, 100, $2, $3, $4)
            ON CONFLICT (file_id) DO UPDATE SET
                progress = 100,
                result_json = EXCLUDED.result_json,
                error = NULL,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
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
            "SELECT * FROM upload_progress WHERE file_id = $1 AND expires_at > $2",
        )
        .bind(file_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_expired_progress(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM upload_progress WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
