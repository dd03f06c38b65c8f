//! Metadata store test utilities.

use parcel_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Marks errors caused by Docker being unavailable rather than by the store.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// SQLite store in a temporary directory, removed on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    _temp_dir: Option<TempDir>,
}

#[allow(dead_code)]
impl TestMetadata {
    /// File-backed SQLite, matching a single node deployment.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("metadata.db"), None).await?;

        Ok(Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
        })
    }

    /// In-memory SQLite (faster for tests).
    pub async fn in_memory() -> MetadataResult<Self> {
        let store = SqliteStore::new(":memory:", None).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: None,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

/// PostgreSQL store backed by a throwaway container.
#[allow(dead_code)]
pub struct PostgresTestMetadata {
    pub store: Arc<dyn MetadataStore>,
    pub postgres: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "{POSTGRES_CONTAINER_START_ERR_PREFIX} Failed to start PostgreSQL container: {e}"
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials of the testcontainers postgres module.
        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let postgres = Arc::new(PostgresStore::new(&url, 5, None).await?);

        Ok(Self {
            store: postgres.clone(),
            postgres,
            _container: container,
        })
    }

    /// Start a container, or `None` when Docker is unavailable or
    /// `SKIP_POSTGRES_TESTS` is set.
    pub async fn try_new() -> Option<Self> {
        if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
            return None;
        }
        match Self::new().await {
            Ok(pg) => Some(pg),
            Err(err) if err.to_string().contains(POSTGRES_CONTAINER_START_ERR_PREFIX) => {
                eprintln!("Skipping PostgreSQL test: {err}");
                None
            }
            Err(err) => panic!("PostgreSQL store setup failed: {err}"),
        }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

/// Run a test against SQLite and, when Docker is available, PostgreSQL.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test metadata");
    test_fn.clone()(sqlite.store()).await;

    if let Some(postgres) = PostgresTestMetadata::try_new().await {
        test_fn(postgres.store()).await;
    }
}
