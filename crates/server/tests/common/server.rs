//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parcel_core::config::{AppConfig, MetadataConfig, StorageConfig};
use parcel_core::{IdProvider, RandomIdProvider};
use parcel_metadata::{MetadataStore, SqliteStore};
use parcel_server::auth::hash_token;
use parcel_server::{AppState, Coordinator, create_router};
use parcel_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Bearer token accepted by the admin endpoints of a [`TestServer`].
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Filesystem storage and SQLite metadata in a temporary directory.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(None, Arc::new(RandomIdProvider), modifier).await
    }

    /// Use `storage` instead of the filesystem backend.
    pub async fn with_storage<F>(storage: Arc<dyn ObjectStore>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(Some(storage), Arc::new(RandomIdProvider), modifier).await
    }

    /// Use `ids` for link slugs and ids.
    pub async fn with_ids<F>(ids: Arc<dyn IdProvider>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(None, ids, modifier).await
    }

    /// Use both a custom store and a custom id provider.
    pub async fn build_with<F>(
        storage: Arc<dyn ObjectStore>,
        ids: Arc<dyn IdProvider>,
        modifier: F,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(Some(storage), ids, modifier).await
    }

    async fn build<F>(
        storage: Option<Arc<dyn ObjectStore>>,
        ids: Arc<dyn IdProvider>,
        modifier: F,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage = match storage {
            Some(storage) => storage,
            None => Arc::new(
                FilesystemBackend::new(&storage_path)
                    .await
                    .expect("Failed to create storage backend"),
            ),
        };

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        config.admin.token_hash = hash_token(ADMIN_TOKEN);
        modifier(&mut config);

        let state = AppState::with_ids(config, storage, metadata, ids);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.state.coordinator
    }

    /// Send a request through the router and decode a JSON response body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
