//! Application state.

use crate::coordinator::Coordinator;
use crate::notifier::{EventHub, ProgressNotifier, StoreNotifier};
use parcel_core::config::AppConfig;
use parcel_core::{IdProvider, RandomIdProvider};
use parcel_metadata::MetadataStore;
use parcel_storage::{BlobRelay, CommitPolicy, ObjectStore};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Live progress subscribers.
    pub events: EventHub,
    /// Upload coordinator.
    pub coordinator: Coordinator,
}

impl AppState {
    /// Create new application state with random link ids.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self::with_ids(config, storage, metadata, Arc::new(RandomIdProvider))
    }

    /// Create application state with a specific id provider.
    pub fn with_ids(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let events = EventHub::new();
        let notifier: Arc<dyn ProgressNotifier> = Arc::new(StoreNotifier::new(
            metadata.clone(),
            events.clone(),
            config.server.progress_ttl(),
        ));
        let relay = BlobRelay::new(storage.clone(), CommitPolicy::from(&config.upload));
        let coordinator = Coordinator::new(config.clone(), metadata.clone(), relay, notifier, ids);

        Self {
            config,
            storage,
            metadata,
            events,
            coordinator,
        }
    }
}
