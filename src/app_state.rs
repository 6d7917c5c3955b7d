//! Application State Management
//!
//! This module provides the application state that contains all services
//! and their dependencies, following the dependency injection pattern.

use std::sync::Arc;
use actix_web::Error;
use log::info;

use crate::auth::{AuthProvider, config::create_provider, mock_store::MockAuthProvider};
use crate::config::AppConfig;
use crate::metadata::{MetadataStorage, config::create_store as create_metadata_store, mock_store::MockMetadataStore};
use crate::service::{FileService, ReconcileWorker, UploadLimits};
use crate::storage::{Storage, config::create_store as create_object_store, mock_store::MockObjectStore};

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub file_service: FileService,
    pub auth: Arc<dyn AuthProvider>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, Error> {
        info!("Initializing application state with configuration");

        info!("Using {:?} storage backend with base_path: {}, temp_path: {}",
              config.storage.backend, config.storage.base_path, config.storage.temp_path);
        let storage = create_object_store(&config.storage)?;

        info!("Using {:?} metadata backend with db_path: {}, wal_mode: {}",
              config.metadata.backend, config.metadata.db_path, config.metadata.wal_mode);
        let metadata = create_metadata_store(&config.metadata)?;

        info!("Using {:?} auth backend with db_path: {}", config.auth.backend, config.auth.db_path);
        let auth = create_provider(&config.auth)?;

        let file_service = FileService::new(storage, metadata, UploadLimits::from(&config.storage));

        info!("Application state initialized successfully");
        Ok(Self {
            file_service,
            auth,
            config,
        })
    }

    /// Create application state for testing with mock backends
    pub fn new_for_testing() -> Self {
        let storage: Arc<dyn Storage> = Arc::new(MockObjectStore::new());
        let metadata: Arc<dyn MetadataStorage> = Arc::new(MockMetadataStore::new());
        Self::with_backends(AppConfig::default(), storage, metadata, Arc::new(MockAuthProvider::new()))
    }

    /// Assemble state around already-built backends
    pub fn with_backends(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        metadata: Arc<dyn MetadataStorage>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let file_service = FileService::new(storage, metadata, UploadLimits::from(&config.storage));
        Self {
            file_service,
            auth,
            config,
        }
    }

    /// Build the reconcile worker over this state's backends
    pub fn reconcile_worker(&self) -> ReconcileWorker {
        ReconcileWorker::new(self.file_service.clone(), &self.config.reconcile).with_auth(self.auth.clone())
    }
}
