//! Backend selection for object storage

use crate::config::StorageConfig;
use crate::storage::{Storage, local_store::LocalFsStore, mock_store::MockObjectStore};
use actix_web::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use log::info;

/// Available object storage backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum StorageBackend {
    #[default]
    LocalFs,
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "localfs" | "local_fs" | "local" | "fs" => Ok(StorageBackend::LocalFs),
            "mock" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s))
        }
    }
}

/// Create an object storage instance based on the configuration
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn Storage>, Error> {
    match config.backend {
        StorageBackend::LocalFs => {
            info!("Creating local filesystem object store");
            Ok(Arc::new(LocalFsStore::new(config)?))
        }
        StorageBackend::Mock => {
            info!("Creating mock object store");
            Ok(Arc::new(MockObjectStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("localfs".parse::<StorageBackend>().unwrap(), StorageBackend::LocalFs);
        assert_eq!("LocalFs".parse::<StorageBackend>().unwrap(), StorageBackend::LocalFs);
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::LocalFs);
        assert_eq!("mock".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);
        assert_eq!("MOCK".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);

        assert!("invalid".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_create_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let local_config = StorageConfig {
            backend: StorageBackend::LocalFs,
            base_path: dir.path().join("objects").to_string_lossy().into_owned(),
            temp_path: dir.path().join("temp").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let mock_config = StorageConfig { backend: StorageBackend::Mock, ..StorageConfig::default() };

        let local_store = create_store(&local_config).unwrap();
        let mock_store = create_store(&mock_config).unwrap();

        assert!(local_store.list_owners().unwrap().is_empty());
        assert!(mock_store.list_owners().unwrap().is_empty());
    }
}
