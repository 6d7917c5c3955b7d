//! Backend selection for metadata storage

use crate::config::MetadataConfig;
use crate::metadata::{MetadataStorage, sqlite_store::SQLiteMetadataStore, mock_store::MockMetadataStore};
use actix_web::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use log::info;

/// Available metadata storage backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MetadataBackend {
    #[default]
    SQLite,
    Mock,
}

impl std::str::FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(MetadataBackend::SQLite),
            "mock" => Ok(MetadataBackend::Mock),
            _ => Err(format!("Unknown metadata backend: {}", s))
        }
    }
}

/// Create a metadata storage instance based on the configuration
pub fn create_store(config: &MetadataConfig) -> Result<Arc<dyn MetadataStorage>, Error> {
    match config.backend {
        MetadataBackend::SQLite => {
            info!("Creating SQLite metadata store");
            Ok(Arc::new(SQLiteMetadataStore::new(config)?))
        }
        MetadataBackend::Mock => {
            info!("Creating Mock metadata store");
            Ok(Arc::new(MockMetadataStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_backend_from_str() {
        assert_eq!("sqlite".parse::<MetadataBackend>().unwrap(), MetadataBackend::SQLite);
        assert_eq!("SQLite".parse::<MetadataBackend>().unwrap(), MetadataBackend::SQLite);
        assert_eq!("mock".parse::<MetadataBackend>().unwrap(), MetadataBackend::Mock);
        assert_eq!("MOCK".parse::<MetadataBackend>().unwrap(), MetadataBackend::Mock);

        assert!("invalid".parse::<MetadataBackend>().is_err());
    }

    #[test]
    fn test_create_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let sqlite = MetadataConfig {
            backend: MetadataBackend::SQLite,
            db_path: dir.path().join("metadata.db").to_string_lossy().into_owned(),
            wal_mode: false,
        };
        let store = create_store(&sqlite).unwrap();
        assert!(store.list_records("test_user").unwrap().is_empty());

        let mock = MetadataConfig { backend: MetadataBackend::Mock, ..MetadataConfig::default() };
        let store = create_store(&mock).unwrap();
        assert!(store.list_records("test_user").unwrap().is_empty());
    }
}
