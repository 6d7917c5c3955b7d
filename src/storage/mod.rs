//! Object Storage Layer Abstraction
//!
//! This module provides an abstraction over object storage backends,
//! allowing the system to use different storage implementations (local files,
//! hosted object stores, etc.) without affecting higher-level services.
//!
//! Objects are addressed by a storage path of the form `{owner}/{object_name}`.
//! Writes are write-once: storing to an existing path is a conflict.

pub mod local_store;
pub mod mock_store;
pub mod config;
pub mod path;


use actix_web::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use path::{generate_storage_path, split_storage_path, validate_storage_path};

/// Listing entry for a stored object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectInfo {
    /// Full storage path (`owner/object_name`)
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Trait defining the object storage interface
pub trait Storage: Send + Sync {
    /// Store an object at `path`. Fails with a conflict if the path is taken.
    /// Returns the number of bytes written.
    fn put_object(&self, path: &str, data: &[u8]) -> Result<u64, Error>;

    /// Retrieve the object stored at `path`
    fn get_object(&self, path: &str) -> Result<Vec<u8>, Error>;

    /// Remove a batch of objects. Paths that do not exist are skipped.
    /// Returns how many objects were actually removed.
    fn remove_objects(&self, paths: &[&str]) -> Result<usize, Error>;

    /// Check if an object exists
    fn object_exists(&self, path: &str) -> Result<bool, Error>;

    /// List all objects stored under an owner prefix
    fn list_objects(&self, owner: &str) -> Result<Vec<ObjectInfo>, Error>;

    /// List owner prefixes that currently hold objects
    fn list_owners(&self) -> Result<Vec<String>, Error>;
}
