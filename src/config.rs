//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use std::env;
use log::{info, warn};

use crate::storage::config::StorageBackend;
use crate::metadata::config::MetadataBackend;
use crate::auth::config::AuthBackend;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Metadata configuration
    pub metadata: MetadataConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Reconcile worker configuration
    pub reconcile: ReconcileConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum payload size in bytes
    pub max_payload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9710,
            workers: 4,
            max_payload_size: 104857600, // 100MB
        }
    }
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,
    /// Base path for stored objects
    pub base_path: String,
    /// Temporary path for in-progress writes
    pub temp_path: String,
    /// Largest single file accepted, in bytes
    pub max_file_size: u64,
    /// How many storage paths to try when a generated path is already taken
    pub path_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::LocalFs,
            base_path: "./data/objects".to_string(),
            temp_path: "./data/temp".to_string(),
            max_file_size: 52428800, // 50MB
            path_attempts: 3,
        }
    }
}

/// Metadata backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Metadata backend type
    pub backend: MetadataBackend,
    /// Database file path
    pub db_path: String,
    /// Enable WAL mode
    pub wal_mode: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::SQLite,
            db_path: "./data/metadata.db".to_string(),
            wal_mode: true,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Authentication backend type
    pub backend: AuthBackend,
    /// Database file path for accounts and sessions
    pub db_path: String,
    /// Session lifetime in seconds
    pub session_ttl_secs: u64,
    /// Shortest password accepted on sign up
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: AuthBackend::SQLite,
            db_path: "./data/auth.db".to_string(),
            session_ttl_secs: 3600,
            min_password_length: 6,
        }
    }
}

/// Reconcile worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Enable the reconcile worker
    pub enabled: bool,
    /// Interval between runs in seconds
    pub interval_secs: u64,
    /// Cleanup jobs processed per run
    pub batch_size: usize,
    /// Attempts before a cleanup job is abandoned
    pub retry_attempts: u32,
    /// Scan object storage for objects with no metadata row
    pub sweep_orphans: bool,
    /// Minimum object age before the sweep treats it as an orphan
    pub orphan_grace_secs: u64,
    /// How long finished jobs are kept
    pub retention_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300, // 5 minutes
            batch_size: 100,
            retry_attempts: 3,
            sweep_orphans: true,
            orphan_grace_secs: 3600,
            retention_secs: 604800, // 7 days
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `VAULT_CONFIG` or `config.yaml`, use defaults if not found
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("VAULT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file, use defaults if the file does not exist
    pub fn load_from(config_path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if Path::new(config_path).exists() {
            let content = fs::read_to_string(config_path)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", config_path);
            Ok(config)
        } else {
            warn!("Config file {} not found, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Backend selection from the environment wins over the file
    pub fn apply_env_overrides(&mut self) {
        if let Some(backend) = backend_from_env::<StorageBackend>("STORAGE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Some(backend) = backend_from_env::<MetadataBackend>("METADATA_BACKEND") {
            self.metadata.backend = backend;
        }
        if let Some(backend) = backend_from_env::<AuthBackend>("AUTH_BACKEND") {
            self.auth.backend = backend;
        }
    }
}

/// Seconds from config as a chrono duration, clamped to what chrono can hold
pub fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

fn backend_from_env<T>(var: &str) -> Option<T>
where
    T: std::str::FromStr<Err = String> + std::fmt::Debug,
{
    let value = env::var(var).ok()?;
    match value.parse::<T>() {
        Ok(backend) => {
            info!("Using {} from environment: {:?}", var, backend);
            Some(backend)
        }
        Err(e) => {
            warn!("Invalid {} in environment: {}. Keeping configured backend.", var, e);
            None
        }
    }
}
