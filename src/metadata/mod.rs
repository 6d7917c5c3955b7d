//! Metadata Storage Layer Abstraction
//!
//! This module provides an abstraction over metadata storage backends,
//! allowing the system to use different storage implementations (SQLite,
//! hosted relational stores, etc.) without affecting higher-level services.
//!
//! Two tables live behind this trait: the per-user file records that
//! describe stored objects, and the cleanup queue the reconcile worker
//! drains when one half of a file (object or record) outlives the other.

pub mod sqlite_store;
pub mod mock_store;
pub mod config;


use actix_web::Error;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata row describing one stored file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    /// Record identifier (UUID v4)
    pub id: String,
    /// Owner of the file
    pub user_id: String,
    /// Display name chosen by the user
    pub file_name: String,
    /// Size in bytes
    pub file_size: u64,
    /// MIME type reported at upload
    pub file_type: String,
    /// Object storage path holding the contents
    pub storage_path: String,
    /// Insertion time
    pub uploaded_at: DateTime<Utc>,
}

/// Row contents supplied by the caller; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileRecord {
    pub user_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub storage_path: String,
}

impl FileRecord {
    /// Materialise a new record with a fresh id and the current time.
    /// Timestamps keep microsecond precision so they survive storage unchanged.
    pub fn from_new(new: &NewFileRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id.clone(),
            file_name: new.file_name.clone(),
            file_size: new.file_size,
            file_type: new.file_type.clone(),
            storage_path: new.storage_path.clone(),
            uploaded_at: Utc::now().trunc_subsecs(6),
        }
    }
}

/// What a cleanup job has to finish
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CleanupKind {
    /// An object was written but its record never landed
    OrphanObject,
    /// An object was removed but its record could not be deleted
    DanglingRecord,
}

impl CleanupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupKind::OrphanObject => "orphan_object",
            CleanupKind::DanglingRecord => "dangling_record",
        }
    }
}

impl std::str::FromStr for CleanupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orphan_object" => Ok(CleanupKind::OrphanObject),
            "dangling_record" => Ok(CleanupKind::DanglingRecord),
            _ => Err(format!("Unknown cleanup kind: {}", s)),
        }
    }
}

/// Lifecycle of a cleanup job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CleanupStatus {
    Pending,
    Done,
    /// Gave up after the configured number of attempts
    Abandoned,
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStatus::Pending => "pending",
            CleanupStatus::Done => "done",
            CleanupStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for CleanupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CleanupStatus::Pending),
            "done" => Ok(CleanupStatus::Done),
            "abandoned" => Ok(CleanupStatus::Abandoned),
            _ => Err(format!("Unknown cleanup status: {}", s)),
        }
    }
}

/// Request to queue a cleanup job
#[derive(Debug, Clone, PartialEq)]
pub struct NewCleanupJob {
    pub kind: CleanupKind,
    pub user_id: String,
    pub storage_path: String,
    pub record_id: Option<String>,
    /// Why the job was queued
    pub reason: String,
}

/// Queued cleanup job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupJob {
    pub id: i64,
    pub kind: CleanupKind,
    pub user_id: String,
    pub storage_path: String,
    pub record_id: Option<String>,
    pub attempts: u32,
    pub status: CleanupStatus,
    /// Last error seen, starting with the reason the job was queued
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trait defining the metadata storage interface
pub trait MetadataStorage: Send + Sync {
    /// Insert a file record; a duplicate storage path is a conflict
    fn insert_record(&self, record: &NewFileRecord) -> Result<FileRecord, Error>;

    /// All records owned by a user, newest first
    fn list_records(&self, user_id: &str) -> Result<Vec<FileRecord>, Error>;

    /// A single record; records owned by someone else are not found
    fn get_record(&self, user_id: &str, id: &str) -> Result<FileRecord, Error>;

    /// Look up the record that references a storage path
    fn find_by_storage_path(&self, storage_path: &str) -> Result<Option<FileRecord>, Error>;

    /// Delete a record owned by the user
    fn delete_record(&self, user_id: &str, id: &str) -> Result<(), Error>;

    /// Queue a cleanup job and return its id
    fn queue_cleanup(&self, job: &NewCleanupJob) -> Result<i64, Error>;

    /// Oldest pending cleanup jobs, up to `limit`
    fn pending_cleanups(&self, limit: usize) -> Result<Vec<CleanupJob>, Error>;

    /// Storage paths that still have a pending or abandoned job
    fn unresolved_cleanup_paths(&self) -> Result<Vec<String>, Error>;

    /// Mark a cleanup job as done
    fn mark_cleanup_done(&self, id: i64) -> Result<(), Error>;

    /// Record a failed attempt; the job is abandoned once `max_attempts` is reached
    fn record_cleanup_failure(&self, id: i64, error: &str, max_attempts: u32) -> Result<CleanupStatus, Error>;

    /// Drop finished (done or abandoned) jobs last updated before `older_than`
    fn purge_finished_cleanups(&self, older_than: DateTime<Utc>) -> Result<usize, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_from_new() {
        let new = NewFileRecord {
            user_id: "user-1".to_string(),
            file_name: "notes.txt".to_string(),
            file_size: 42,
            file_type: "text/plain".to_string(),
            storage_path: "user-1/1-abc.txt".to_string(),
        };
        let a = FileRecord::from_new(&new);
        let b = FileRecord::from_new(&new);

        assert_eq!(a.file_name, "notes.txt");
        assert_eq!(a.storage_path, new.storage_path);
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_cleanup_enums_round_trip_through_strings() {
        for kind in [CleanupKind::OrphanObject, CleanupKind::DanglingRecord] {
            assert_eq!(kind.as_str().parse::<CleanupKind>().unwrap(), kind);
        }
        for status in [CleanupStatus::Pending, CleanupStatus::Done, CleanupStatus::Abandoned] {
            assert_eq!(status.as_str().parse::<CleanupStatus>().unwrap(), status);
        }
        assert!("other".parse::<CleanupKind>().is_err());
    }
}
