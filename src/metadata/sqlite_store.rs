//! SQLite implementation of MetadataStorage trait

use crate::config::MetadataConfig;
use crate::metadata::{
    CleanupJob, CleanupKind, CleanupStatus, FileRecord, MetadataStorage, NewCleanupJob, NewFileRecord,
};
use actix_web::Error;
use actix_web::error::{ErrorBadRequest, ErrorConflict, ErrorInternalServerError, ErrorNotFound};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS user_files (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        file_name TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        file_type TEXT NOT NULL,
        storage_path TEXT NOT NULL UNIQUE,
        uploaded_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_user_files_owner ON user_files (user_id, uploaded_at);
    CREATE TABLE IF NOT EXISTS cleanup_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        user_id TEXT NOT NULL,
        storage_path TEXT NOT NULL,
        record_id TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cleanup_jobs_status ON cleanup_jobs (status, id);
";

const RECORD_COLUMNS: &str = "id, user_id, file_name, file_size, file_type, storage_path, uploaded_at";
const JOB_COLUMNS: &str =
    "id, kind, user_id, storage_path, record_id, attempts, status, last_error, created_at, updated_at";

/// Fixed-width RFC 3339 so that text ordering matches time ordering
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_parsed<T: std::str::FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn row_to_record(row: &Row) -> rusqlite::Result<FileRecord> {
    let file_size: i64 = row.get(3)?;
    Ok(FileRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        file_name: row.get(2)?,
        file_size: file_size.max(0) as u64,
        file_type: row.get(4)?,
        storage_path: row.get(5)?,
        uploaded_at: decode_timestamp(row, 6)?,
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<CleanupJob> {
    let attempts: i64 = row.get(5)?;
    Ok(CleanupJob {
        id: row.get(0)?,
        kind: decode_parsed::<CleanupKind>(row, 1)?,
        user_id: row.get(2)?,
        storage_path: row.get(3)?,
        record_id: row.get(4)?,
        attempts: attempts.max(0) as u32,
        status: decode_parsed::<CleanupStatus>(row, 6)?,
        last_error: row.get(7)?,
        created_at: decode_timestamp(row, 8)?,
        updated_at: decode_timestamp(row, 9)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

/// SQLite implementation of MetadataStorage
pub struct SQLiteMetadataStore {
    conn: Mutex<Connection>,
}

impl SQLiteMetadataStore {
    /// Open (or create) the metadata database described by the configuration
    pub fn new(config: &MetadataConfig) -> Result<Self, Error> {
        let db_path = Path::new(&config.db_path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(ErrorInternalServerError)?;
            }
        }

        let conn = Connection::open(db_path).map_err(ErrorInternalServerError)?;
        if config.wal_mode {
            let mode: String = conn
                .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
                .map_err(ErrorInternalServerError)?;
            debug!("SQLite journal mode: {}", mode);
        }
        conn.execute_batch(SCHEMA).map_err(ErrorInternalServerError)?;

        info!("Opened metadata database at {}", db_path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| ErrorInternalServerError("metadata connection lock poisoned"))
    }
}

impl MetadataStorage for SQLiteMetadataStore {
    fn insert_record(&self, new: &NewFileRecord) -> Result<FileRecord, Error> {
        let record = FileRecord::from_new(new);
        let file_size = i64::try_from(record.file_size).map_err(ErrorBadRequest)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_files (id, user_id, file_name, file_size, file_type, storage_path, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.user_id,
                record.file_name,
                file_size,
                record.file_type,
                record.storage_path,
                encode_timestamp(&record.uploaded_at),
            ],
        ).map_err(|e| {
            if is_constraint_violation(&e) {
                warn!("Storage path already recorded: {}", record.storage_path);
                ErrorConflict(format!("Storage path already recorded: {}", record.storage_path))
            } else {
                ErrorInternalServerError(e)
            }
        })?;

        debug!("Inserted record {} for user {}", record.id, record.user_id);
        Ok(record)
    }

    fn list_records(&self, user_id: &str) -> Result<Vec<FileRecord>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM user_files WHERE user_id = ?1 ORDER BY uploaded_at DESC, rowid DESC",
            RECORD_COLUMNS
        )).map_err(ErrorInternalServerError)?;

        let rows = stmt.query_map(params![user_id], row_to_record)
            .map_err(ErrorInternalServerError)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(ErrorInternalServerError)?);
        }
        Ok(records)
    }

    fn get_record(&self, user_id: &str, id: &str) -> Result<FileRecord, Error> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM user_files WHERE id = ?1 AND user_id = ?2", RECORD_COLUMNS),
            params![id, user_id],
            row_to_record,
        )
        .optional()
        .map_err(ErrorInternalServerError)?
        .ok_or_else(|| ErrorNotFound(format!("No file found with id: {}", id)))
    }

    fn find_by_storage_path(&self, storage_path: &str) -> Result<Option<FileRecord>, Error> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM user_files WHERE storage_path = ?1", RECORD_COLUMNS),
            params![storage_path],
            row_to_record,
        )
        .optional()
        .map_err(ErrorInternalServerError)
    }

    fn delete_record(&self, user_id: &str, id: &str) -> Result<(), Error> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM user_files WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        ).map_err(ErrorInternalServerError)?;

        if deleted == 0 {
            return Err(ErrorNotFound(format!("No file found with id: {}", id)));
        }
        Ok(())
    }

    fn queue_cleanup(&self, job: &NewCleanupJob) -> Result<i64, Error> {
        let now = encode_timestamp(&Utc::now());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cleanup_jobs (kind, user_id, storage_path, record_id, attempts, status, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 'pending', ?5, ?6, ?6)",
            params![job.kind.as_str(), job.user_id, job.storage_path, job.record_id, job.reason, now],
        ).map_err(ErrorInternalServerError)?;

        let id = conn.last_insert_rowid();
        info!("Queued {} cleanup {} for {}", job.kind.as_str(), id, job.storage_path);
        Ok(id)
    }

    fn pending_cleanups(&self, limit: usize) -> Result<Vec<CleanupJob>, Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cleanup_jobs WHERE status = 'pending' ORDER BY id ASC LIMIT ?1",
            JOB_COLUMNS
        )).map_err(ErrorInternalServerError)?;

        let rows = stmt.query_map(params![limit], row_to_job)
            .map_err(ErrorInternalServerError)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(ErrorInternalServerError)?);
        }
        Ok(jobs)
    }

    fn unresolved_cleanup_paths(&self) -> Result<Vec<String>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT storage_path FROM cleanup_jobs WHERE status IN ('pending', 'abandoned')",
        ).map_err(ErrorInternalServerError)?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))
            .map_err(ErrorInternalServerError)?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row.map_err(ErrorInternalServerError)?);
        }
        Ok(paths)
    }

    fn mark_cleanup_done(&self, id: i64) -> Result<(), Error> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE cleanup_jobs SET status = 'done', updated_at = ?1 WHERE id = ?2",
            params![encode_timestamp(&Utc::now()), id],
        ).map_err(ErrorInternalServerError)?;

        if updated == 0 {
            return Err(ErrorNotFound(format!("No cleanup job with id: {}", id)));
        }
        Ok(())
    }

    fn record_cleanup_failure(&self, id: i64, error: &str, max_attempts: u32) -> Result<CleanupStatus, Error> {
        let now = encode_timestamp(&Utc::now());
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE cleanup_jobs SET attempts = attempts + 1, last_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![error, now, id],
        ).map_err(ErrorInternalServerError)?;
        if updated == 0 {
            return Err(ErrorNotFound(format!("No cleanup job with id: {}", id)));
        }

        let attempts: i64 = conn
            .query_row("SELECT attempts FROM cleanup_jobs WHERE id = ?1", params![id], |row| row.get(0))
            .map_err(ErrorInternalServerError)?;

        if attempts >= i64::from(max_attempts) {
            conn.execute(
                "UPDATE cleanup_jobs SET status = 'abandoned' WHERE id = ?1",
                params![id],
            ).map_err(ErrorInternalServerError)?;
            return Ok(CleanupStatus::Abandoned);
        }
        Ok(CleanupStatus::Pending)
    }

    fn purge_finished_cleanups(&self, older_than: DateTime<Utc>) -> Result<usize, Error> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM cleanup_jobs WHERE status IN ('done', 'abandoned') AND updated_at < ?1",
            params![encode_timestamp(&older_than)],
        ).map_err(ErrorInternalServerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SQLiteMetadataStore {
        let config = MetadataConfig {
            db_path: dir.path().join("nested").join("metadata.db").to_string_lossy().into_owned(),
            ..MetadataConfig::default()
        };
        SQLiteMetadataStore::new(&config).unwrap()
    }

    fn new_record(user_id: &str, storage_path: &str) -> NewFileRecord {
        NewFileRecord {
            user_id: user_id.to_string(),
            file_name: "report.pdf".to_string(),
            file_size: 2048,
            file_type: "application/pdf".to_string(),
            storage_path: storage_path.to_string(),
        }
    }

    #[test]
    fn test_sqlite_metadata_store_record_operations() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let first = store.insert_record(&new_record("alice", "alice/1.pdf")).unwrap();
        let second = store.insert_record(&new_record("alice", "alice/2.pdf")).unwrap();
        store.insert_record(&new_record("bob", "bob/1.pdf")).unwrap();

        let listed = store.list_records("alice").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id, "newest first");
        assert_eq!(listed[1], first);

        assert_eq!(store.get_record("alice", &first.id).unwrap(), first);
        let found = store.find_by_storage_path("alice/2.pdf").unwrap().unwrap();
        assert_eq!(found.id, second.id);
        assert!(store.find_by_storage_path("alice/none").unwrap().is_none());

        store.delete_record("alice", &first.id).unwrap();
        assert_eq!(store.list_records("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_metadata_store_ownership_and_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let record = store.insert_record(&new_record("alice", "alice/1.pdf")).unwrap();

        let err = store.get_record("bob", &record.id).unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::NOT_FOUND);
        let err = store.delete_record("bob", &record.id).unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::NOT_FOUND);
        assert!(store.get_record("alice", &record.id).is_ok());

        let err = store.insert_record(&new_record("alice", "alice/1.pdf")).unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_sqlite_metadata_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let record = open_store(&dir).insert_record(&new_record("alice", "alice/1.pdf")).unwrap();

        let reopened = open_store(&dir);
        assert_eq!(reopened.get_record("alice", &record.id).unwrap(), record);
    }

    #[test]
    fn test_sqlite_cleanup_queue() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let job = NewCleanupJob {
            kind: CleanupKind::OrphanObject,
            user_id: "alice".to_string(),
            storage_path: "alice/1.pdf".to_string(),
            record_id: None,
            reason: "record insert failed".to_string(),
        };
        let first = store.queue_cleanup(&job).unwrap();
        let second = store.queue_cleanup(&NewCleanupJob {
            kind: CleanupKind::DanglingRecord,
            record_id: Some("rec-1".to_string()),
            ..job.clone()
        }).unwrap();

        let pending = store.pending_cleanups(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].kind, CleanupKind::OrphanObject);
        assert_eq!(pending[0].last_error.as_deref(), Some("record insert failed"));
        assert_eq!(pending[1].record_id.as_deref(), Some("rec-1"));
        assert_eq!(store.pending_cleanups(1).unwrap().len(), 1);

        store.mark_cleanup_done(first).unwrap();
        assert_eq!(store.record_cleanup_failure(second, "boom", 2).unwrap(), CleanupStatus::Pending);
        assert_eq!(store.record_cleanup_failure(second, "boom again", 2).unwrap(), CleanupStatus::Abandoned);
        assert!(store.pending_cleanups(10).unwrap().is_empty());

        assert_eq!(store.purge_finished_cleanups(Utc::now() - Duration::hours(1)).unwrap(), 0);
        assert_eq!(store.purge_finished_cleanups(Utc::now() + Duration::seconds(1)).unwrap(), 2);
        assert!(store.mark_cleanup_done(first).is_err());
    }
}
