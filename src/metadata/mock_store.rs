//! Mock implementation of MetadataStorage trait for testing

use crate::metadata::{
    CleanupJob, CleanupStatus, FileRecord, MetadataStorage, NewCleanupJob, NewFileRecord,
};
use actix_web::Error;
use actix_web::error::{ErrorConflict, ErrorNotFound, ErrorServiceUnavailable};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockTables {
    // Insertion order is kept so equal timestamps still list newest first
    records: Vec<FileRecord>,
    jobs: Vec<CleanupJob>,
    next_job_id: i64,
}

/// Mock implementation of MetadataStorage for testing
pub struct MockMetadataStore {
    data: Arc<Mutex<MockTables>>,
    failing_inserts: AtomicUsize,
    fail_deletes: AtomicBool,
    fail_queue: AtomicBool,
}

impl MockMetadataStore {
    /// Create a new mock metadata store
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(MockTables::default())),
            failing_inserts: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
            fail_queue: AtomicBool::new(false),
        }
    }

    /// Make the next `count` record inserts fail
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    /// Make every record delete fail until reset
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make queueing cleanup jobs fail until reset
    pub fn set_fail_queue(&self, fail: bool) {
        self.fail_queue.store(fail, Ordering::SeqCst);
    }

    /// Number of file records across all users
    pub fn record_count(&self) -> usize {
        self.data.lock().unwrap().records.len()
    }

    /// Every cleanup job regardless of status
    pub fn cleanup_jobs(&self) -> Vec<CleanupJob> {
        self.data.lock().unwrap().jobs.clone()
    }

    /// Clear all data from the store (useful for test cleanup)
    pub fn clear(&self) {
        let mut data = self.data.lock().unwrap();
        data.records.clear();
        data.jobs.clear();
    }
}

impl Default for MockMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStorage for MockMetadataStore {
    fn insert_record(&self, new: &NewFileRecord) -> Result<FileRecord, Error> {
        let inject = self.failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(ErrorServiceUnavailable("Mock: injected insert failure"));
        }

        let mut data = self.data.lock().unwrap();
        if data.records.iter().any(|r| r.storage_path == new.storage_path) {
            return Err(ErrorConflict(format!("Storage path already recorded: {}", new.storage_path)));
        }

        let record = FileRecord::from_new(new);
        data.records.push(record.clone());
        Ok(record)
    }

    fn list_records(&self, user_id: &str) -> Result<Vec<FileRecord>, Error> {
        let data = self.data.lock().unwrap();
        let mut records: Vec<FileRecord> = data.records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(records)
    }

    fn get_record(&self, user_id: &str, id: &str) -> Result<FileRecord, Error> {
        self.data
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| r.id == id && r.user_id == user_id)
            .cloned()
            .ok_or_else(|| ErrorNotFound(format!("No file found with id: {}", id)))
    }

    fn find_by_storage_path(&self, storage_path: &str) -> Result<Option<FileRecord>, Error> {
        Ok(self.data
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| r.storage_path == storage_path)
            .cloned())
    }

    fn delete_record(&self, user_id: &str, id: &str) -> Result<(), Error> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ErrorServiceUnavailable("Mock: injected delete failure"));
        }

        let mut data = self.data.lock().unwrap();
        let before = data.records.len();
        data.records.retain(|r| !(r.id == id && r.user_id == user_id));
        if data.records.len() == before {
            return Err(ErrorNotFound(format!("No file found with id: {}", id)));
        }
        Ok(())
    }

    fn queue_cleanup(&self, job: &NewCleanupJob) -> Result<i64, Error> {
        if self.fail_queue.load(Ordering::SeqCst) {
            return Err(ErrorServiceUnavailable("Mock: injected queue failure"));
        }

        let mut data = self.data.lock().unwrap();
        data.next_job_id += 1;
        let now = Utc::now();
        let id = data.next_job_id;
        data.jobs.push(CleanupJob {
            id,
            kind: job.kind,
            user_id: job.user_id.clone(),
            storage_path: job.storage_path.clone(),
            record_id: job.record_id.clone(),
            attempts: 0,
            status: CleanupStatus::Pending,
            last_error: Some(job.reason.clone()),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    fn pending_cleanups(&self, limit: usize) -> Result<Vec<CleanupJob>, Error> {
        Ok(self.data
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|job| job.status == CleanupStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    fn unresolved_cleanup_paths(&self) -> Result<Vec<String>, Error> {
        let data = self.data.lock().unwrap();
        let mut paths: Vec<String> = data.jobs
            .iter()
            .filter(|job| job.status != CleanupStatus::Done)
            .map(|job| job.storage_path.clone())
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn mark_cleanup_done(&self, id: i64) -> Result<(), Error> {
        let mut data = self.data.lock().unwrap();
        let job = data.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| ErrorNotFound(format!("No cleanup job with id: {}", id)))?;
        job.status = CleanupStatus::Done;
        job.updated_at = Utc::now();
        Ok(())
    }

    fn record_cleanup_failure(&self, id: i64, error: &str, max_attempts: u32) -> Result<CleanupStatus, Error> {
        let mut data = self.data.lock().unwrap();
        let job = data.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| ErrorNotFound(format!("No cleanup job with id: {}", id)))?;
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        if job.attempts >= max_attempts {
            job.status = CleanupStatus::Abandoned;
        }
        Ok(job.status)
    }

    fn purge_finished_cleanups(&self, older_than: DateTime<Utc>) -> Result<usize, Error> {
        let mut data = self.data.lock().unwrap();
        let before = data.jobs.len();
        data.jobs.retain(|job| job.status == CleanupStatus::Pending || job.updated_at >= older_than);
        Ok(before - data.jobs.len())
    }
}
