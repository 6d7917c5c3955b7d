//! Mock implementation of Storage trait for testing

use crate::storage::{ObjectInfo, Storage, path::{split_storage_path, validate_owner}};
use actix_web::Error;
use actix_web::error::{ErrorConflict, ErrorNotFound, ErrorServiceUnavailable};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use log::info;

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// Mock implementation of Storage for testing.
///
/// Failures can be injected per operation to exercise the upload/delete
/// workflow's compensation paths.
pub struct MockObjectStore {
    // storage path -> object
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    failing_puts: AtomicUsize,
    conflicting_puts: AtomicUsize,
    fail_gets: AtomicBool,
    fail_removes: AtomicBool,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            failing_puts: AtomicUsize::new(0),
            conflicting_puts: AtomicUsize::new(0),
            fail_gets: AtomicBool::new(false),
            fail_removes: AtomicBool::new(false),
        }
    }

    /// Make the next `count` puts fail
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` puts report that the path is already taken
    pub fn conflict_next_puts(&self, count: usize) {
        self.conflicting_puts.store(count, Ordering::SeqCst);
    }

    /// Make every get fail until reset
    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Make every removal fail until reset
    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    /// Insert an object directly, bypassing write-once checks and failure injection
    pub fn insert_raw(&self, path: &str, data: &[u8], modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            path.to_string(),
            StoredObject { data: data.to_vec(), modified },
        );
    }

    /// Number of stored objects across all owners
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Clear all stored objects
    pub fn clear(&self) {
        self.objects.lock().unwrap().clear();
    }

    fn take_put_failure(&self) -> bool {
        take_one(&self.failing_puts)
    }

    fn take_put_conflict(&self) -> bool {
        take_one(&self.conflicting_puts)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MockObjectStore {
    fn put_object(&self, path: &str, data: &[u8]) -> Result<u64, Error> {
        split_storage_path(path)?;
        if self.take_put_failure() {
            return Err(ErrorServiceUnavailable("Mock: injected put failure"));
        }
        if self.take_put_conflict() {
            return Err(ErrorConflict(format!("Mock: injected conflict for {}", path)));
        }

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(path) {
            return Err(ErrorConflict(format!("Object already exists: {}", path)));
        }
        objects.insert(
            path.to_string(),
            StoredObject { data: data.to_vec(), modified: Utc::now() },
        );

        info!("Mock: Stored object {} ({} bytes)", path, data.len());
        Ok(data.len() as u64)
    }

    fn get_object(&self, path: &str) -> Result<Vec<u8>, Error> {
        split_storage_path(path)?;
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(ErrorServiceUnavailable("Mock: injected get failure"));
        }

        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|object| object.data.clone())
            .ok_or_else(|| ErrorNotFound(format!("Object not found: {}", path)))
    }

    fn remove_objects(&self, paths: &[&str]) -> Result<usize, Error> {
        for path in paths {
            split_storage_path(path)?;
        }
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(ErrorServiceUnavailable("Mock: injected remove failure"));
        }

        let mut objects = self.objects.lock().unwrap();
        let removed = paths.iter().filter(|path| objects.remove(**path).is_some()).count();
        info!("Mock: Removed {} of {} objects", removed, paths.len());
        Ok(removed)
    }

    fn object_exists(&self, path: &str) -> Result<bool, Error> {
        split_storage_path(path)?;
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    fn list_objects(&self, owner: &str) -> Result<Vec<ObjectInfo>, Error> {
        validate_owner(owner)?;
        let prefix = format!("{}/", owner);
        Ok(self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, object)| ObjectInfo {
                path: path.clone(),
                size: object.data.len() as u64,
                modified: object.modified,
            })
            .collect())
    }

    fn list_owners(&self) -> Result<Vec<String>, Error> {
        let mut owners: Vec<String> = self.objects
            .lock()
            .unwrap()
            .keys()
            .filter_map(|path| path.split_once('/').map(|(owner, _)| owner.to_string()))
            .collect();
        owners.dedup();
        Ok(owners)
    }
}
