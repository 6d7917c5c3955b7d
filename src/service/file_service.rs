//! Upload, list, download and delete workflow over object storage and metadata

use crate::config::StorageConfig;
use crate::metadata::{CleanupKind, FileRecord, MetadataStorage, NewCleanupJob, NewFileRecord};
use crate::service::user_context::UserContext;
use crate::storage::{generate_storage_path, Storage};
use actix_web::Error;
use actix_web::error::{ErrorBadRequest, ErrorConflict, ErrorInternalServerError, ErrorNotFound, ErrorPayloadTooLarge};
use actix_web::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

const DEFAULT_FILE_TYPE: &str = "application/octet-stream";
const MAX_FILE_NAME_CHARS: usize = 255;

fn has_status(e: &Error, status: StatusCode) -> bool {
    e.as_response_error().status_code() == status
}

/// Limits applied to every upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadLimits {
    /// Largest accepted file in bytes
    pub max_file_size: u64,
    /// Storage paths tried before giving up on collisions
    pub path_attempts: u32,
}

impl From<&StorageConfig> for UploadLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            path_attempts: config.path_attempts,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

/// One file to upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// Display name chosen by the user
    pub file_name: String,
    /// MIME type; empty means `application/octet-stream`
    pub file_type: String,
    pub data: Vec<u8>,
}

/// Step of the upload that failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    Validate,
    StoreObject,
    InsertRecord,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            UploadStage::Validate => "validate",
            UploadStage::StoreObject => "store_object",
            UploadStage::InsertRecord => "insert_record",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedUpload {
    pub file_name: String,
    pub stage: UploadStage,
    pub reason: String,
}

/// Outcome of a batch upload; one failure never stops the rest
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchUploadReport {
    pub uploaded: Vec<FileRecord>,
    pub failed: Vec<FailedUpload>,
}

/// A user's files, newest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileListing {
    pub files: Vec<FileRecord>,
    pub total_size: u64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub record: FileRecord,
    pub data: Vec<u8>,
}

/// Disagreements between a user's objects and records
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsistencyReport {
    pub user_id: String,
    /// Objects no record points at, older than the grace period
    pub orphan_objects: Vec<String>,
    /// Records whose object is missing
    pub dangling_records: Vec<FileRecord>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_objects.is_empty() && self.dangling_records.is_empty()
    }
}

/// Keeps stored objects and their metadata records in step
#[derive(Clone)]
pub struct FileService {
    storage: Arc<dyn Storage>,
    metadata: Arc<dyn MetadataStorage>,
    limits: UploadLimits,
}

impl FileService {
    pub fn new(storage: Arc<dyn Storage>, metadata: Arc<dyn MetadataStorage>, limits: UploadLimits) -> Self {
        Self { storage, metadata, limits }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStorage> {
        &self.metadata
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Store a file and record it.
    ///
    /// On return either the object and its record both exist, or neither
    /// does. The one exception is an object that could not be removed
    /// after its record failed to insert; that object is queued for the
    /// reconcile worker.
    pub fn upload_file(&self, context: &UserContext, request: UploadRequest) -> Result<FileRecord, Error> {
        self.upload_staged(context, request).map_err(|(_, e)| e)
    }

    /// Upload several files one after another
    pub fn upload_batch(&self, context: &UserContext, requests: Vec<UploadRequest>) -> BatchUploadReport {
        let mut report = BatchUploadReport::default();
        for request in requests {
            let file_name = request.file_name.clone();
            match self.upload_staged(context, request) {
                Ok(record) => report.uploaded.push(record),
                Err((stage, e)) => {
                    warn!("Batch upload of {} failed at {}: {}", file_name, stage, e);
                    report.failed.push(FailedUpload {
                        file_name,
                        stage,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Batch upload for user {}: {} uploaded, {} failed",
            context.user_id,
            report.uploaded.len(),
            report.failed.len()
        );
        report
    }

    fn upload_staged(&self, context: &UserContext, request: UploadRequest) -> Result<FileRecord, (UploadStage, Error)> {
        let (file_name, file_type) = self
            .validate_upload(&request)
            .map_err(|e| (UploadStage::Validate, e))?;

        let storage_path = self
            .store_object(context, &file_name, &request.data)
            .map_err(|e| (UploadStage::StoreObject, e))?;

        let new_record = NewFileRecord {
            user_id: context.user_id.clone(),
            file_name,
            file_size: request.data.len() as u64,
            file_type,
            storage_path,
        };

        match self.metadata.insert_record(&new_record) {
            Ok(record) => {
                info!("Uploaded {} as {} ({} bytes)", record.file_name, record.storage_path, record.file_size);
                Ok(record)
            }
            Err(e) => {
                error!("Failed to record {} for user {}: {}", new_record.storage_path, context.user_id, e);
                self.discard_unrecorded_object(context, &new_record.storage_path, &e);
                Err((UploadStage::InsertRecord, e))
            }
        }
    }

    /// Returns the trimmed display name and the effective MIME type
    fn validate_upload(&self, request: &UploadRequest) -> Result<(String, String), Error> {
        let file_name = request.file_name.trim();
        if file_name.is_empty() {
            return Err(ErrorBadRequest("File name must not be empty"));
        }
        if file_name.chars().any(char::is_control) {
            return Err(ErrorBadRequest("File name must not contain control characters"));
        }
        if file_name.chars().count() > MAX_FILE_NAME_CHARS {
            return Err(ErrorBadRequest(format!("File name longer than {} characters", MAX_FILE_NAME_CHARS)));
        }
        if request.data.len() as u64 > self.limits.max_file_size {
            return Err(ErrorPayloadTooLarge(format!(
                "{} is {} bytes, the limit is {} bytes",
                file_name,
                request.data.len(),
                self.limits.max_file_size
            )));
        }

        let file_type = match request.file_type.trim() {
            "" => DEFAULT_FILE_TYPE.to_string(),
            file_type => file_type.to_string(),
        };
        Ok((file_name.to_string(), file_type))
    }

    /// Write the object under a fresh path, regenerating the path when one is taken
    fn store_object(&self, context: &UserContext, file_name: &str, data: &[u8]) -> Result<String, Error> {
        let attempts = self.limits.path_attempts.max(1);
        for attempt in 1..=attempts {
            let storage_path = generate_storage_path(&context.user_id, file_name, Utc::now());
            match self.storage.put_object(&storage_path, data) {
                Ok(written) => {
                    debug!("Stored {} bytes at {} (attempt {})", written, storage_path, attempt);
                    return Ok(storage_path);
                }
                Err(e) if has_status(&e, StatusCode::CONFLICT) => {
                    warn!("Storage path {} already taken, attempt {} of {}", storage_path, attempt, attempts);
                }
                Err(e) => {
                    error!("Failed to store object for {}: {}", file_name, e);
                    return Err(e);
                }
            }
        }
        Err(ErrorConflict(format!("No free storage path found after {} attempts", attempts)))
    }

    /// Remove an object whose record never landed, or hand it to the reconcile worker
    fn discard_unrecorded_object(&self, context: &UserContext, storage_path: &str, cause: &Error) {
        let remove_err = match self.storage.remove_objects(&[storage_path]) {
            Ok(_) => {
                info!("Removed unrecorded object {}", storage_path);
                return;
            }
            Err(e) => e,
        };
        warn!("Could not remove unrecorded object {}: {}", storage_path, remove_err);

        let job = NewCleanupJob {
            kind: CleanupKind::OrphanObject,
            user_id: context.user_id.clone(),
            storage_path: storage_path.to_string(),
            record_id: None,
            reason: format!("record insert failed: {}; object removal failed: {}", cause, remove_err),
        };
        match self.metadata.queue_cleanup(&job) {
            Ok(id) => warn!("Queued cleanup job {} for orphaned object {}", id, storage_path),
            Err(e) => error!("Orphaned object {} could not be queued for cleanup: {}", storage_path, e),
        }
    }

    pub fn list_files(&self, context: &UserContext) -> Result<FileListing, Error> {
        let files = self.metadata.list_records(&context.user_id)?;
        let total_size = files.iter().map(|f| f.file_size).sum();
        let count = files.len();
        debug!("Listed {} files ({} bytes) for user {}", count, total_size, context.user_id);
        Ok(FileListing { files, total_size, count })
    }

    /// Fetch a file's record and contents. A record whose object is gone is not found.
    pub fn download_file(&self, context: &UserContext, id: &str) -> Result<DownloadedFile, Error> {
        let record = self.metadata.get_record(&context.user_id, id)?;
        match self.storage.get_object(&record.storage_path) {
            Ok(data) => Ok(DownloadedFile { record, data }),
            Err(e) if has_status(&e, StatusCode::NOT_FOUND) => {
                error!("Record {} references missing object {}", record.id, record.storage_path);
                Err(ErrorNotFound(format!("Contents of {} are no longer available", record.file_name)))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a file: object first, then its record.
    ///
    /// If the object cannot be removed nothing changes. If the record cannot
    /// be deleted afterwards, a cleanup job finishes the removal later.
    pub fn delete_file(&self, context: &UserContext, id: &str) -> Result<FileRecord, Error> {
        let record = self.metadata.get_record(&context.user_id, id)?;

        let removed = self.storage.remove_objects(&[record.storage_path.as_str()]).map_err(|e| {
            error!("Failed to remove object {} for record {}: {}", record.storage_path, record.id, e);
            e
        })?;
        if removed == 0 {
            warn!("Object {} was already missing when deleting record {}", record.storage_path, record.id);
        }

        match self.metadata.delete_record(&context.user_id, &record.id) {
            Ok(()) => {
                info!("Deleted {} ({})", record.file_name, record.storage_path);
                Ok(record)
            }
            Err(e) if has_status(&e, StatusCode::NOT_FOUND) => {
                debug!("Record {} was deleted concurrently", record.id);
                Ok(record)
            }
            Err(e) => {
                error!("Failed to delete record {} after removing its object: {}", record.id, e);
                let job = NewCleanupJob {
                    kind: CleanupKind::DanglingRecord,
                    user_id: context.user_id.clone(),
                    storage_path: record.storage_path.clone(),
                    record_id: Some(record.id.clone()),
                    reason: format!("record delete failed: {}", e),
                };
                match self.metadata.queue_cleanup(&job) {
                    Ok(job_id) => warn!("Queued cleanup job {} for record {}", job_id, record.id),
                    Err(queue_err) => error!("Dangling record {} could not be queued for cleanup: {}", record.id, queue_err),
                }
                Err(ErrorInternalServerError(format!(
                    "{} was removed from storage but its record could not be deleted; cleanup is scheduled",
                    record.file_name
                )))
            }
        }
    }

    /// Compare a user's objects with their records.
    /// Objects modified within `grace` are skipped since an upload writes the object before the record.
    pub fn audit_user(&self, user_id: &str, grace: Duration) -> Result<ConsistencyReport, Error> {
        let objects = self.storage.list_objects(user_id)?;
        let records = self.metadata.list_records(user_id)?;

        let referenced: HashSet<&str> = records.iter().map(|r| r.storage_path.as_str()).collect();
        let present: HashSet<&str> = objects.iter().map(|o| o.path.as_str()).collect();
        let cutoff = Utc::now().checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let orphan_objects = objects
            .iter()
            .filter(|o| !referenced.contains(o.path.as_str()) && o.modified < cutoff)
            .map(|o| o.path.clone())
            .collect();
        let dangling_records = records
            .iter()
            .filter(|r| !present.contains(r.storage_path.as_str()))
            .cloned()
            .collect();

        Ok(ConsistencyReport {
            user_id: user_id.to_string(),
            orphan_objects,
            dangling_records,
        })
    }
}
