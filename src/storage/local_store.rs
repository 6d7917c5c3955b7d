//! Local filesystem object storage implementation

use crate::config::StorageConfig;
use crate::storage::{ObjectInfo, Storage, path::{split_storage_path, validate_owner}};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use actix_web::Error;
use actix_web::error::{ErrorConflict, ErrorInternalServerError, ErrorNotFound};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

/// Local filesystem object storage implementation.
///
/// Objects live at `{base_path}/{owner}/{object_name}`. Every write goes to a
/// temp file first and is renamed into place, so a crashed write never leaves
/// a partial object under its final path.
pub struct LocalFsStore {
    storage_path: PathBuf,
    temp_path: PathBuf,
    // Serialises the exists-check and the rename that publishes an object
    publish_lock: Mutex<()>,
}

impl LocalFsStore {
    pub fn new(config: &StorageConfig) -> Result<Self, Error> {
        let storage_path = PathBuf::from(&config.base_path);
        let temp_path = PathBuf::from(&config.temp_path);

        fs::create_dir_all(&storage_path).map_err(ErrorInternalServerError)?;
        fs::create_dir_all(&temp_path).map_err(ErrorInternalServerError)?;
        info!("Using local object storage at {} (temp: {})",
              storage_path.display(), temp_path.display());

        Ok(Self {
            storage_path,
            temp_path,
            publish_lock: Mutex::new(()),
        })
    }

    /// Resolve a validated storage path to its file on disk
    fn object_file_path(&self, path: &str) -> Result<PathBuf, Error> {
        let (owner, name) = split_storage_path(path)?;
        Ok(self.storage_path.join(owner).join(name))
    }

    /// Write data into a fresh temp file and return its path
    fn write_temp_file(&self, data: &[u8]) -> io::Result<PathBuf> {
        let temp_file = self.temp_path.join(format!("{}.tmp", Uuid::new_v4()));
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_file)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(temp_file)
    }

    fn modified_at(path: &Path) -> io::Result<DateTime<Utc>> {
        let modified = fs::metadata(path)?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

impl Storage for LocalFsStore {
    fn put_object(&self, path: &str, data: &[u8]) -> Result<u64, Error> {
        let target = self.object_file_path(path)?;
        let temp_file = self.write_temp_file(data).map_err(ErrorInternalServerError)?;

        let publish = || -> Result<(), Error> {
            let _lock = self.publish_lock.lock().map_err(|_| ErrorInternalServerError("storage lock poisoned"))?;
            if target.exists() {
                return Err(ErrorConflict(format!("Object already exists: {}", path)));
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(ErrorInternalServerError)?;
            }
            fs::rename(&temp_file, &target).map_err(ErrorInternalServerError)
        };

        if let Err(e) = publish() {
            if let Err(cleanup) = fs::remove_file(&temp_file) {
                warn!("Failed to remove temp file {}: {}", temp_file.display(), cleanup);
            }
            return Err(e);
        }

        let size = data.len() as u64;
        info!("Stored object {} ({} bytes)", path, size);
        Ok(size)
    }

    fn get_object(&self, path: &str) -> Result<Vec<u8>, Error> {
        let file_path = self.object_file_path(path)?;
        match fs::read(&file_path) {
            Ok(data) => {
                debug!("Read object {} ({} bytes)", path, data.len());
                Ok(data)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ErrorNotFound(format!("Object not found: {}", path)))
            }
            Err(e) => Err(ErrorInternalServerError(e)),
        }
    }

    fn remove_objects(&self, paths: &[&str]) -> Result<usize, Error> {
        let mut removed = 0;
        for path in paths {
            let file_path = self.object_file_path(path)?;
            match fs::remove_file(&file_path) {
                Ok(()) => {
                    removed += 1;
                    info!("Removed object {}", path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Object {} already absent", path);
                }
                Err(e) => return Err(ErrorInternalServerError(e)),
            }
        }
        Ok(removed)
    }

    fn object_exists(&self, path: &str) -> Result<bool, Error> {
        Ok(self.object_file_path(path)?.is_file())
    }

    fn list_objects(&self, owner: &str) -> Result<Vec<ObjectInfo>, Error> {
        validate_owner(owner)?;
        let owner_dir = self.storage_path.join(owner);
        let entries = match fs::read_dir(&owner_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ErrorInternalServerError(e)),
        };

        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(ErrorInternalServerError)?;
            let file_type = entry.file_type().map_err(ErrorInternalServerError)?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let size = entry.metadata().map_err(ErrorInternalServerError)?.len();
            let modified = Self::modified_at(&entry.path()).map_err(ErrorInternalServerError)?;
            objects.push(ObjectInfo {
                path: format!("{}/{}", owner, name),
                size,
                modified,
            });
        }
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    fn list_owners(&self) -> Result<Vec<String>, Error> {
        let mut owners = Vec::new();
        for entry in fs::read_dir(&self.storage_path).map_err(ErrorInternalServerError)? {
            let entry = entry.map_err(ErrorInternalServerError)?;
            if entry.file_type().map_err(ErrorInternalServerError)?.is_dir() {
                owners.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        owners.sort();
        Ok(owners)
    }
}
