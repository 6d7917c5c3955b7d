//! Background reconcile worker for the cleanup queue
//!
//! The request path queues a cleanup job whenever it cannot finish an
//! upload or delete on its own. This worker runs periodically to finish
//! those jobs, optionally sweeps storage for unrecorded objects, and drops
//! finished jobs and expired sessions once they are old enough.

use crate::auth::AuthProvider;
use crate::config::{seconds, ReconcileConfig};
use crate::metadata::{CleanupJob, CleanupKind, CleanupStatus, NewCleanupJob};
use crate::service::file_service::FileService;
use actix_web::Error;
use actix_web::error::ErrorInternalServerError;
use actix_web::http::StatusCode;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Counts from a single reconcile run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub abandoned: usize,
    pub orphans_queued: usize,
    pub dangling_reported: usize,
    pub purged: usize,
    pub sessions_purged: usize,
}

/// Background reconcile worker
pub struct ReconcileWorker {
    files: FileService,
    auth: Option<Arc<dyn AuthProvider>>,
    batch_size: usize,
    interval: Duration,
    retry_attempts: u32,
    sweep_orphans: bool,
    orphan_grace: ChronoDuration,
    retention: ChronoDuration,
}

impl ReconcileWorker {
    pub fn new(files: FileService, config: &ReconcileConfig) -> Self {
        Self {
            files,
            auth: None,
            batch_size: config.batch_size.max(1),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            retry_attempts: config.retry_attempts.max(1),
            sweep_orphans: config.sweep_orphans,
            orphan_grace: seconds(config.orphan_grace_secs),
            retention: seconds(config.retention_secs),
        }
    }

    /// Also purge expired sessions from `auth` on every run
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Start the reconcile worker as a background task (non-blocking)
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        info!("Starting reconcile worker with {}s interval", self.interval.as_secs());

        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(summary) if summary != ReconcileSummary::default() => {
                        info!("Reconcile run finished: {:?}", summary);
                    }
                    Ok(_) => debug!("Reconcile run found nothing to do"),
                    Err(e) => error!("Error during reconcile run: {}", e),
                }
            }
        })
    }

    /// One pass: drain pending jobs, sweep for orphans, purge old jobs
    pub async fn run_once(&self) -> Result<ReconcileSummary, Error> {
        let mut summary = ReconcileSummary::default();
        let metadata = self.files.metadata();

        let jobs = metadata.pending_cleanups(self.batch_size).map_err(|e| {
            error!("Failed to get pending cleanup jobs: {}", e);
            e
        })?;
        if !jobs.is_empty() {
            info!("Processing {} cleanup jobs", jobs.len());
        }

        for job in jobs {
            summary.processed += 1;
            match self.process_job(&job) {
                Ok(()) => match metadata.mark_cleanup_done(job.id) {
                    Ok(()) => summary.completed += 1,
                    Err(e) => error!("Failed to mark cleanup job {} as done: {}", job.id, e),
                },
                Err(e) => {
                    warn!("Cleanup job {} ({}) failed: {}", job.id, job.kind.as_str(), e);
                    match metadata.record_cleanup_failure(job.id, &e.to_string(), self.retry_attempts) {
                        Ok(CleanupStatus::Abandoned) => {
                            error!(
                                "Abandoned cleanup job {} for {} after {} attempts",
                                job.id, job.storage_path, self.retry_attempts
                            );
                            summary.abandoned += 1;
                        }
                        Ok(_) => summary.retried += 1,
                        Err(e) => error!("Failed to record failure of cleanup job {}: {}", job.id, e),
                    }
                }
            }
            // Let request handlers run between jobs
            tokio::task::yield_now().await;
        }

        if self.sweep_orphans {
            if let Err(e) = self.sweep(&mut summary) {
                warn!("Orphan sweep failed: {}", e);
            }
        }

        let cutoff = Utc::now().checked_sub_signed(self.retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        match metadata.purge_finished_cleanups(cutoff) {
            Ok(purged) => summary.purged = purged,
            Err(e) => warn!("Failed to purge finished cleanup jobs: {}", e),
        }

        if let Some(auth) = &self.auth {
            match auth.purge_expired_sessions() {
                Ok(purged) => summary.sessions_purged = purged,
                Err(e) => warn!("Failed to purge expired sessions: {}", e),
            }
        }

        Ok(summary)
    }

    fn process_job(&self, job: &CleanupJob) -> Result<(), Error> {
        let storage = self.files.storage();
        let metadata = self.files.metadata();

        match job.kind {
            CleanupKind::OrphanObject => {
                // A record may have been written for this path since the job was queued
                if let Some(record) = metadata.find_by_storage_path(&job.storage_path)? {
                    info!("Object {} is now referenced by record {}, keeping it", job.storage_path, record.id);
                    return Ok(());
                }
                let removed = storage.remove_objects(&[job.storage_path.as_str()])?;
                info!("Removed orphaned object {} ({} removed)", job.storage_path, removed);
                Ok(())
            }
            CleanupKind::DanglingRecord => {
                let record_id = job.record_id.as_deref().ok_or_else(|| {
                    ErrorInternalServerError(format!("Cleanup job {} has no record id", job.id))
                })?;
                storage.remove_objects(&[job.storage_path.as_str()])?;
                match metadata.delete_record(&job.user_id, record_id) {
                    Ok(()) => {
                        info!("Deleted dangling record {}", record_id);
                        Ok(())
                    }
                    Err(e) if e.as_response_error().status_code() == StatusCode::NOT_FOUND => {
                        debug!("Dangling record {} was already gone", record_id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Queue jobs for unrecorded objects older than the grace period.
    /// Paths with a pending or abandoned job are left alone until that job
    /// is purged. Dangling records are only reported.
    fn sweep(&self, summary: &mut ReconcileSummary) -> Result<(), Error> {
        let metadata = self.files.metadata();
        let already_queued: HashSet<String> = metadata.unresolved_cleanup_paths()?.into_iter().collect();

        for owner in self.files.storage().list_owners()? {
            let report = match self.files.audit_user(&owner, self.orphan_grace) {
                Ok(report) => report,
                Err(e) => {
                    warn!("Could not audit files of {}: {}", owner, e);
                    continue;
                }
            };

            for record in &report.dangling_records {
                warn!("Record {} of {} has no object at {}", record.id, owner, record.storage_path);
            }
            summary.dangling_reported += report.dangling_records.len();

            for path in report.orphan_objects {
                if already_queued.contains(&path) {
                    continue;
                }
                let job = NewCleanupJob {
                    kind: CleanupKind::OrphanObject,
                    user_id: owner.clone(),
                    storage_path: path.clone(),
                    record_id: None,
                    reason: "found by orphan sweep".to_string(),
                };
                metadata.queue_cleanup(&job)?;
                info!("Queued orphaned object {} for cleanup", path);
                summary.orphans_queued += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockMetadataStore;
    use crate::metadata::{MetadataStorage, NewFileRecord};
    use crate::service::file_service::{UploadLimits, UploadRequest};
    use crate::service::user_context::UserContext;
    use crate::storage::mock_store::MockObjectStore;
    use crate::auth::mock_store::MockAuthProvider;
    use crate::storage::Storage;

    struct Fixture {
        storage: Arc<MockObjectStore>,
        metadata: Arc<MockMetadataStore>,
        files: FileService,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MockObjectStore::new());
        let metadata = Arc::new(MockMetadataStore::new());
        let files = FileService::new(storage.clone(), metadata.clone(), UploadLimits::default());
        Fixture { storage, metadata, files }
    }

    fn config() -> ReconcileConfig {
        ReconcileConfig {
            sweep_orphans: false,
            ..ReconcileConfig::default()
        }
    }

    fn orphan_job(path: &str) -> NewCleanupJob {
        NewCleanupJob {
            kind: CleanupKind::OrphanObject,
            user_id: "alice".to_string(),
            storage_path: path.to_string(),
            record_id: None,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_worker_creation() {
        let f = fixture();
        let worker = ReconcileWorker::new(f.files, &ReconcileConfig::default());
        assert_eq!(worker.batch_size, 100);
        assert_eq!(worker.interval.as_secs(), 300);
        assert_eq!(worker.retry_attempts, 3);
    }

    #[tokio::test]
    async fn test_orphan_object_job_removes_object() {
        let f = fixture();
        f.storage.put_object("alice/stray.bin", b"x").unwrap();
        f.metadata.queue_cleanup(&orphan_job("alice/stray.bin")).unwrap();

        let worker = ReconcileWorker::new(f.files.clone(), &config());
        let summary = worker.run_once().await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(f.storage.object_count(), 0);
        assert_eq!(f.metadata.cleanup_jobs()[0].status, CleanupStatus::Done);
    }

    #[tokio::test]
    async fn test_orphan_job_keeps_object_that_gained_a_record() {
        let f = fixture();
        f.storage.put_object("alice/late.bin", b"x").unwrap();
        f.metadata.queue_cleanup(&orphan_job("alice/late.bin")).unwrap();
        f.metadata.insert_record(&NewFileRecord {
            user_id: "alice".to_string(),
            file_name: "late.bin".to_string(),
            file_size: 1,
            file_type: "application/octet-stream".to_string(),
            storage_path: "alice/late.bin".to_string(),
        }).unwrap();

        let worker = ReconcileWorker::new(f.files.clone(), &config());
        worker.run_once().await.unwrap();
        assert!(f.storage.object_exists("alice/late.bin").unwrap());
    }

    #[tokio::test]
    async fn test_dangling_record_job_finishes_delete() {
        let f = fixture();
        let alice = UserContext::new("alice", "alice@example.com");
        let record = f.files.upload_file(&alice, UploadRequest {
            file_name: "a.txt".to_string(),
            file_type: "text/plain".to_string(),
            data: b"1".to_vec(),
        }).unwrap();

        f.metadata.set_fail_deletes(true);
        assert!(f.files.delete_file(&alice, &record.id).is_err());
        f.metadata.set_fail_deletes(false);

        let worker = ReconcileWorker::new(f.files.clone(), &config());
        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(f.metadata.record_count(), 0);
        assert_eq!(f.files.list_files(&alice).unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_failing_job_is_abandoned_after_retries() {
        let f = fixture();
        f.storage.put_object("alice/stuck.bin", b"x").unwrap();
        f.metadata.queue_cleanup(&orphan_job("alice/stuck.bin")).unwrap();
        f.storage.set_fail_removes(true);

        let worker = ReconcileWorker::new(f.files.clone(), &ReconcileConfig {
            retry_attempts: 2,
            ..config()
        });

        let first = worker.run_once().await.unwrap();
        assert_eq!(first.retried, 1);
        let second = worker.run_once().await.unwrap();
        assert_eq!(second.abandoned, 1);
        let third = worker.run_once().await.unwrap();
        assert_eq!(third.processed, 0);

        let job = &f.metadata.cleanup_jobs()[0];
        assert_eq!(job.status, CleanupStatus::Abandoned);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_sweep_queues_old_orphans_once() {
        let f = fixture();
        let old = Utc::now() - ChronoDuration::hours(2);
        f.storage.insert_raw("alice/old.bin", b"x", old);
        f.storage.insert_raw("alice/new.bin", b"y", Utc::now());
        f.metadata.insert_record(&NewFileRecord {
            user_id: "bob".to_string(),
            file_name: "lost.txt".to_string(),
            file_size: 1,
            file_type: "text/plain".to_string(),
            storage_path: "bob/lost.txt".to_string(),
        }).unwrap();
        f.storage.insert_raw("bob/other.bin", b"z", Utc::now());

        let worker = ReconcileWorker::new(f.files.clone(), &ReconcileConfig {
            sweep_orphans: true,
            orphan_grace_secs: 3600,
            ..ReconcileConfig::default()
        });

        f.storage.set_fail_removes(true);
        let first = worker.run_once().await.unwrap();
        assert_eq!(first.orphans_queued, 1);
        assert_eq!(first.dangling_reported, 1);

        // Pending job already covers the orphan
        let second = worker.run_once().await.unwrap();
        assert_eq!(second.orphans_queued, 0);

        f.storage.set_fail_removes(false);
        worker.run_once().await.unwrap();
        assert!(!f.storage.object_exists("alice/old.bin").unwrap());
        assert!(f.storage.object_exists("alice/new.bin").unwrap());
        // Dangling records are never removed by the sweep
        assert_eq!(f.metadata.record_count(), 1);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_purged() {
        let f = fixture();
        let id = f.metadata.queue_cleanup(&orphan_job("alice/gone.bin")).unwrap();
        f.metadata.mark_cleanup_done(id).unwrap();

        let keep = ReconcileWorker::new(f.files.clone(), &config());
        assert_eq!(keep.run_once().await.unwrap().purged, 0);

        let purge = ReconcileWorker::new(f.files.clone(), &ReconcileConfig {
            retention_secs: 0,
            ..config()
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(purge.run_once().await.unwrap().purged, 1);
        assert!(f.metadata.cleanup_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_does_not_requeue_abandoned_orphan() {
        let f = fixture();
        f.storage.insert_raw("alice/stuck.bin", b"x", Utc::now() - ChronoDuration::hours(2));
        f.storage.set_fail_removes(true);

        let worker = ReconcileWorker::new(f.files.clone(), &ReconcileConfig {
            sweep_orphans: true,
            retry_attempts: 1,
            ..ReconcileConfig::default()
        });

        assert_eq!(worker.run_once().await.unwrap().orphans_queued, 1);
        assert_eq!(worker.run_once().await.unwrap().abandoned, 1);

        for _ in 0..3 {
            let summary = worker.run_once().await.unwrap();
            assert_eq!(summary.orphans_queued, 0);
            assert_eq!(summary.processed, 0);
        }
        let jobs = f.metadata.cleanup_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, CleanupStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_run_purges_expired_sessions() {
        let f = fixture();
        let auth = Arc::new(MockAuthProvider::new());
        auth.create_session("kate@example.com", "hunter22").unwrap();
        for _ in 0..4 {
            auth.sign_in("kate@example.com", "hunter22").unwrap();
        }
        auth.expire_all_sessions();
        let live = auth.sign_in("kate@example.com", "hunter22").unwrap();

        let worker = ReconcileWorker::new(f.files.clone(), &config()).with_auth(auth.clone());
        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.sessions_purged, 5);
        assert_eq!(auth.session_count(), 1);
        assert!(auth.resolve_session(&live.access_token).is_ok());

        assert_eq!(worker.run_once().await.unwrap().sessions_purged, 0);
    }
}
