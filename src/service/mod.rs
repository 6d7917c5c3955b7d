//! File workflow services
//!
//! `FileService` keeps each file's two halves, the stored object and its
//! metadata record, consistent across uploads and deletes. The
//! `ReconcileWorker` finishes whatever the request path had to leave
//! behind.

pub mod file_service;
pub mod reconcile_worker;
pub mod user_context;

pub use file_service::{
    BatchUploadReport, ConsistencyReport, DownloadedFile, FailedUpload, FileListing, FileService,
    UploadLimits, UploadRequest, UploadStage,
};
pub use reconcile_worker::{ReconcileSummary, ReconcileWorker};
pub use user_context::UserContext;
