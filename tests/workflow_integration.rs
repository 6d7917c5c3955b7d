use actix_web::http::StatusCode;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use black_delta::app_state::AppState;
use black_delta::config::AppConfig;
use black_delta::metadata::{CleanupKind, NewCleanupJob};
use black_delta::service::{UploadRequest, UserContext};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Default configuration with every on-disk backend under `dir`
fn on_disk_config(dir: &Path) -> AppConfig {
    let path = |name: &str| dir.join(name).to_string_lossy().into_owned();
    let mut config = AppConfig::default();
    config.storage.base_path = path("objects");
    config.storage.temp_path = path("temp");
    config.metadata.db_path = path("metadata.db");
    config.auth.db_path = path("auth.db");
    config
}

fn upload(name: &str, data: &[u8]) -> UploadRequest {
    UploadRequest {
        file_name: name.to_string(),
        file_type: "text/plain".to_string(),
        data: data.to_vec(),
    }
}

#[tokio::test]
async fn test_on_disk_file_lifecycle() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let state = AppState::from_config(on_disk_config(dir.path())).unwrap();

    let user = state.auth.sign_up("uma@example.com", "hunter22").unwrap();
    let session = state.auth.sign_in("uma@example.com", "hunter22").unwrap();
    let context = UserContext::from(state.auth.resolve_session(&session.access_token).unwrap());
    assert_eq!(context.user_id, user.id);

    let files = &state.file_service;
    let record = files.upload_file(&context, upload("diary.md", b"# day one")).unwrap();

    let on_disk = dir.path().join("objects").join(&record.storage_path);
    assert_eq!(fs::read(&on_disk).unwrap(), b"# day one");
    assert!(fs::read_dir(dir.path().join("temp")).unwrap().next().is_none());

    let listing = files.list_files(&context).unwrap();
    assert_eq!(listing.count, 1);
    assert_eq!(listing.files[0], record);

    let downloaded = files.download_file(&context, &record.id).unwrap();
    assert_eq!(downloaded.data, b"# day one");

    files.delete_file(&context, &record.id).unwrap();
    assert!(!on_disk.exists());
    assert_eq!(files.list_files(&context).unwrap().count, 0);
    assert!(files.audit_user(&context.user_id, chrono::Duration::zero()).unwrap().is_consistent());
}

#[tokio::test]
async fn test_state_survives_restart() {
    init_logging();
    let dir = TempDir::new().unwrap();

    let (token, record) = {
        let state = AppState::from_config(on_disk_config(dir.path())).unwrap();
        state.auth.sign_up("vic@example.com", "hunter22").unwrap();
        let session = state.auth.sign_in("vic@example.com", "hunter22").unwrap();
        let context = UserContext::from(session.user.clone());
        let record = state.file_service.upload_file(&context, upload("keep.txt", b"persist")).unwrap();
        (session.access_token, record)
    };

    let state = AppState::from_config(on_disk_config(dir.path())).unwrap();
    let context = UserContext::from(state.auth.resolve_session(&token).unwrap());
    let downloaded = state.file_service.download_file(&context, &record.id).unwrap();
    assert_eq!(downloaded.record, record);
    assert_eq!(downloaded.data, b"persist");
}

#[tokio::test]
async fn test_reconcile_sweeps_orphans_on_disk() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut config = on_disk_config(dir.path());
    config.reconcile.orphan_grace_secs = 0;
    let state = AppState::from_config(config).unwrap();

    let context = UserContext::new("wes", "wes@example.com");
    let kept = state.file_service.upload_file(&context, upload("kept.txt", b"kept")).unwrap();

    // An object written without a record, as after a crash between the two writes
    let stray = dir.path().join("objects").join("wes").join("123-stray.bin");
    fs::write(&stray, b"stray").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let worker = state.reconcile_worker();
    let first = worker.run_once().await.unwrap();
    assert_eq!(first.orphans_queued, 1);
    assert!(stray.exists());

    let second = worker.run_once().await.unwrap();
    assert_eq!(second.completed, 1);
    assert!(!stray.exists());

    let report = state.file_service.audit_user("wes", chrono::Duration::zero()).unwrap();
    assert!(report.is_consistent());
    assert!(state.file_service.download_file(&context, &kept.id).is_ok());
}

#[tokio::test]
async fn test_reconcile_finishes_queued_dangling_record() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let state = AppState::from_config(on_disk_config(dir.path())).unwrap();
    let context = UserContext::new("xia", "xia@example.com");

    let record = state.file_service.upload_file(&context, upload("half.txt", b"half")).unwrap();
    // Object already removed, record left behind
    state.file_service.storage().remove_objects(&[record.storage_path.as_str()]).unwrap();
    let missing = state.file_service.download_file(&context, &record.id).unwrap_err();
    assert_eq!(missing.as_response_error().status_code(), StatusCode::NOT_FOUND);

    state.file_service.metadata().queue_cleanup(&NewCleanupJob {
        kind: CleanupKind::DanglingRecord,
        user_id: context.user_id.clone(),
        storage_path: record.storage_path.clone(),
        record_id: Some(record.id.clone()),
        reason: "record delete failed".to_string(),
    }).unwrap();

    let summary = state.reconcile_worker().run_once().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(state.file_service.list_files(&context).unwrap().count, 0);
}

#[tokio::test]
async fn test_reconcile_purges_expired_sessions_on_disk() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut config = on_disk_config(dir.path());
    config.auth.session_ttl_secs = 0;
    let state = AppState::from_config(config).unwrap();

    state.auth.sign_up("yan@example.com", "hunter22").unwrap();
    for _ in 0..50 {
        state.auth.sign_in("yan@example.com", "hunter22").unwrap();
    }

    let worker = state.reconcile_worker();
    assert_eq!(worker.run_once().await.unwrap().sessions_purged, 50);
    assert_eq!(worker.run_once().await.unwrap().sessions_purged, 0);
}
