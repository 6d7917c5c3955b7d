// File handlers
use actix_web::{delete, get, post, web, Error, HttpRequest, HttpResponse};
use actix_web::error::ErrorBadRequest;
use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType, EntityTag, HeaderValue};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::api::{authenticate, read_payload};
use crate::app_state::AppState;
use crate::format::{format_file_size, format_uploaded_at};
use crate::metadata::FileRecord;
use crate::service::{BatchUploadReport, FailedUpload, UploadRequest, UploadStage};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file record with its display strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileView {
    #[serde(flatten)]
    pub record: FileRecord,
    pub display_size: String,
    pub display_date: String,
}

impl From<FileRecord> for FileView {
    fn from(record: FileRecord) -> Self {
        Self {
            display_size: format_file_size(record.file_size),
            display_date: format_uploaded_at(&record.uploaded_at),
            record,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileListResponse {
    pub files: Vec<FileView>,
    pub total_size: u64,
    pub total_size_display: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    pub data_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUploadBody {
    pub files: Vec<BatchFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchUploadResponse {
    pub uploaded: Vec<FileView>,
    pub failed: Vec<FailedUpload>,
}

impl From<BatchUploadReport> for BatchUploadResponse {
    fn from(report: BatchUploadReport) -> Self {
        Self {
            uploaded: report.uploaded.into_iter().map(FileView::from).collect(),
            failed: report.failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteResponse {
    pub deleted: String,
}

#[get("/files")]
pub async fn list_files(req: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let context = authenticate(&req, &app_state)?;
    let listing = app_state.file_service.list_files(&context)?;

    Ok(HttpResponse::Ok().json(FileListResponse {
        total_size_display: format_file_size(listing.total_size),
        total_size: listing.total_size,
        count: listing.count,
        files: listing.files.into_iter().map(FileView::from).collect(),
    }))
}

/// Upload the raw request body as one file
#[post("/files/{file_name}")]
pub async fn upload_file(
    path: web::Path<String>,
    payload: web::Payload,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let context = authenticate(&req, &app_state)?;
    let file_name = path.into_inner();
    let file_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    debug!("Upload of {} ({}) for user {}", file_name, file_type, context.user_id);

    let data = read_payload(payload, app_state.file_service.limits().max_file_size).await?;
    let record = app_state.file_service.upload_file(&context, UploadRequest {
        file_name,
        file_type,
        data: data.to_vec(),
    })?;

    Ok(HttpResponse::Created().json(FileView::from(record)))
}

/// Upload several base64-encoded files in one request
#[post("/files/batch")]
pub async fn upload_batch(
    payload: web::Payload,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let context = authenticate(&req, &app_state)?;
    let body = read_payload(payload, app_state.config.server.max_payload_size).await?;
    let body: BatchUploadBody = serde_json::from_slice(&body)
        .map_err(|e| ErrorBadRequest(format!("Invalid batch body: {}", e)))?;
    info!("Batch upload of {} files for user {}", body.files.len(), context.user_id);

    let mut requests = Vec::with_capacity(body.files.len());
    let mut undecodable = Vec::new();
    for file in body.files {
        match BASE64.decode(file.data_base64.as_bytes()) {
            Ok(data) => requests.push(UploadRequest {
                file_name: file.file_name,
                file_type: file.file_type,
                data,
            }),
            Err(e) => {
                warn!("Could not decode {}: {}", file.file_name, e);
                undecodable.push(FailedUpload {
                    file_name: file.file_name,
                    stage: UploadStage::Validate,
                    reason: format!("Invalid base64 data: {}", e),
                });
            }
        }
    }

    let mut report = app_state.file_service.upload_batch(&context, requests);
    report.failed.extend(undecodable);
    Ok(HttpResponse::Ok().json(BatchUploadResponse::from(report)))
}

#[get("/files/{id}")]
pub async fn download_file(
    path: web::Path<String>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let context = authenticate(&req, &app_state)?;
    let file = app_state.file_service.download_file(&context, &path.into_inner())?;

    let content_type = HeaderValue::from_str(&file.record.file_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let etag = hex::encode(md5::compute(&file.data).0);

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, content_type))
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(file.record.file_name.clone())],
        })
        .insert_header(header::ETag(EntityTag::new_strong(etag)))
        .body(file.data))
}

#[delete("/files/{id}")]
pub async fn delete_file(
    path: web::Path<String>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let context = authenticate(&req, &app_state)?;
    let record = app_state.file_service.delete_file(&context, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(DeleteResponse { deleted: record.id }))
}
