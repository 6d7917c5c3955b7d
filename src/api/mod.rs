//! HTTP API
//!
//! JSON endpoints for accounts and files. Every `/files` route requires an
//! `Authorization: Bearer <token>` header obtained from `/auth/signin`.

pub mod auth;
pub mod files;

use actix_web::{web, Error, HttpRequest};
use actix_web::error::{ErrorBadRequest, ErrorPayloadTooLarge, ErrorUnauthorized};
use actix_web::http::header;
use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, warn};

use crate::app_state::AppState;
use crate::service::UserContext;

/// Register every route on an app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(auth::sign_up)
        .service(auth::sign_in)
        .service(auth::sign_out)
        .service(auth::session)
        .service(files::list_files)
        // Must precede the `{file_name}` upload route
        .service(files::upload_batch)
        .service(files::upload_file)
        .service(files::download_file)
        .service(files::delete_file);
}

/// Token from an `Authorization: Bearer` header
pub(crate) fn bearer_token(req: &HttpRequest) -> Result<&str, Error> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ErrorUnauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| ErrorUnauthorized("Invalid Authorization header value"))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(ErrorUnauthorized("Authorization header must be a Bearer token")),
    }
}

/// Forget the user tagged by an earlier request on this worker thread
pub fn clear_log_user() {
    log_mdc::remove("user");
}

/// Resolve the caller's session and tag the request's log lines with the user
pub(crate) fn authenticate(req: &HttpRequest, app_state: &AppState) -> Result<UserContext, Error> {
    clear_log_user();
    let token = bearer_token(req)?;
    let user = app_state.auth.resolve_session(token)?;
    log_mdc::insert("user", &user.id);
    debug!("Authenticated request for user {}", user.id);
    Ok(UserContext::from(user))
}

/// Collect a request body, failing once it grows past `limit` bytes
pub(crate) async fn read_payload(mut payload: web::Payload, limit: u64) -> Result<BytesMut, Error> {
    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Error reading payload chunk: {}", e);
            ErrorBadRequest("Error reading payload")
        })?;
        if (bytes.len() + chunk.len()) as u64 > limit {
            warn!("Payload exceeds {} bytes", limit);
            return Err(ErrorPayloadTooLarge(format!("Payload larger than {} bytes", limit)));
        }
        bytes.extend_from_slice(&chunk);
    }
    debug!("Total received data size: {} bytes", bytes.len());
    Ok(bytes)
}
