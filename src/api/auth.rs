// Account and session handlers
use actix_web::{get, post, web, Error, HttpRequest, HttpResponse};
use log::info;
use serde::{Deserialize, Serialize};

use crate::api::{authenticate, bearer_token, clear_log_user};
use crate::app_state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignUpResponse {
    pub id: String,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
}

/// Create an account. The caller signs in separately afterwards.
#[post("/auth/signup")]
pub async fn sign_up(body: web::Json<Credentials>, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    clear_log_user();
    let user = app_state.auth.sign_up(&body.email, &body.password)?;

    info!("Account created for {}", user.email);
    Ok(HttpResponse::Created().json(SignUpResponse {
        id: user.id,
        email: user.email,
        message: "Account created. Please sign in.".to_string(),
    }))
}

#[post("/auth/signin")]
pub async fn sign_in(body: web::Json<Credentials>, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    clear_log_user();
    let new_session = app_state.auth.sign_in(&body.email, &body.password)?;
    Ok(HttpResponse::Ok().json(new_session))
}

#[post("/auth/signout")]
pub async fn sign_out(req: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let context = authenticate(&req, &app_state)?;
    app_state.auth.sign_out(bearer_token(&req)?)?;
    info!("User {} signed out", context.user_id);
    Ok(HttpResponse::NoContent().finish())
}

#[get("/auth/session")]
pub async fn session(req: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let context = authenticate(&req, &app_state)?;
    Ok(HttpResponse::Ok().json(SessionUser {
        id: context.user_id,
        email: context.email,
    }))
}
