//! Authentication Layer Abstraction
//!
//! Accounts and sessions sit behind the `AuthProvider` trait so the HTTP
//! layer only ever sees a resolved user. Sessions are opaque bearer tokens
//! with a fixed lifetime.

pub mod password;
pub mod sqlite_store;
pub mod mock_store;
pub mod config;

use actix_web::Error;
use actix_web::error::{ErrorBadRequest, ErrorUnauthorized};
use chrono::{DateTime, Duration, Utc};

use crate::config::seconds;
use serde::{Deserialize, Serialize};

/// Message shared by every failed sign in, whichever half was wrong
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Longest session lifetime accepted from config
const MAX_SESSION_DAYS: i64 = 36500;

/// Registered account as seen by the rest of the system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Session opened by a successful sign in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

/// Trait defining the authentication interface
pub trait AuthProvider: Send + Sync {
    /// Register an account. Does not open a session.
    fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, Error>;

    /// Exchange credentials for a session
    fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error>;

    /// End a session; unknown tokens are ignored
    fn sign_out(&self, token: &str) -> Result<(), Error>;

    /// Resolve a bearer token to its user; expired or unknown tokens are 401
    fn resolve_session(&self, token: &str) -> Result<AuthUser, Error>;

    /// Drop every expired session, returning how many were removed
    fn purge_expired_sessions(&self) -> Result<usize, Error>;
}

/// Session lifetime from config, capped so expiry timestamps stay representable
pub fn session_ttl(secs: u64) -> Duration {
    seconds(secs).min(Duration::days(MAX_SESSION_DAYS))
}

/// Trim and lower-case an email, rejecting anything not shaped like
/// `local@domain.tld`
pub fn normalize_email(email: &str) -> Result<String, Error> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
                && domain
                    .split_once('.')
                    .map(|(host, _)| !host.is_empty() && !domain.ends_with('.'))
                    .unwrap_or(false)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(ErrorBadRequest(format!("Invalid email address: {}", email)))
    }
}

/// Reject passwords shorter than `min_length` characters
pub fn validate_password(password: &str, min_length: usize) -> Result<(), Error> {
    if password.chars().count() < min_length {
        return Err(ErrorBadRequest(format!(
            "Password must be at least {} characters",
            min_length
        )));
    }
    Ok(())
}

pub(crate) fn invalid_credentials() -> Error {
    ErrorUnauthorized(INVALID_CREDENTIALS)
}

pub(crate) fn invalid_session() -> Error {
    ErrorUnauthorized("Invalid or expired session")
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
        assert_eq!(normalize_email("a.b+c@mail.example.org").unwrap(), "a.b+c@mail.example.org");

        for bad in ["", "alice", "alice@", "@example.com", "alice@example", "alice@.com",
                    "alice@example.", "a@b@example.com", "al ice@example.com"] {
            let err = normalize_email(bad).unwrap_err();
            assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST, "{}", bad);
        }
    }

    #[test]
    fn test_session_ttl_is_capped() {
        assert_eq!(session_ttl(3600), Duration::hours(1));
        assert_eq!(session_ttl(u64::MAX), Duration::days(MAX_SESSION_DAYS));
        assert!(Utc::now().checked_add_signed(session_ttl(u64::MAX)).is_some());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("123456", 6).is_ok());
        assert!(validate_password("12345", 6).is_err());
        assert!(validate_password("", 0).is_ok());
    }
}
