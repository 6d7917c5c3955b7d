//! SQLite implementation of AuthProvider trait

use crate::auth::{
    invalid_credentials, invalid_session, normalize_email, password, session_ttl,
    validate_password, AuthProvider, AuthUser, Session,
};
use crate::config::AuthConfig;
use actix_web::Error;
use actix_web::error::{ErrorConflict, ErrorInternalServerError};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users (id),
        expires_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions (expires_at);
";

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

/// Accounts and sessions kept in a local SQLite database
pub struct SQLiteAuthStore {
    conn: Mutex<Connection>,
    session_ttl: Duration,
    min_password_length: usize,
}

impl SQLiteAuthStore {
    pub fn new(config: &AuthConfig) -> Result<Self, Error> {
        let db_path = Path::new(&config.db_path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(ErrorInternalServerError)?;
            }
        }

        let conn = Connection::open(db_path).map_err(ErrorInternalServerError)?;
        conn.execute_batch(SCHEMA).map_err(ErrorInternalServerError)?;

        info!("Opened auth database at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            session_ttl: session_ttl(config.session_ttl_secs),
            min_password_length: config.min_password_length,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| ErrorInternalServerError("auth connection lock poisoned"))
    }

    /// Account and password hash for an email. The connection lock is
    /// released before returning so hashing never blocks other callers.
    fn lookup_credentials(&self, email: &str) -> Result<Option<(AuthUser, String)>, Error> {
        let conn = self.conn()?;
        let found = conn.query_row(
            "SELECT id, email, created_at, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    AuthUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        created_at: decode_timestamp(row, 2)?,
                    },
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(ErrorInternalServerError)?;
        Ok(found)
    }
}

impl AuthProvider for SQLiteAuthStore {
    fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, Error> {
        let email = normalize_email(email)?;
        validate_password(password, self.min_password_length)?;
        let password_hash = password::hash_password(password)?;

        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            email,
            created_at: Utc::now(),
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, password_hash, encode_timestamp(&user.created_at)],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ErrorConflict(format!("An account already exists for {}", user.email))
            } else {
                ErrorInternalServerError(e)
            }
        })?;

        info!("Registered user {}", user.id);
        Ok(user)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        // A malformed email can never match an account
        let email = normalize_email(email).map_err(|_| invalid_credentials())?;

        let (user, password_hash) = self.lookup_credentials(&email)?.ok_or_else(invalid_credentials)?;
        if !password::verify_password(&password_hash, password) {
            debug!("Rejected sign in for user {}", user.id);
            return Err(invalid_credentials());
        }

        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + self.session_ttl,
            user,
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.access_token, session.user.id, encode_timestamp(&session.expires_at)],
        )
        .map_err(ErrorInternalServerError)?;

        info!("Opened session for user {}", session.user.id);
        Ok(session)
    }

    fn sign_out(&self, token: &str) -> Result<(), Error> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(ErrorInternalServerError)?;
        debug!("Sign out removed {} session(s)", removed);
        Ok(())
    }

    fn resolve_session(&self, token: &str) -> Result<AuthUser, Error> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT u.id, u.email, u.created_at, s.expires_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1",
                params![token],
                |row| {
                    Ok((
                        AuthUser {
                            id: row.get(0)?,
                            email: row.get(1)?,
                            created_at: decode_timestamp(row, 2)?,
                        },
                        decode_timestamp(row, 3)?,
                    ))
                },
            )
            .optional()
            .map_err(ErrorInternalServerError)?;

        let (user, expires_at) = found.ok_or_else(invalid_session)?;
        if expires_at <= Utc::now() {
            conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
                .map_err(ErrorInternalServerError)?;
            debug!("Session for user {} expired", user.id);
            return Err(invalid_session());
        }
        Ok(user)
    }

    fn purge_expired_sessions(&self) -> Result<usize, Error> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![encode_timestamp(&Utc::now())],
            )
            .map_err(ErrorInternalServerError)?;
        if removed > 0 {
            debug!("Purged {} expired sessions", removed);
        }
        Ok(removed)
    }
}
