//! Mock implementation of AuthProvider trait for testing

use crate::auth::{
    invalid_credentials, invalid_session, normalize_email, session_ttl, validate_password,
    AuthProvider, AuthUser, Session,
};
use actix_web::Error;
use actix_web::error::ErrorConflict;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct MockAccounts {
    // email -> (user, password)
    users: HashMap<String, (AuthUser, String)>,
    sessions: HashMap<String, Session>,
}

/// In-memory accounts; passwords are compared as plain text
pub struct MockAuthProvider {
    data: Arc<Mutex<MockAccounts>>,
    session_ttl: Duration,
    min_password_length: usize,
}

impl MockAuthProvider {
    pub fn new() -> Self {
        Self::with_settings(3600, 6)
    }

    pub fn with_settings(session_ttl_secs: u64, min_password_length: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(MockAccounts::default())),
            session_ttl: session_ttl(session_ttl_secs),
            min_password_length,
        }
    }

    /// Register an account and open a session in one step
    pub fn create_session(&self, email: &str, password: &str) -> Result<Session, Error> {
        self.sign_up(email, password)?;
        self.sign_in(email, password)
    }

    /// Force every open session to be expired
    pub fn expire_all_sessions(&self) {
        let past = Utc::now() - Duration::seconds(1);
        for session in self.data.lock().unwrap().sessions.values_mut() {
            session.expires_at = past;
        }
    }

    pub fn session_count(&self) -> usize {
        self.data.lock().unwrap().sessions.len()
    }
}

impl Default for MockAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for MockAuthProvider {
    fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, Error> {
        let email = normalize_email(email)?;
        validate_password(password, self.min_password_length)?;

        let mut data = self.data.lock().unwrap();
        if data.users.contains_key(&email) {
            return Err(ErrorConflict(format!("An account already exists for {}", email)));
        }
        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            created_at: Utc::now(),
        };
        data.users.insert(email, (user.clone(), password.to_string()));
        Ok(user)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        let email = normalize_email(email).map_err(|_| invalid_credentials())?;

        let mut data = self.data.lock().unwrap();
        let user = match data.users.get(&email) {
            Some((user, stored)) if stored == password => user.clone(),
            _ => return Err(invalid_credentials()),
        };
        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + self.session_ttl,
            user,
        };
        data.sessions.insert(session.access_token.clone(), session.clone());
        Ok(session)
    }

    fn sign_out(&self, token: &str) -> Result<(), Error> {
        self.data.lock().unwrap().sessions.remove(token);
        Ok(())
    }

    fn resolve_session(&self, token: &str) -> Result<AuthUser, Error> {
        let mut data = self.data.lock().unwrap();
        match data.sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Ok(session.user.clone()),
            Some(_) => {
                data.sessions.remove(token);
                Err(invalid_session())
            }
            None => Err(invalid_session()),
        }
    }

    fn purge_expired_sessions(&self) -> Result<usize, Error> {
        let now = Utc::now();
        let mut data = self.data.lock().unwrap();
        let before = data.sessions.len();
        data.sessions.retain(|_, session| session.expires_at > now);
        Ok(before - data.sessions.len())
    }
}
