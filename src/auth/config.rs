//! Backend selection for authentication

use crate::auth::{AuthProvider, mock_store::MockAuthProvider, sqlite_store::SQLiteAuthStore};
use crate::config::AuthConfig;
use actix_web::Error;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Available authentication backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum AuthBackend {
    #[default]
    SQLite,
    Mock,
}

impl std::str::FromStr for AuthBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(AuthBackend::SQLite),
            "mock" => Ok(AuthBackend::Mock),
            _ => Err(format!("Unknown auth backend: {}", s)),
        }
    }
}

/// Create an authentication provider based on the configuration
pub fn create_provider(config: &AuthConfig) -> Result<Arc<dyn AuthProvider>, Error> {
    match config.backend {
        AuthBackend::SQLite => {
            info!("Creating SQLite auth store");
            Ok(Arc::new(SQLiteAuthStore::new(config)?))
        }
        AuthBackend::Mock => {
            info!("Creating Mock auth provider");
            Ok(Arc::new(MockAuthProvider::with_settings(
                config.session_ttl_secs,
                config.min_password_length,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_backend_from_str() {
        assert_eq!("sqlite".parse::<AuthBackend>().unwrap(), AuthBackend::SQLite);
        assert_eq!("Mock".parse::<AuthBackend>().unwrap(), AuthBackend::Mock);
        assert!("ldap".parse::<AuthBackend>().is_err());
    }

    #[test]
    fn test_create_provider_honours_password_length() {
        let config = AuthConfig {
            backend: AuthBackend::Mock,
            min_password_length: 10,
            ..AuthConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert!(provider.sign_up("ivan@example.com", "ninechars").is_err());
        assert!(provider.sign_up("ivan@example.com", "tencharsok").is_ok());
    }
}
