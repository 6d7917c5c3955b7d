//! Argon2 password hashing

use actix_web::Error;
use actix_web::error::ErrorInternalServerError;
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use log::warn;

fn argon2_instance() -> Argon2<'static> {
    #[cfg(test)]
    {
        // Cheap parameters keep the test suite fast
        match argon2::Params::new(256, 1, 1, None) {
            Ok(params) => Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params),
            Err(_) => Argon2::default(),
        }
    }
    #[cfg(not(test))]
    {
        Argon2::default()
    }
}

/// Hash a password into a PHC string with a fresh salt
pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    argon2_instance()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ErrorInternalServerError(format!("Password hashing failed: {}", e)))
}

/// Check a password against a stored PHC string.
/// A malformed stored hash never verifies.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => argon2_instance()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is not a valid PHC string: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("super-secret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "super-secret"));
        assert!(!verify_password(&hash, "wrong"));
    }

    #[test]
    fn test_same_password_gets_distinct_salts() {
        let a = hash_password("repeat").unwrap();
        let b = hash_password("repeat").unwrap();
        assert_ne!(a, b);
        assert!(verify_password(&a, "repeat"));
        assert!(verify_password(&b, "repeat"));
    }

    #[test]
    fn test_verify_rejects_invalid_hash() {
        assert!(!verify_password("not-a-hash", "secret"));
    }
}
