//! Storage path rules and generation

use actix_web::Error;
use actix_web::error::ErrorBadRequest;
use chrono::{DateTime, Utc};
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 16;
const RANDOM_SUFFIX_LEN: usize = 8;

/// Check that a storage path is exactly `owner/object_name` with safe segments
pub fn validate_storage_path(path: &str) -> Result<(), Error> {
    split_storage_path(path).map(|_| ())
}

/// Split a storage path into `(owner, object_name)`
pub fn split_storage_path(path: &str) -> Result<(&str, &str), Error> {
    let mut parts = path.split('/');
    let owner = parts.next().unwrap_or_default();
    let name = parts.next().unwrap_or_default();

    if parts.next().is_some() {
        return Err(ErrorBadRequest(format!("Invalid storage path: {}", path)));
    }
    if !is_safe_segment(owner) || !is_safe_segment(name) {
        return Err(ErrorBadRequest(format!("Invalid storage path: {}", path)));
    }
    Ok((owner, name))
}

/// Check that a single owner segment is usable as a path prefix
pub fn validate_owner(owner: &str) -> Result<(), Error> {
    if is_safe_segment(owner) {
        Ok(())
    } else {
        Err(ErrorBadRequest(format!("Invalid owner: {}", owner)))
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('\\')
        && !segment.chars().any(char::is_control)
}

/// Build a fresh storage path `{user_id}/{unix_millis}-{random}.{ext}` for a display name.
///
/// The display name never becomes part of the path except for its extension,
/// so any name the user picks maps to a safe, collision-resistant object name.
pub fn generate_storage_path(user_id: &str, file_name: &str, now: DateTime<Utc>) -> String {
    let random: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RANDOM_SUFFIX_LEN)
        .collect();

    let object_name = match file_extension(file_name) {
        Some(ext) => format!("{}-{}.{}", now.timestamp_millis(), random, ext),
        None => format!("{}-{}", now.timestamp_millis(), random),
    };
    format!("{}/{}", user_id, object_name)
}

/// Extension after the last `.`, reduced to ASCII alphanumerics
fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_EXTENSION_LEN)
        .collect();
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_storage_path_keeps_extension() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let path = generate_storage_path("user-1", "report.final.PDF", now);

        let (owner, name) = split_storage_path(&path).unwrap();
        assert_eq!(owner, "user-1");
        assert!(name.starts_with("1700000000123-"));
        assert!(name.ends_with(".PDF"));
    }

    #[test]
    fn test_generate_storage_path_without_extension() {
        let now = Utc::now();
        let path = generate_storage_path("user-1", "Makefile", now);
        let (_, name) = split_storage_path(&path).unwrap();
        assert!(!name.contains('.'));

        let path = generate_storage_path("user-1", "trailing.", now);
        let (_, name) = split_storage_path(&path).unwrap();
        assert!(!name.contains('.'));
    }

    #[test]
    fn test_generate_storage_path_sanitizes_extension() {
        let path = generate_storage_path("u", "evil.t/x..\\t", Utc::now());
        assert!(validate_storage_path(&path).is_ok());
        assert!(path.ends_with(".t"));
    }

    #[test]
    fn test_generated_paths_differ() {
        let now = Utc::now();
        let a = generate_storage_path("u", "a.txt", now);
        let b = generate_storage_path("u", "a.txt", now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_storage_path() {
        assert!(validate_storage_path("owner/object.bin").is_ok());
        assert!(validate_storage_path("owner").is_err());
        assert!(validate_storage_path("owner/").is_err());
        assert!(validate_storage_path("/object").is_err());
        assert!(validate_storage_path("owner/../x").is_err());
        assert!(validate_storage_path("../object").is_err());
        assert!(validate_storage_path("owner/a\\b").is_err());
        assert!(validate_storage_path("owner/nested/object").is_err());
    }

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner("user-1").is_ok());
        assert!(validate_owner("..").is_err());
        assert!(validate_owner("").is_err());
    }
}
