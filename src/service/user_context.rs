//! User context structure for handling user-related information

use crate::auth::AuthUser;
use serde::{Deserialize, Serialize};

/// The authenticated caller a request acts on behalf of.
/// Every file operation is scoped to `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    /// User ID, also the owner prefix of the user's storage paths
    pub user_id: String,
    /// Normalised email of the account
    pub email: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }
}

impl From<AuthUser> for UserContext {
    fn from(user: AuthUser) -> Self {
        Self::new(user.id, user.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_user_context_from_auth_user() {
        let user = AuthUser {
            id: "0f8d".to_string(),
            email: "judy@example.com".to_string(),
            created_at: Utc::now(),
        };
        let context = UserContext::from(user);
        assert_eq!(context, UserContext::new("0f8d", "judy@example.com"));
    }
}
