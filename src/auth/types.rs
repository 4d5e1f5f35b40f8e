//! Authentication types

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// User metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    /// Timestamp when user was created (Unix timestamp in milliseconds)
    pub creation_timestamp: i64,

    /// Timestamp of last sign-in (Unix timestamp in milliseconds)
    pub last_sign_in_timestamp: i64,
}

/// Firebase user
///
/// Represents a user account in Firebase Auth. Use `Arc<User>` for shared ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique Firebase user ID
    pub uid: String,

    /// Email address (if available)
    pub email: Option<String>,

    /// Display name (if available)
    pub display_name: Option<String>,

    /// Whether email is verified
    pub email_verified: bool,

    /// User metadata
    pub metadata: UserMetadata,

    /// ID token (JWT) - internal use
    #[serde(skip)]
    pub(crate) id_token: Option<String>,

    /// Refresh token - internal use
    #[serde(skip)]
    pub(crate) refresh_token: Option<String>,

    /// Token expiration timestamp (seconds since epoch) - internal use
    #[serde(skip)]
    pub(crate) token_expiration: Option<i64>,
}

impl User {
    /// Create a user without tokens
    pub fn new(uid: impl Into<String>, email: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            email,
            display_name: None,
            email_verified: false,
            metadata: UserMetadata::default(),
            id_token: None,
            refresh_token: None,
            token_expiration: None,
        }
    }

    /// Mark the email as verified or not
    pub fn with_email_verified(mut self, verified: bool) -> Self {
        self.email_verified = verified;
        self
    }

    /// ID token to authorize database requests, if signed in
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Whether the ID token expired (or expires within five minutes)
    pub fn is_token_expired(&self) -> bool {
        match self.token_expiration {
            Some(expiration) => chrono::Utc::now().timestamp() >= expiration - 300,
            None => self.id_token.is_none(),
        }
    }
}

/// Authentication result
///
/// Returned from sign-in and sign-up operations.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// The signed-in user
    pub user: Arc<User>,

    /// Whether the account was created by this operation
    pub is_new_user: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_creation() {
        let user = User::new("test123", Some("test@example.com".to_string()));
        assert_eq!(user.uid, "test123");
        assert!(!user.email_verified);
        assert!(user.id_token().is_none());
        assert!(user.is_token_expired());
    }

    #[test]
    fn test_token_expiry() {
        let mut user = User::new("u", None).with_email_verified(true);
        user.id_token = Some("token".into());
        user.token_expiration = Some(chrono::Utc::now().timestamp() + 3600);
        assert!(!user.is_token_expired());

        user.token_expiration = Some(chrono::Utc::now().timestamp() + 60);
        assert!(user.is_token_expired());
    }

    #[test]
    fn test_tokens_are_not_serialized() {
        let mut user = User::new("u", None);
        user.id_token = Some("secret".into());
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
    }
}
