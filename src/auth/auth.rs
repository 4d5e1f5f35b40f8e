//! Firebase Authentication over the Identity Toolkit REST API

use crate::auth::data_source::AuthProvider;
use crate::auth::types::{AuthResult, User, UserMetadata};
use crate::error::{AppError, AuthError};
use async_stream::stream;
use futures::Stream;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Global map of API keys to Auth instances
static AUTH_INSTANCES: Lazy<RwLock<HashMap<String, Auth>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Firebase Authentication instance
///
/// Each API key has at most one Auth instance (singleton pattern).
/// Use `Auth::get_auth(api_key)` to obtain or create an instance.
#[derive(Clone)]
pub struct Auth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    api_key: String,
    current_user: RwLock<Option<Arc<User>>>,
    http_client: reqwest::Client,
    state_tx: broadcast::Sender<Option<Arc<User>>>,
}

impl Auth {
    /// Get or create Auth instance for the given API key
    ///
    /// Returns existing Auth if one exists for this API key, otherwise creates new.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firebase_data_source::Auth;
    ///
    /// let auth = Auth::get_auth("YOUR_API_KEY").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_auth(api_key: impl Into<String>) -> Result<Self, AppError> {
        let api_key = api_key.into();

        // Validate API key (error case first)
        if api_key.is_empty() {
            return Err(AppError::bad_arguments("API key not configured"));
        }

        let mut instances = AUTH_INSTANCES.write().await;

        // Check if instance already exists
        if let Some(auth) = instances.get(&api_key) {
            return Ok(auth.clone());
        }

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Unknown(format!("Failed to create HTTP client: {}", e)))?;

        // Broadcast channel for auth state changes (capacity: 16)
        let (state_tx, _) = broadcast::channel(16);

        let auth = Auth {
            inner: Arc::new(AuthInner {
                api_key: api_key.clone(),
                current_user: RwLock::new(None),
                http_client,
                state_tx,
            }),
        };

        instances.insert(api_key, auth.clone());

        Ok(auth)
    }

    /// Get the current signed-in user
    ///
    /// Returns None if no user is currently signed in.
    pub async fn current_user(&self) -> Option<Arc<User>> {
        self.inner.current_user.read().await.clone()
    }

    /// Sign out the current user
    ///
    /// Always succeeds and clears the current user.
    pub async fn sign_out(&self) -> Result<(), AppError> {
        debug!("Signing out");
        self.set_current_user(None).await;
        Ok(())
    }

    /// Get the API key for this Auth instance
    pub fn api_key(&self) -> &str {
        &self.inner.api_key
    }

    /// Internal: Set current user
    pub(crate) async fn set_current_user(&self, user: Option<Arc<User>>) {
        let mut current = self.inner.current_user.write().await;
        *current = user.clone();

        // Broadcast state change (ignore error if no listeners)
        let _ = self.inner.state_tx.send(user);
    }

    /// Subscribe to authentication state changes
    ///
    /// The stream immediately yields the current user state, then the user
    /// after every sign-in and `None` after every sign-out.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firebase_data_source::Auth;
    /// use futures::StreamExt;
    ///
    /// let auth = Auth::get_auth("YOUR_API_KEY").await?;
    /// let mut stream = auth.auth_state_changes().await;
    ///
    /// while let Some(user) = stream.next().await {
    ///     match user {
    ///         Some(u) => println!("User signed in: {}", u.uid),
    ///         None => println!("User signed out"),
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn auth_state_changes(&self) -> std::pin::Pin<Box<dyn Stream<Item = Option<Arc<User>>> + Send>> {
        let initial_user = self.current_user().await;
        let mut rx = self.inner.state_tx.subscribe();

        Box::pin(stream! {
            yield initial_user;

            loop {
                let user = match rx.recv().await {
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Ok(u) => u,
                };
                yield user;
            }
        })
    }

    /// Sign in with email and password
    ///
    /// The account is looked up after sign-in so that
    /// [`User::email_verified`] reflects the server state.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firebase_data_source::Auth;
    ///
    /// let auth = Auth::get_auth("YOUR_API_KEY").await?;
    /// let result = auth.sign_in_with_email_and_password("user@example.com", "password").await?;
    /// println!("Signed in: {} (verified: {})", result.user.uid, result.user.email_verified);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn sign_in_with_email_and_password(
        &self,
        email: impl AsRef<str>,
        password: impl AsRef<str>,
    ) -> Result<AuthResult, AppError> {
        let (email, password) = validate_credentials(email.as_ref(), password.as_ref())?;

        debug!("Signing in with email and password");
        let body = self
            .post(
                "signInWithPassword",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;
        let mut user = parse_sign_in(body)?;

        let account = self.lookup(user.id_token.as_deref().unwrap_or_default()).await?;
        account.apply_to(&mut user);

        let user = Arc::new(user);
        self.set_current_user(Some(Arc::clone(&user))).await;

        Ok(AuthResult {
            user,
            is_new_user: false,
        })
    }

    /// Create new user with email and password
    ///
    /// The new user becomes the current user. Their email starts unverified.
    pub async fn create_user_with_email_and_password(
        &self,
        email: impl AsRef<str>,
        password: impl AsRef<str>,
    ) -> Result<AuthResult, AppError> {
        let (email, password) = validate_credentials(email.as_ref(), password.as_ref())?;

        debug!("Creating user with email and password");
        let body = self
            .post(
                "signUp",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;
        let user = Arc::new(parse_sign_in(body)?);
        self.set_current_user(Some(Arc::clone(&user))).await;

        Ok(AuthResult {
            user,
            is_new_user: true,
        })
    }

    /// Send a verification email to `user`
    pub async fn send_email_verification(&self, user: &User) -> Result<(), AppError> {
        // Error-first: validate ID token
        let Some(id_token) = user.id_token() else {
            return Err(AuthError::NoSignedInUser.into());
        };

        debug!(uid = %user.uid, "Sending verification email");
        self.post(
            "sendOobCode",
            serde_json::json!({
                "requestType": "VERIFY_EMAIL",
                "idToken": id_token
            }),
        )
        .await?;
        Ok(())
    }

    /// Refresh the current user's profile and verification state
    pub async fn reload(&self) -> Result<Arc<User>, AppError> {
        // Error-first: need a signed-in user
        let Some(current) = self.current_user().await else {
            return Err(AuthError::NoSignedInUser.into());
        };
        let Some(id_token) = current.id_token() else {
            return Err(AuthError::NoSignedInUser.into());
        };

        let account = self.lookup(id_token).await?;
        let mut user = (*current).clone();
        account.apply_to(&mut user);

        let user = Arc::new(user);
        self.set_current_user(Some(Arc::clone(&user))).await;
        Ok(user)
    }

    async fn lookup(&self, id_token: &str) -> Result<AccountInfo, AuthError> {
        let body = self
            .post("lookup", serde_json::json!({ "idToken": id_token }))
            .await?;

        // Error-first: validate response structure
        let Some(users) = body["users"].as_array() else {
            return Err(AuthError::NetworkRequestFailed("Invalid response structure".to_string()));
        };
        let Some(account) = users.first() else {
            return Err(AuthError::UserNotFound);
        };
        serde_json::from_value(account.clone()).map_err(|e| AuthError::Unknown(e.to_string()))
    }

    /// POST to an Identity Toolkit `accounts:{method}` endpoint
    async fn post(&self, method: &str, body: Value) -> Result<Value, AuthError> {
        let url = format!("{}/accounts:{}?key={}", IDENTITY_TOOLKIT_URL, method, self.inner.api_key);

        let response = self
            .inner
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::from_transport(&e))?;

        // Handle error responses first
        if !response.status().is_success() {
            let error_body: Value = response.json().await.map_err(|e| AuthError::from_transport(&e))?;
            let error_message = error_body["error"]["message"]
                .as_str()
                .unwrap_or("UNKNOWN_ERROR");
            return Err(AuthError::from_error_code(error_message));
        }

        response.json().await.map_err(|e| AuthError::from_transport(&e))
    }
}

impl AuthProvider for Auth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Arc<User>, AppError> {
        Ok(self.sign_in_with_email_and_password(email, password).await?.user)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<Arc<User>, AppError> {
        Ok(self.create_user_with_email_and_password(email, password).await?.user)
    }

    async fn send_email_verification(&self, user: &User) -> Result<(), AppError> {
        Auth::send_email_verification(self, user).await
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        Auth::sign_out(self).await
    }
}

fn validate_credentials<'a>(email: &'a str, password: &'a str) -> Result<(&'a str, &'a str), AppError> {
    // Validate email (error case first)
    if email.is_empty() {
        return Err(AppError::bad_arguments("Email cannot be empty"));
    }

    // Validate password (error case first)
    if password.is_empty() {
        return Err(AppError::bad_arguments("Password cannot be empty"));
    }

    Ok((email, password))
}

fn parse_sign_in(body: Value) -> Result<User, AuthError> {
    let response: SignInResponse = serde_json::from_value(body).map_err(|e| AuthError::Unknown(e.to_string()))?;
    Ok(response.into_user())
}

/// Firebase Auth REST API sign-in response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

impl SignInResponse {
    fn into_user(self) -> User {
        // expires_in is in seconds; default to one hour
        let now = chrono::Utc::now();
        let lifetime = self
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(3600);

        User {
            uid: self.local_id,
            email: self.email,
            display_name: self.display_name.filter(|n| !n.is_empty()),
            email_verified: false,
            metadata: UserMetadata {
                creation_timestamp: now.timestamp_millis(),
                last_sign_in_timestamp: now.timestamp_millis(),
            },
            id_token: Some(self.id_token),
            refresh_token: Some(self.refresh_token),
            token_expiration: Some(now.timestamp() + lifetime),
        }
    }
}

/// Account record from `accounts:lookup`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    email: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    email_verified: bool,
    created_at: Option<String>,
    last_login_at: Option<String>,
}

impl AccountInfo {
    fn apply_to(self, user: &mut User) {
        user.email_verified = self.email_verified;
        if let Some(email) = self.email {
            user.email = Some(email);
        }
        if let Some(name) = self.display_name.filter(|n| !n.is_empty()) {
            user.display_name = Some(name);
        }
        if let Some(created) = self.created_at.and_then(|s| s.parse().ok()) {
            user.metadata.creation_timestamp = created;
        }
        if let Some(last) = self.last_login_at.and_then(|s| s.parse().ok()) {
            user.metadata.last_sign_in_timestamp = last;
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_auth_creates_instance() {
        let auth = Auth::get_auth("test_api_key_1").await.unwrap();
        assert_eq!(auth.api_key(), "test_api_key_1");
    }

    #[tokio::test]
    async fn test_get_auth_returns_same_instance() {
        let auth1 = Auth::get_auth("test_api_key_2").await.unwrap();
        let auth2 = Auth::get_auth("test_api_key_2").await.unwrap();

        // Should return same instance (same Arc pointer)
        assert!(Arc::ptr_eq(&auth1.inner, &auth2.inner));
    }

    #[tokio::test]
    async fn test_get_auth_empty_key_error() {
        let result = Auth::get_auth("").await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BadArguments);
    }

    #[tokio::test]
    async fn test_current_user_initially_none() {
        let auth = Auth::get_auth("test_api_key_3").await.unwrap();
        assert!(auth.current_user().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_user() {
        let auth = Auth::get_auth("test_api_key_4").await.unwrap();

        auth.set_current_user(Some(Arc::new(User::new("test_uid", None)))).await;
        assert!(auth.current_user().await.is_some());

        auth.sign_out().await.unwrap();
        assert!(auth.current_user().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_validates_input() {
        let auth = Auth::get_auth("test_key").await.unwrap();
        let result = auth.sign_in_with_email_and_password("", "password").await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BadArguments);

        let result = auth.create_user_with_email_and_password("user@example.com", "").await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BadArguments);
    }

    #[tokio::test]
    async fn test_send_verification_requires_token() {
        let auth = Auth::get_auth("test_key_verify").await.unwrap();
        let err = auth.send_email_verification(&User::new("u", None)).await.unwrap_err();
        assert_eq!(err.message(), AppError::from(AuthError::NoSignedInUser).message());
    }

    #[tokio::test]
    async fn test_auth_state_changes_yields_initial_then_updates() {
        let auth = Auth::get_auth("test_key_state").await.unwrap();
        let mut stream = auth.auth_state_changes().await;
        assert!(stream.next().await.unwrap().is_none());

        auth.set_current_user(Some(Arc::new(User::new("ada", None)))).await;
        assert_eq!(stream.next().await.unwrap().unwrap().uid, "ada");

        auth.sign_out().await.unwrap();
        assert!(stream.next().await.unwrap().is_none());
    }

    #[test]
    fn test_sign_in_response_into_user() {
        let user = parse_sign_in(json!({
            "localId": "uid-1",
            "email": "ada@example.com",
            "displayName": "",
            "idToken": "id",
            "refreshToken": "refresh",
            "expiresIn": "3600",
            "registered": true
        }))
        .unwrap();
        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.display_name, None);
        assert!(!user.email_verified);
        assert!(!user.is_token_expired());
    }

    #[test]
    fn test_lookup_sets_verification() {
        let mut user = User::new("uid-1", None);
        let account: AccountInfo = serde_json::from_value(json!({
            "localId": "uid-1",
            "email": "ada@example.com",
            "emailVerified": true,
            "createdAt": "1700000000000"
        }))
        .unwrap();
        account.apply_to(&mut user);
        assert!(user.email_verified);
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(user.metadata.creation_timestamp, 1_700_000_000_000);
    }
}
