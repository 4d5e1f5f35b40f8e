//! Authentication adapter
//!
//! [`AuthDataSource`] turns provider outcomes into domain results and adds
//! the account rules: a login only succeeds for a verified email address
//! (anything else signs the user back out), and a registration only succeeds
//! once the verification email went out.

use crate::auth::types::User;
use crate::error::{AppError, ErrorKind};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Email/password authentication backend
///
/// Implemented by [`Auth`](crate::Auth); tests substitute their own.
pub trait AuthProvider: Send + Sync {
    /// Sign in with an email and password
    fn sign_in(&self, email: &str, password: &str) -> impl Future<Output = Result<Arc<User>, AppError>> + Send;

    /// Create an account and sign it in
    fn create_user(&self, email: &str, password: &str) -> impl Future<Output = Result<Arc<User>, AppError>> + Send;

    /// Send a verification email to `user`
    fn send_email_verification(&self, user: &User) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Sign the current user out
    fn sign_out(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Login, registration and logout with account rules applied
///
/// # Example
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use firebase_data_source::{Auth, AuthDataSource, ErrorKind};
///
/// let auth = Auth::get_auth("YOUR_API_KEY").await?;
/// let accounts = AuthDataSource::new(auth);
///
/// match accounts.login("user@example.com", "password").await {
///     Ok(user) => println!("Welcome {}", user.uid),
///     Err(e) if e.kind() == ErrorKind::UnverifiedEmail => println!("Check your inbox"),
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AuthDataSource<P: AuthProvider> {
    provider: P,
}

impl<P: AuthProvider> AuthDataSource<P> {
    /// Wrap a provider
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The underlying provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Sign in; fails with `UnverifiedEmail` (after signing out) when the
    /// account's email is not verified
    pub async fn login(&self, email: &str, password: &str) -> Result<Arc<User>, AppError> {
        let user = self.provider.sign_in(email, password).await?;

        if !user.email_verified {
            debug!(uid = %user.uid, "Login refused for unverified email");
            if let Err(e) = self.provider.sign_out().await {
                warn!(uid = %user.uid, error = %e, "Sign-out after unverified login failed");
            }
            return Err(AppError::from(ErrorKind::UnverifiedEmail));
        }

        debug!(uid = %user.uid, "Logged in");
        Ok(user)
    }

    /// Create an account and send its verification email
    ///
    /// A failure to send the email is reported as the registration result.
    pub async fn register(&self, email: &str, password: &str) -> Result<Arc<User>, AppError> {
        let user = self.provider.create_user(email, password).await?;
        self.provider.send_email_verification(&user).await?;
        debug!(uid = %user.uid, "Registered, verification email sent");
        Ok(user)
    }

    /// Sign the current user out
    pub async fn logout(&self) -> Result<(), AppError> {
        self.provider.sign_out().await
    }
}
