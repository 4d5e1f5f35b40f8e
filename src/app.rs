//! Firebase App
//!
//! The App holds project configuration and hands out the service clients
//! ([`Auth`], [`RealtimeDatabase`], [`Firestore`]) configured from it.

use crate::auth::Auth;
use crate::database::RealtimeDatabase;
use crate::error::{AppError, ErrorKind};
use crate::firestore::{Firestore, Settings};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Global map of App names to App instances
static APP_INSTANCES: Lazy<RwLock<HashMap<String, App>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Name of the app created without an explicit name
pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// Firebase App instance
///
/// The App is the central configuration object for Firebase services.
/// Each app name has at most one App instance (singleton pattern).
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    name: String,
    options: AppOptions,
}

/// Firebase App configuration options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppOptions {
    /// Firebase API key
    pub api_key: String,
    /// Google Cloud project ID
    pub project_id: String,
    /// Realtime Database URL, e.g. `https://my-project-default-rtdb.firebaseio.com`
    pub database_url: Option<String>,
    /// App name (optional, defaults to "[DEFAULT]")
    pub app_name: Option<String>,
}

impl AppOptions {
    /// Read options from the environment
    ///
    /// Uses `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID` and, when set,
    /// `FIREBASE_DATABASE_URL`.
    pub fn from_env() -> Result<Self, AppError> {
        let require = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::bad_arguments(format!("{} is not set", name)))
        };
        Ok(Self {
            api_key: require("FIREBASE_API_KEY")?,
            project_id: require("FIREBASE_PROJECT_ID")?,
            database_url: std::env::var("FIREBASE_DATABASE_URL").ok().filter(|v| !v.is_empty()),
            app_name: None,
        })
    }

    /// Default Realtime Database URL for the project
    pub fn default_database_url(&self) -> String {
        format!("https://{}-default-rtdb.firebaseio.com", self.project_id)
    }
}

impl App {
    /// Create a new Firebase App with the given options
    ///
    /// If an app with the same name already exists, returns the existing instance.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firebase_data_source::{App, AppOptions};
    ///
    /// let options = AppOptions {
    ///     api_key: "YOUR_API_KEY".to_string(),
    ///     project_id: "your-project-id".to_string(),
    ///     database_url: None,
    ///     app_name: None,
    /// };
    /// let app = App::create(options).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create(options: AppOptions) -> Result<Self, AppError> {
        // Validate options (error case first)
        if options.api_key.is_empty() {
            return Err(AppError::bad_arguments("API key not configured"));
        }
        if options.project_id.is_empty() {
            return Err(AppError::bad_arguments("Project ID cannot be empty"));
        }

        let name = match options.app_name.clone() {
            None => DEFAULT_APP_NAME.to_string(),
            Some(n) => n,
        };

        let mut instances = APP_INSTANCES.write().await;

        // Check if instance already exists
        if let Some(app) = instances.get(&name) {
            return Ok(app.clone());
        }

        debug!(app = %name, project = %options.project_id, "Creating app");
        let app = App {
            inner: Arc::new(AppInner {
                name: name.clone(),
                options,
            }),
        };

        instances.insert(name, app.clone());

        Ok(app)
    }

    /// Get the default Firebase App instance
    ///
    /// Returns the app with name "[DEFAULT]" if it exists.
    pub async fn get_instance() -> Result<Self, AppError> {
        Self::get_instance_with_name(DEFAULT_APP_NAME).await
    }

    /// Get a named Firebase App instance
    pub async fn get_instance_with_name(name: &str) -> Result<Self, AppError> {
        let instances = APP_INSTANCES.read().await;
        instances.get(name).cloned().ok_or_else(|| {
            AppError::new(
                ErrorKind::NotFound,
                format!("Firebase App '{}' not found. Call App::create() first.", name),
            )
        })
    }

    /// Get the app name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the app options
    pub fn options(&self) -> &AppOptions {
        &self.inner.options
    }

    /// Auth client for this app's API key
    pub async fn auth(&self) -> Result<Auth, AppError> {
        Auth::get_auth(self.inner.options.api_key.clone()).await
    }

    /// Realtime Database client for this app
    ///
    /// Uses [`AppOptions::database_url`], or the project's default database.
    pub async fn database(&self) -> Result<RealtimeDatabase, AppError> {
        let url = match &self.inner.options.database_url {
            Some(url) => url.clone(),
            None => self.inner.options.default_database_url(),
        };
        RealtimeDatabase::get_database(url).await
    }

    /// Firestore client for this app's project with default settings
    pub async fn firestore(&self) -> Result<Firestore, AppError> {
        Firestore::get_firestore(self.inner.options.project_id.clone(), Settings::default()).await
    }

    /// Authorize database requests with the current user's ID token
    ///
    /// Clears the tokens when nobody is signed in.
    pub async fn authorize(&self) -> Result<(), AppError> {
        let token = self
            .auth()
            .await?
            .current_user()
            .await
            .and_then(|user| user.id_token().map(str::to_string));
        debug!(app = %self.inner.name, signed_in = token.is_some(), "Authorizing database clients");
        self.database().await?.set_auth_token(token.clone()).await;
        self.firestore().await?.set_id_token(token).await;
        Ok(())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.inner.name)
            .field("project_id", &self.inner.options.project_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(key: &str, project: &str, name: Option<&str>) -> AppOptions {
        AppOptions {
            api_key: key.to_string(),
            project_id: project.to_string(),
            database_url: None,
            app_name: name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_app() {
        let app = App::create(options("test-api-key", "test-project", Some("test-app")))
            .await
            .expect("Failed to create app");
        assert_eq!(app.name(), "test-app");
    }

    #[tokio::test]
    async fn test_create_app_singleton() {
        let opts = options("test-api-key-2", "test-project-2", Some("test-app-2"));
        let app1 = App::create(opts.clone()).await.expect("Failed to create app");
        let app2 = App::create(opts).await.expect("Failed to create app");

        assert!(Arc::ptr_eq(&app1.inner, &app2.inner));
        let found = App::get_instance_with_name("test-app-2").await.unwrap();
        assert_eq!(found.name(), "test-app-2");
    }

    #[tokio::test]
    async fn test_empty_api_key_error() {
        let result = App::create(options("", "test-project", None)).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BadArguments);
    }

    #[tokio::test]
    async fn test_missing_app_not_found() {
        let err = App::get_instance_with_name("never-created").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_services_follow_options() {
        let app = App::create(options("test-api-key-5", "test-project-5", Some("test-app-5")))
            .await
            .unwrap();
        assert_eq!(app.auth().await.unwrap().api_key(), "test-api-key-5");
        assert_eq!(
            app.database().await.unwrap().url(),
            "https://test-project-5-default-rtdb.firebaseio.com"
        );
        assert_eq!(app.firestore().await.unwrap().project_id(), "test-project-5");
        app.authorize().await.unwrap();
    }
}
