//! Realtime Database REST backend
//!
//! Talks to `{database_url}/{path}.json`. Reads are plain GETs, continuous
//! reads hold a `text/event-stream` connection open and fold its events into
//! a local copy of the watched location, and transactions use ETag
//! compare-and-set.

pub mod params;
pub mod sse;

use crate::error::{AppError, ErrorKind, StoreError, StoreErrorCode};
use crate::query::QuerySpec;
use crate::store::{children_of, normalize, Feed, Snapshot, Store, TransactionFn};
use crate::subscription::Cancellable;
use futures::StreamExt;
use once_cell::sync::Lazy;
use reqwest::header::{ACCEPT, ETAG, IF_MATCH};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use sse::{ServerEvent, SseParser};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Global map of database URLs to instances
static DATABASE_INSTANCES: Lazy<RwLock<HashMap<String, RealtimeDatabase>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Attempts made by a transaction before giving up with `MaxRetries`
pub const MAX_TRANSACTION_ATTEMPTS: usize = 25;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Realtime Database client
///
/// Each database URL has at most one instance. Use
/// [`RealtimeDatabase::get_database`] to obtain it, or
/// [`App::database`](crate::App::database).
#[derive(Clone)]
pub struct RealtimeDatabase {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    url: String,
    auth_token: RwLock<Option<String>>,
    http_client: reqwest::Client,
}

impl RealtimeDatabase {
    /// Get or create the client for a database URL
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firebase_data_source::database::RealtimeDatabase;
    /// use firebase_data_source::{DatabaseDataSource, ReadMode, UserEntity};
    ///
    /// let db = RealtimeDatabase::get_database("https://my-project-default-rtdb.firebaseio.com").await?;
    /// let source = DatabaseDataSource::new(db);
    /// let users = source.read_one::<UserEntity>("users/ada", ReadMode::Continuous);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_database(url: impl Into<String>) -> Result<Self, AppError> {
        let url = url.into().trim_end_matches('/').to_string();

        // Validate URL (error case first)
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(AppError::bad_arguments(format!("Invalid database URL: '{}'", url)));
        }

        let mut instances = DATABASE_INSTANCES.write().await;
        if let Some(db) = instances.get(&url) {
            return Ok(db.clone());
        }

        // No overall timeout on the client: streaming reads stay open
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::new(ErrorKind::Unknown, format!("Failed to create HTTP client: {}", e)))?;

        let db = RealtimeDatabase {
            inner: Arc::new(DatabaseInner {
                url: url.clone(),
                auth_token: RwLock::new(None),
                http_client,
            }),
        };
        instances.insert(url, db.clone());
        Ok(db)
    }

    /// Database URL
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Set or clear the ID token sent as `auth=` on every request
    pub async fn set_auth_token(&self, token: Option<String>) {
        *self.inner.auth_token.write().await = token;
    }

    /// REST endpoint for a path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}.json", self.inner.url, normalize(path))
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.inner.http_client.request(method, self.endpoint(path));
        if let Some(token) = self.inner.auth_token.read().await.as_ref() {
            builder = builder.query(&[("auth", token)]);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| StoreError::from_transport(&e))?;
        check(response).await
    }

    async fn fetch(&self, path: &str, query: &[(&'static str, String)]) -> Result<Value, StoreError> {
        debug!(path = %path, "Realtime Database GET");
        let builder = self.request(Method::GET, path).await.query(query);
        let response = self.send(builder).await?;
        response.json().await.map_err(|e| StoreError::from_transport(&e))
    }

    /// Stream a location and deliver `view` of it whenever it changes
    fn spawn_stream<T, F>(&self, path: String, query: Vec<(&'static str, String)>, cancel: Cancellable, view: F) -> Feed<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(&Value) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let db = self.clone();

        tokio::spawn(async move {
            debug!(path = %path, "Opening event stream");
            tokio::select! {
                result = db.stream(&path, &query, &tx, view) => {
                    if let Err(e) = result {
                        warn!(path = %path, error = %e, "Event stream ended with error");
                        let _ = tx.send(Err(e));
                    }
                }
                _ = cancel.cancelled() => {}
                _ = tx.closed() => {}
            }
            debug!(path = %path, "Event stream closed");
        });
        rx
    }

    async fn stream<T, F>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
        tx: &mpsc::UnboundedSender<Result<T, StoreError>>,
        view: F,
    ) -> Result<(), StoreError>
    where
        T: Clone + PartialEq,
        F: Fn(&Value) -> T,
    {
        let response = self
            .request(Method::GET, path)
            .await
            .query(query)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| StoreError::from_transport(&e))?;
        let response = check(response).await?;

        let mut body = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut cache = Value::Null;
        let mut last: Option<T> = None;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StoreError::from_transport(&e))?;
            for raw in parser.push(&chunk) {
                let event = ServerEvent::parse(&raw)?;
                if let Some(err) = event.terminal_error() {
                    return Err(err);
                }
                if !event.apply_to(&mut cache) {
                    continue;
                }
                let current = view(&cache);
                if last.as_ref() == Some(&current) {
                    continue;
                }
                last = Some(current.clone());
                if tx.send(Ok(current)).is_err() {
                    return Ok(());
                }
            }
        }
        Err(StoreError::new(StoreErrorCode::Disconnected, "Event stream closed by server"))
    }
}

impl std::fmt::Debug for RealtimeDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeDatabase").field("url", &self.inner.url).finish()
    }
}

/// Turn a non-success response into a store error
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body["error"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());
    Err(StoreError::new(StoreErrorCode::from_http_status(status.as_u16()), message))
}

fn etag_of(response: &Response) -> Result<String, StoreError> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| StoreError::new(StoreErrorCode::OperationFailed, "Response carried no ETag"))
}

fn present(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

impl Store for RealtimeDatabase {
    fn validate_query(&self, spec: &QuerySpec) -> Result<(), AppError> {
        params::validate(spec)
    }

    async fn get(&self, path: &str) -> Result<Snapshot, StoreError> {
        let value = self.fetch(path, &[]).await?;
        Ok(Snapshot::at(path, present(value)))
    }

    async fn query(&self, path: &str, spec: &QuerySpec) -> Result<Vec<Snapshot>, StoreError> {
        let query = params::query_params(spec)
            .map_err(|e| StoreError::new(StoreErrorCode::InvalidArgument, e.message()))?;
        let value = self.fetch(path, &query).await?;
        Ok(spec.apply(children_of(Some(&value))))
    }

    fn watch(&self, path: &str, cancel: Cancellable) -> Feed<Snapshot> {
        let path = normalize(path);
        let key_path = path.clone();
        self.spawn_stream(path, Vec::new(), cancel, move |cache| {
            Snapshot::at(&key_path, present(cache.clone()))
        })
    }

    fn watch_query(&self, path: &str, spec: &QuerySpec, cancel: Cancellable) -> Feed<Vec<Snapshot>> {
        let path = normalize(path);
        let query = match params::query_params(spec) {
            Ok(query) => query,
            Err(e) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(Err(StoreError::new(StoreErrorCode::InvalidArgument, e.message())));
                return rx;
            }
        };
        let spec = spec.clone();
        self.spawn_stream(path, query, cancel, move |cache| spec.apply(children_of(Some(cache))))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        debug!(path = %path, "Realtime Database PUT");
        let builder = self.request(Method::PUT, path).await.json(&value);
        self.send(builder).await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        debug!(path = %path, fields = fields.len(), "Realtime Database PATCH");
        let builder = self.request(Method::PATCH, path).await.json(&fields);
        self.send(builder).await?;
        Ok(())
    }

    async fn transaction(&self, path: &str, update: TransactionFn) -> Result<(), StoreError> {
        let builder = self.request(Method::GET, path).await.header("X-Firebase-ETag", "true");
        let response = self.send(builder).await?;
        let mut etag = etag_of(&response)?;
        let mut current: Value = response.json().await.map_err(|e| StoreError::from_transport(&e))?;

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let next = update(present(current))?;
            let response = self
                .request(Method::PUT, path)
                .await
                .header("X-Firebase-ETag", "true")
                .header(IF_MATCH, &etag)
                .json(&next)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
                .map_err(|e| StoreError::from_transport(&e))?;

            if response.status() == StatusCode::PRECONDITION_FAILED {
                // Body and ETag carry the value that won the race
                debug!(path = %path, attempt, "Transaction conflict, retrying");
                etag = etag_of(&response)?;
                current = response.json().await.map_err(|e| StoreError::from_transport(&e))?;
                continue;
            }
            check(response).await?;
            return Ok(());
        }
        Err(StoreError::new(
            StoreErrorCode::MaxRetries,
            format!("Transaction at '{}' exceeded {} attempts", path, MAX_TRANSACTION_ATTEMPTS),
        ))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        debug!(path = %path, "Realtime Database DELETE");
        let builder = self.request(Method::DELETE, path).await;
        self.send(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_database_singleton() {
        let a = RealtimeDatabase::get_database("https://unit-test-a.firebaseio.com/").await.unwrap();
        let b = RealtimeDatabase::get_database("https://unit-test-a.firebaseio.com").await.unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert_eq!(a.url(), "https://unit-test-a.firebaseio.com");
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = RealtimeDatabase::get_database("not a url").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadArguments);
    }

    #[tokio::test]
    async fn test_endpoint() {
        let db = RealtimeDatabase::get_database("https://unit-test-b.firebaseio.com").await.unwrap();
        assert_eq!(db.endpoint("/users/ada/"), "https://unit-test-b.firebaseio.com/users/ada.json");
        assert_eq!(db.endpoint(""), "https://unit-test-b.firebaseio.com/.json");
    }

    #[test]
    fn test_present() {
        assert_eq!(present(Value::Null), None);
        assert_eq!(present(serde_json::json!(0)), Some(serde_json::json!(0)));
    }
}
