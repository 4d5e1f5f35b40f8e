//! Cloud Firestore REST backend
//!
//! Paths alternate collection and document segments (`users/ada`). Documents
//! are read and written through the `documents` resource, collection reads
//! go through `:runQuery`, and transactions use `:beginTransaction` and
//! `:commit`. Continuous reads poll at [`Settings::poll_interval`] and
//! deliver only when the result changed.

pub mod query;
pub mod settings;
pub mod value;

pub use settings::Settings;

use crate::error::{AppError, ErrorKind, StoreError, StoreErrorCode};
use crate::query::QuerySpec;
use crate::store::{field_key, merge_fields, normalize, segments, Feed, Snapshot, Store, TransactionFn};
use crate::subscription::Cancellable;
use once_cell::sync::Lazy;
use rand::Rng;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use value::{decode_document, encode_fields};

/// Global map of `project/database` to Firestore instances
static FIRESTORE_INSTANCES: Lazy<RwLock<HashMap<String, Firestore>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Attempts made by a transaction before giving up with `MaxRetries`
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// Firestore client
///
/// Each project and database pair has at most one instance. Use
/// [`Firestore::get_firestore`] to obtain it, or
/// [`App::firestore`](crate::App::firestore).
#[derive(Clone)]
pub struct Firestore {
    inner: Arc<FirestoreInner>,
}

struct FirestoreInner {
    project_id: String,
    settings: Settings,
    id_token: RwLock<Option<String>>,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
struct BeginTransactionResponse {
    transaction: String,
}

impl Firestore {
    /// Get or create the client for a project
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firebase_data_source::firestore::{Firestore, Settings};
    /// use firebase_data_source::{FirestoreDataSource, UserEntity, WriteMode};
    ///
    /// let firestore = Firestore::get_firestore("my-project", Settings::default()).await?;
    /// let source = FirestoreDataSource::new(firestore);
    /// source.write(&UserEntity::new("Ada"), "users/ada", WriteMode::Direct).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_firestore(project_id: impl Into<String>, settings: Settings) -> Result<Self, AppError> {
        let project_id = project_id.into();

        // Validate project ID (error case first)
        if project_id.is_empty() {
            return Err(AppError::bad_arguments("Project ID cannot be empty"));
        }

        let key = format!("{}/{}", project_id, settings.database_id);
        let mut instances = FIRESTORE_INSTANCES.write().await;
        if let Some(firestore) = instances.get(&key) {
            return Ok(firestore.clone());
        }

        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| AppError::new(ErrorKind::Unknown, format!("Failed to create HTTP client: {}", e)))?;

        let firestore = Firestore {
            inner: Arc::new(FirestoreInner {
                project_id,
                settings,
                id_token: RwLock::new(None),
                http_client,
            }),
        };
        instances.insert(key, firestore.clone());
        Ok(firestore)
    }

    /// Project ID
    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// Client settings
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Set or clear the ID token sent as a bearer token
    pub async fn set_id_token(&self, token: Option<String>) {
        *self.inner.id_token.write().await = token;
    }

    /// Resource name of the documents root
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.inner.project_id, self.inner.settings.database_id
        )
    }

    /// Resource name of a document or collection path
    pub fn resource_name(&self, path: &str) -> String {
        let path = normalize(path);
        if path.is_empty() {
            self.documents_root()
        } else {
            format!("{}/{}", self.documents_root(), path)
        }
    }

    fn url(&self, name: &str) -> String {
        format!("{}/v1/{}", self.inner.settings.origin(), name)
    }

    async fn request(&self, method: Method, url: String) -> RequestBuilder {
        let mut builder = self.inner.http_client.request(method, url);
        if let Some(token) = self.inner.id_token.read().await.as_ref() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(|e| StoreError::from_transport(&e))?;
        check(response).await
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, StoreError> {
        let response = self.send(builder).await?;
        response.json().await.map_err(|e| StoreError::from_transport(&e))
    }

    /// Read one document, optionally inside a transaction
    async fn read_document(&self, path: &str, transaction: Option<&str>) -> Result<Snapshot, StoreError> {
        debug!(path = %path, "Firestore get");
        let mut builder = self.request(Method::GET, self.url(&self.resource_name(path))).await;
        if let Some(transaction) = transaction {
            builder = builder.query(&[("transaction", transaction)]);
        }
        match self.send_json(builder).await {
            Ok(document) => {
                let (id, body) = decode_document(&document)?;
                Ok(Snapshot::new(id, Some(body)))
            }
            Err(e) if e.code == StoreErrorCode::NotFound => Ok(Snapshot::at(path, None)),
            Err(e) => Err(e),
        }
    }

    async fn run_query(&self, path: &str, spec: &QuerySpec) -> Result<Vec<Snapshot>, StoreError> {
        let path = normalize(path);
        let parts: Vec<&str> = segments(&path).collect();
        let Some((collection_id, parent)) = parts.split_last() else {
            return Err(StoreError::new(StoreErrorCode::InvalidArgument, "Query path names no collection"));
        };
        let structured = query::structured_query(collection_id, &self.resource_name(&path), spec)
            .map_err(|e| StoreError::new(StoreErrorCode::InvalidArgument, e.message()))?;

        debug!(path = %path, "Firestore runQuery");
        let url = format!("{}:runQuery", self.url(&self.resource_name(&parent.join("/"))));
        let builder = self
            .request(Method::POST, url)
            .await
            .json(&json!({ "structuredQuery": structured }));
        let rows = self.send_json(builder).await?;

        let mut snapshots = Vec::new();
        for row in rows.as_array().map(Vec::as_slice).unwrap_or_default() {
            if let Some(document) = row.get("document") {
                let (id, body) = decode_document(document)?;
                snapshots.push(Snapshot::new(id, Some(body)));
            }
        }
        if query::is_reversed(spec) {
            snapshots.reverse();
        }
        Ok(spec.apply(snapshots))
    }

    async fn patch(&self, path: &str, value: &Value, mask: Option<Vec<String>>) -> Result<(), StoreError> {
        let Some(body) = value.as_object() else {
            return Err(StoreError::new(StoreErrorCode::InvalidArgument, "Firestore documents must be objects"));
        };
        let mut builder = self.request(Method::PATCH, self.url(&self.resource_name(path))).await;
        if let Some(mask) = mask {
            let mut params: Vec<(&str, String)> = mask.into_iter().map(|p| ("updateMask.fieldPaths", p)).collect();
            params.push(("currentDocument.exists", "true".to_string()));
            builder = builder.query(&params);
        }
        self.send(builder.json(&json!({ "fields": encode_fields(body) }))).await?;
        Ok(())
    }

    async fn attempt_transaction(&self, path: &str, update: &TransactionFn) -> Result<(), StoreError> {
        let root = self.documents_root();
        let begin = self
            .request(Method::POST, format!("{}:beginTransaction", self.url(&root)))
            .await
            .json(&json!({ "options": { "readWrite": {} } }));
        let begin: BeginTransactionResponse = serde_json::from_value(self.send_json(begin).await?)
            .map_err(|e| StoreError::new(StoreErrorCode::Unknown(0), e.to_string()))?;

        let current = self.read_document(path, Some(&begin.transaction)).await?.value;
        let next = match update(current) {
            Ok(next) => next,
            Err(e) => {
                let rollback = self
                    .request(Method::POST, format!("{}:rollback", self.url(&root)))
                    .await
                    .json(&json!({ "transaction": begin.transaction }));
                if let Err(rollback_err) = self.send(rollback).await {
                    warn!(path = %path, error = %rollback_err, "Transaction rollback failed");
                }
                return Err(e);
            }
        };

        let name = self.resource_name(path);
        let write = match next.as_object() {
            None if next.is_null() => json!({ "delete": name }),
            None => {
                return Err(StoreError::new(StoreErrorCode::InvalidArgument, "Firestore documents must be objects"));
            }
            Some(body) => json!({ "update": { "name": name, "fields": encode_fields(body) } }),
        };
        let commit = self
            .request(Method::POST, format!("{}:commit", self.url(&root)))
            .await
            .json(&json!({ "writes": [write], "transaction": begin.transaction }));
        self.send(commit).await?;
        Ok(())
    }

    /// Poll `read` until cancelled, delivering only changed results
    fn spawn_poll<T, F, Fut>(&self, path: String, cancel: Cancellable, read: F) -> Feed<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(Firestore) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let firestore = self.clone();
        let interval = self.inner.settings.poll_interval;

        tokio::spawn(async move {
            debug!(path = %path, ?interval, "Starting Firestore poll");
            let mut last: Option<T> = None;
            loop {
                let result = tokio::select! {
                    result = read(firestore.clone()) => result,
                    _ = cancel.cancelled() => break,
                };
                match result {
                    Err(e) => {
                        warn!(path = %path, error = %e, "Firestore poll failed");
                        let _ = tx.send(Err(e));
                        break;
                    }
                    Ok(current) if last.as_ref() != Some(&current) => {
                        last = Some(current.clone());
                        if tx.send(Ok(current)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                }
            }
            debug!(path = %path, "Firestore poll stopped");
        });
        rx
    }
}

impl std::fmt::Debug for Firestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firestore")
            .field("project_id", &self.inner.project_id)
            .field("database_id", &self.inner.settings.database_id)
            .finish()
    }
}

/// Turn a non-success response into a store error
///
/// Google API errors look like `{"error": {"code", "message", "status"}}`;
/// `:runQuery` wraps them in an array.
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let error = match &body {
        Value::Array(items) => items.first().map(|item| &item["error"]).unwrap_or(&Value::Null),
        other => &other["error"],
    };
    Err(error_from(status, error))
}

fn error_from(status: StatusCode, error: &Value) -> StoreError {
    let code = match error["status"].as_str().map(StoreErrorCode::from_grpc_status) {
        Some(StoreErrorCode::Unknown(_)) | None => match status {
            StatusCode::NOT_FOUND => StoreErrorCode::NotFound,
            StatusCode::CONFLICT => StoreErrorCode::Aborted,
            other => StoreErrorCode::from_http_status(other.as_u16()),
        },
        Some(code) => code,
    };
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());
    StoreError::new(code, message)
}

/// Update mask entries for a set of field updates
fn mask_paths(fields: &Map<String, Value>) -> Vec<String> {
    fields.keys().map(|k| query::field_path(k)).collect()
}

/// Document body for a masked update, nested the same way as the mask
///
/// Masked fields missing from the body are deleted, so nulls drop out here.
fn update_body(fields: &Map<String, Value>) -> Value {
    let nested: Map<String, Value> = fields.iter().map(|(k, v)| (field_key(k), v.clone())).collect();
    merge_fields(None, &nested)
}

impl Store for Firestore {
    fn validate_query(&self, spec: &QuerySpec) -> Result<(), AppError> {
        query::validate(spec)
    }

    async fn get(&self, path: &str) -> Result<Snapshot, StoreError> {
        self.read_document(path, None).await
    }

    async fn query(&self, path: &str, spec: &QuerySpec) -> Result<Vec<Snapshot>, StoreError> {
        self.run_query(path, spec).await
    }

    fn watch(&self, path: &str, cancel: Cancellable) -> Feed<Snapshot> {
        let path = normalize(path);
        let target = path.clone();
        self.spawn_poll(path, cancel, move |firestore| {
            let target = target.clone();
            async move { firestore.read_document(&target, None).await }
        })
    }

    fn watch_query(&self, path: &str, spec: &QuerySpec, cancel: Cancellable) -> Feed<Vec<Snapshot>> {
        let path = normalize(path);
        let target = path.clone();
        let spec = spec.clone();
        self.spawn_poll(path, cancel, move |firestore| {
            let target = target.clone();
            let spec = spec.clone();
            async move { firestore.run_query(&target, &spec).await }
        })
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        debug!(path = %path, "Firestore set");
        self.patch(path, &value, None).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        debug!(path = %path, fields = fields.len(), "Firestore update");
        let mask = mask_paths(&fields);
        let body = update_body(&fields);
        self.patch(path, &body, Some(mask)).await
    }

    async fn transaction(&self, path: &str, update: TransactionFn) -> Result<(), StoreError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            match self.attempt_transaction(path, &update).await {
                Err(e) if e.code == StoreErrorCode::Aborted => {
                    let delay = Duration::from_millis(50 * attempt as u64 + rand::thread_rng().gen_range(0..50));
                    debug!(path = %path, attempt, ?delay, "Transaction aborted, retrying");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
        Err(StoreError::new(
            StoreErrorCode::MaxRetries,
            format!("Transaction at '{}' exceeded {} attempts", path, MAX_TRANSACTION_ATTEMPTS),
        ))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        debug!(path = %path, "Firestore delete");
        let builder = self.request(Method::DELETE, self.url(&self.resource_name(path))).await;
        self.send(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn client(project: &str) -> Firestore {
        Firestore::get_firestore(project, Settings::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_firestore_singleton() {
        let a = client("unit-test-singleton").await;
        let b = client("unit-test-singleton").await;
        assert!(Arc::ptr_eq(&a.inner, &b.inner));

        let other = Firestore::get_firestore(
            "unit-test-singleton",
            Settings {
                database_id: "other".into(),
                ..Settings::default()
            },
        )
        .await
        .unwrap();
        assert!(!Arc::ptr_eq(&a.inner, &other.inner));
    }

    #[tokio::test]
    async fn test_empty_project_rejected() {
        let err = Firestore::get_firestore("", Settings::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadArguments);
    }

    #[tokio::test]
    async fn test_resource_names() {
        let firestore = client("unit-test-names").await;
        assert_eq!(
            firestore.resource_name("/users/ada/"),
            "projects/unit-test-names/databases/(default)/documents/users/ada"
        );
        assert_eq!(
            firestore.url(&firestore.resource_name("")),
            "https://firestore.googleapis.com/v1/projects/unit-test-names/databases/(default)/documents"
        );
    }

    #[test]
    fn test_error_mapping() {
        let body = json!({"code": 409, "message": "Transaction lock timeout", "status": "ABORTED"});
        assert_eq!(error_from(StatusCode::CONFLICT, &body).code, StoreErrorCode::Aborted);

        let bare = error_from(StatusCode::NOT_FOUND, &Value::Null);
        assert_eq!(bare.code, StoreErrorCode::NotFound);

        let denied = json!({"status": "PERMISSION_DENIED", "message": "Missing or insufficient permissions."});
        let err: AppError = error_from(StatusCode::FORBIDDEN, &denied).into();
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[test]
    fn test_mask_paths() {
        let mut fields = Map::new();
        fields.insert("address/city".into(), json!("Lyon"));
        fields.insert("nick-name".into(), Value::Null);
        let mut paths = mask_paths(&fields);
        paths.sort();
        assert_eq!(paths, ["`nick-name`", "address.city"]);
    }

    fn leaf_paths(value: &Value, prefix: &str, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    leaf_paths(child, &path, out);
                }
            }
            _ => out.push(prefix.to_string()),
        }
    }

    #[test]
    fn test_update_body_matches_mask() {
        let mut fields = Map::new();
        fields.insert("address.city".into(), json!("Lyon"));
        fields.insert("profile/age".into(), json!(3));
        fields.insert("name".into(), json!("Ada"));

        let body = update_body(&fields);
        assert_eq!(
            body,
            json!({"address": {"city": "Lyon"}, "profile": {"age": 3}, "name": "Ada"})
        );

        let mut leaves = Vec::new();
        leaf_paths(&body, "", &mut leaves);
        leaves.sort();
        let mut mask = mask_paths(&fields);
        mask.sort();
        assert_eq!(leaves, mask);
    }

    #[tokio::test]
    async fn test_range_filter_without_order_is_accepted() {
        let firestore = client("unit-test-range").await;
        let spec = QuerySpec::builder().where_greater_than("age", json!(18)).build().unwrap();
        assert!(firestore.validate_query(&spec).is_ok());
    }
}
