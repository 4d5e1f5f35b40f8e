//! In-process hierarchical store
//!
//! Holds the whole tree as one JSON value behind a lock and bumps a version
//! counter on every mutation. Watchers re-read their view after each bump and
//! deliver only when the view actually changed, the way a real-time backend
//! only fires listeners for locations whose data changed.

use super::{children_of, normalize, read_at, write_at, Feed, Snapshot, Store, TransactionFn};
use crate::error::StoreError;
use crate::query::QuerySpec;
use crate::subscription::Cancellable;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};

/// In-process store backend
///
/// Cheap to clone; clones share the same tree.
///
/// # Example
/// ```
/// use firebase_data_source::store::{MemoryStore, Store};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// store.set("users/ada", json!({"name": "Ada"})).await.unwrap();
/// let snapshot = store.get("users/ada").await.unwrap();
/// assert_eq!(snapshot.value, Some(json!({"name": "Ada"})));
/// # });
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    tree: RwLock<State>,
    version: watch::Sender<u64>,
}

struct State {
    root: Value,
    failure: Option<StoreError>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                tree: RwLock::new(State {
                    root: Value::Object(Map::new()),
                    failure: None,
                }),
                version,
            }),
        }
    }

    /// Create a store seeded with a tree
    pub fn with_data(root: Value) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.inner.tree.write() {
            state.root = root;
        }
        store
    }

    /// Make every following operation fail with `error`, or clear the failure
    ///
    /// Live watches receive the error and end.
    pub fn fail_with(&self, error: Option<StoreError>) {
        if let Ok(mut state) = self.inner.tree.write() {
            state.failure = error;
        }
        self.bump();
    }

    /// Copy of the whole tree
    pub fn dump(&self) -> Value {
        self.inner
            .tree
            .read()
            .map(|state| state.root.clone())
            .unwrap_or(Value::Null)
    }

    fn bump(&self) {
        self.inner.version.send_modify(|v| *v += 1);
    }

    fn read<R>(&self, f: impl FnOnce(&Value) -> R) -> Result<R, StoreError> {
        let state = self.inner.tree.read().map_err(|_| poisoned())?;
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        Ok(f(&state.root))
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Value) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let result = {
            let mut state = self.inner.tree.write().map_err(|_| poisoned())?;
            if let Some(err) = &state.failure {
                return Err(err.clone());
            }
            f(&mut state.root)?
        };
        self.bump();
        Ok(result)
    }

    fn snapshot(&self, path: &str) -> Result<Snapshot, StoreError> {
        self.read(|root| Snapshot::at(path, read_at(root, path).cloned()))
    }

    fn evaluate(&self, path: &str, spec: &QuerySpec) -> Result<Vec<Snapshot>, StoreError> {
        let children = self.read(|root| children_of(read_at(root, path)))?;
        Ok(spec.apply(children))
    }

    /// Drive a watch: deliver the current view, then one delivery per change
    fn spawn_watch<T, F>(&self, cancel: Cancellable, view: F) -> Feed<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(&MemoryStore) -> Result<T, StoreError> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.clone();
        let mut versions = self.inner.version.subscribe();

        tokio::spawn(async move {
            let mut last: Option<T> = None;
            loop {
                // Mark the version seen before reading so no change slips between the two
                versions.borrow_and_update();
                match view(&store) {
                    Err(e) => {
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
                    changed = versions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                }
            }
        });
        rx
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("version", &*self.inner.version.borrow())
            .finish()
    }
}

fn poisoned() -> StoreError {
    StoreError::new(crate::error::StoreErrorCode::Unknown(0), "store lock poisoned")
}

impl Store for MemoryStore {
    async fn get(&self, path: &str) -> Result<Snapshot, StoreError> {
        self.snapshot(path)
    }

    async fn query(&self, path: &str, spec: &QuerySpec) -> Result<Vec<Snapshot>, StoreError> {
        self.evaluate(path, spec)
    }

    fn watch(&self, path: &str, cancel: Cancellable) -> Feed<Snapshot> {
        let path = normalize(path);
        self.spawn_watch(cancel, move |store| store.snapshot(&path))
    }

    fn watch_query(&self, path: &str, spec: &QuerySpec, cancel: Cancellable) -> Feed<Vec<Snapshot>> {
        let path = normalize(path);
        let spec = spec.clone();
        self.spawn_watch(cancel, move |store| store.evaluate(&path, &spec))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.mutate(|root| {
            write_at(root, path, value);
            Ok(())
        })
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.mutate(|root| {
            for (field, value) in fields {
                write_at(root, &format!("{}/{}", path, field), value);
            }
            Ok(())
        })
    }

    async fn transaction(&self, path: &str, update: TransactionFn) -> Result<(), StoreError> {
        self.mutate(|root| {
            let current = read_at(root, path).cloned();
            let next = update(current)?;
            write_at(root, path, next);
            Ok(())
        })
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.mutate(|root| {
            write_at(root, path, Value::Null);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreErrorCode;
    use crate::query::{Direction, QueryBuilder};
    use serde_json::json;
    use std::time::Duration;

    async fn next<T>(feed: &mut Feed<T>) -> Result<T, StoreError> {
        tokio::time::timeout(Duration::from_secs(1), feed.recv())
            .await
            .expect("delivery timed out")
            .expect("feed closed")
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("users/ada", json!({"name": "Ada"})).await.unwrap();
        assert_eq!(store.get("/users/ada/").await.unwrap().value, Some(json!({"name": "Ada"})));

        store.remove("users/ada").await.unwrap();
        assert!(!store.get("users/ada").await.unwrap().exists());
        assert_eq!(store.dump(), json!({}));
    }

    #[tokio::test]
    async fn test_update_merges_children() {
        let store = MemoryStore::with_data(json!({"users": {"ada": {"name": "Ada", "age": 36}}}));
        let mut fields = Map::new();
        fields.insert("age".into(), json!(37));
        store.update("users/ada", fields).await.unwrap();
        assert_eq!(
            store.get("users/ada").await.unwrap().value,
            Some(json!({"name": "Ada", "age": 37}))
        );
    }

    #[tokio::test]
    async fn test_transaction_sees_current_value() {
        let store = MemoryStore::with_data(json!({"counter": 41}));
        store
            .transaction(
                "counter",
                Box::new(|current| Ok(json!(current.and_then(|v| v.as_i64()).unwrap_or(0) + 1))),
            )
            .await
            .unwrap();
        assert_eq!(store.get("counter").await.unwrap().value, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_query_orders_and_limits() {
        let store = MemoryStore::with_data(json!({
            "scores": {"a": {"points": 3}, "b": {"points": 9}, "c": {"points": 5}}
        }));
        let spec = QueryBuilder::new()
            .order_by("points", Direction::Descending)
            .limit_to_first(2)
            .build()
            .unwrap();
        let rows = store.query("scores", &spec).await.unwrap();
        let keys: Vec<_> = rows.iter().filter_map(|s| s.key.clone()).collect();
        assert_eq!(keys, ["b", "c"]);
    }

    #[tokio::test]
    async fn test_watch_delivers_initial_then_changes_only() {
        let store = MemoryStore::new();
        let cancel = Cancellable::new();
        let mut feed = store.watch("users/ada", cancel.clone());

        assert!(!next(&mut feed).await.unwrap().exists());

        store.set("users/ada", json!({"name": "Ada"})).await.unwrap();
        assert_eq!(next(&mut feed).await.unwrap().value, Some(json!({"name": "Ada"})));

        // Unrelated write does not reach this watcher
        store.set("users/bob", json!({"name": "Bob"})).await.unwrap();
        store.set("users/ada", json!({"name": "Ada L."})).await.unwrap();
        assert_eq!(next(&mut feed).await.unwrap().value, Some(json!({"name": "Ada L."})));

        cancel.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), feed.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_failure_ends_watch() {
        let store = MemoryStore::new();
        let mut feed = store.watch("users", Cancellable::new());
        let _ = next(&mut feed).await;

        store.fail_with(Some(StoreError::new(StoreErrorCode::Disconnected, "Disconnected")));
        let err = next(&mut feed).await.unwrap_err();
        assert_eq!(err.code, StoreErrorCode::Disconnected);
        let end = tokio::time::timeout(Duration::from_secs(1), feed.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_failure_rejects_writes() {
        let store = MemoryStore::new();
        store.fail_with(Some(StoreError::new(StoreErrorCode::PermissionDenied, "denied")));
        assert!(store.set("a", json!(1)).await.is_err());
        store.fail_with(None);
        assert!(store.set("a", json!(1)).await.is_ok());
    }
}
