//! Store backends
//!
//! A [`Store`] exposes the path-addressed primitives a remote hierarchical
//! store offers: read, query, subscribe, overwrite, merge, transactional
//! update and delete. [`RemoteDataSource`](crate::RemoteDataSource) builds the
//! uniform record API on top of any backend.
//!
//! Implementations in this crate:
//! - [`MemoryStore`] - in-process tree, used for tests and local work
//! - [`RealtimeDatabase`](crate::database::RealtimeDatabase) - Realtime Database REST
//! - [`Firestore`](crate::firestore::Firestore) - Firestore REST

pub mod memory;

pub use memory::MemoryStore;

use crate::error::{AppError, StoreError};
use crate::query::QuerySpec;
use crate::subscription::Cancellable;
use serde_json::{Map, Value};
use std::future::Future;
use tokio::sync::mpsc;

/// Data found at a path
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Last path segment, the store-assigned key
    pub key: Option<String>,
    /// Stored value, `None` when nothing exists at the path
    pub value: Option<Value>,
}

impl Snapshot {
    /// Create a snapshot
    pub fn new(key: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }

    /// Snapshot of a path, keyed by its last segment
    pub fn at(path: &str, value: Option<Value>) -> Self {
        Self {
            key: last_segment(path).map(str::to_string),
            value,
        }
    }

    /// Whether any data exists
    pub fn exists(&self) -> bool {
        matches!(&self.value, Some(v) if !v.is_null())
    }
}

/// Receiving end of a store watch
pub type Feed<T> = mpsc::UnboundedReceiver<Result<T, StoreError>>;

/// Transaction update function
///
/// Receives the current value at the path (or `None`) and returns the value to
/// store. May run more than once if the store retries on contention.
pub type TransactionFn = Box<dyn Fn(Option<Value>) -> Result<Value, StoreError> + Send + Sync>;

/// Primitives of a remote hierarchical store
///
/// Paths are `/`-separated; leading and trailing slashes are ignored.
/// Watches deliver the current state first and then one delivery per change
/// observed by the backend. A watch ends after its first error, when the
/// receiver is dropped, or once `cancel` fires.
pub trait Store: Clone + Send + Sync + 'static {
    /// Reject queries this backend cannot express
    fn validate_query(&self, _spec: &QuerySpec) -> Result<(), AppError> {
        Ok(())
    }

    /// Read the value at a path
    fn get(&self, path: &str) -> impl Future<Output = Result<Snapshot, StoreError>> + Send;

    /// Read the children of a path that satisfy a query, in query order
    fn query(&self, path: &str, spec: &QuerySpec) -> impl Future<Output = Result<Vec<Snapshot>, StoreError>> + Send;

    /// Subscribe to the value at a path
    fn watch(&self, path: &str, cancel: Cancellable) -> Feed<Snapshot>;

    /// Subscribe to the children of a path that satisfy a query
    fn watch_query(&self, path: &str, spec: &QuerySpec, cancel: Cancellable) -> Feed<Vec<Snapshot>>;

    /// Overwrite the value at a path
    fn set(&self, path: &str, value: Value) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Merge the given fields into the value at a path
    fn update(&self, path: &str, fields: Map<String, Value>) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read-modify-write the value at a path atomically
    fn transaction(&self, path: &str, update: TransactionFn) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the value at a path
    fn remove(&self, path: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Split a path into its non-empty segments
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Last non-empty segment of a path
pub fn last_segment(path: &str) -> Option<&str> {
    segments(path).last()
}

/// Normalize a path to `a/b/c` form
pub fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

/// Normalize a field path to `a/b/c` form, accepting `.` or `/` separators
pub fn field_key(field: &str) -> String {
    field.split(['.', '/']).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/")
}

/// Merge `fields` into `current`, each key a relative path
///
/// A null value deletes the field. Used by backends that perform merges
/// client-side, such as transactional updates.
pub fn merge_fields(current: Option<Value>, fields: &Map<String, Value>) -> Value {
    let mut root = match current {
        Some(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };
    for (path, value) in fields {
        write_at(&mut root, path, value.clone());
    }
    root
}

/// Write `value` at a relative path inside `root`, creating objects on the way
///
/// Null deletes the target and prunes parents left empty.
pub(crate) fn write_at(root: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_at(root, &parts);
        return;
    }

    let mut current = root;
    for part in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(last.to_string(), value);
    }
}

fn remove_at(node: &mut Value, parts: &[&str]) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    let Some(map) = node.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        map.remove(*first);
        return;
    }
    if let Some(child) = map.get_mut(*first) {
        remove_at(child, rest);
        if matches!(child, Value::Object(m) if m.is_empty()) {
            map.remove(*first);
        }
    }
}

/// Read the value at a relative path inside `root`
pub(crate) fn read_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in segments(path) {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Children of an object value as keyed snapshots
pub(crate) fn children_of(value: Option<&Value>) -> Vec<Snapshot> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| Snapshot::new(k.clone(), Some(v.clone())))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| Snapshot::new(i.to_string(), Some(v.clone())))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/users//ada/"), "users/ada");
        assert_eq!(last_segment("users/ada"), Some("ada"));
        assert_eq!(last_segment("/"), None);
    }

    #[test]
    fn test_merge_fields_keeps_other_fields() {
        let current = json!({"name": "Ada", "age": 36});
        let mut fields = Map::new();
        fields.insert("age".into(), json!(37));
        assert_eq!(merge_fields(Some(current), &fields), json!({"name": "Ada", "age": 37}));
    }

    #[test]
    fn test_merge_fields_deep_path_and_delete() {
        let current = json!({"address": {"city": "Paris", "zip": "75001"}, "nick": "A"});
        let mut fields = Map::new();
        fields.insert("address/city".into(), json!("Lyon"));
        fields.insert("nick".into(), Value::Null);
        assert_eq!(
            merge_fields(Some(current), &fields),
            json!({"address": {"city": "Lyon", "zip": "75001"}})
        );
    }

    #[test]
    fn test_field_key_accepts_both_separators() {
        assert_eq!(field_key("address.city"), "address/city");
        assert_eq!(field_key("/profile/name."), "profile/name");
    }

    #[test]
    fn test_delete_prunes_empty_parents() {
        let mut root = json!({"a": {"b": {"c": 1}}, "x": 1});
        write_at(&mut root, "a/b/c", Value::Null);
        assert_eq!(root, json!({"x": 1}));
    }

    #[test]
    fn test_snapshot_exists() {
        assert!(!Snapshot::at("a/b", None).exists());
        assert!(!Snapshot::at("a/b", Some(Value::Null)).exists());
        assert!(Snapshot::at("a/b", Some(json!(0))).exists());
        assert_eq!(Snapshot::at("a/b", None).key.as_deref(), Some("b"));
    }
}
