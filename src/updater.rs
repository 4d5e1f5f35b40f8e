//! Field update sets for partial writes

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::store::field_key;

/// A set of field paths and their new values
///
/// Only the named fields are written by an update; everything else stored at
/// the target path is left untouched. Setting a field to null removes it.
/// Nested fields may be written `address/city` or `address.city`; both name
/// the same field.
///
/// # Example
/// ```
/// use firebase_data_source::FieldUpdates;
/// use serde_json::json;
///
/// let updates = FieldUpdates::build(|u| {
///     u.set("name", json!("Ada"));
///     u.set("nickname", json!(null));
/// });
/// assert_eq!(updates.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdates {
    fields: Map<String, Value>,
}

impl FieldUpdates {
    /// Create an empty update set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an update set from a block of `set` calls
    pub fn build(block: impl FnOnce(&mut FieldUpdates)) -> Self {
        let mut updates = Self::new();
        block(&mut updates);
        updates
    }

    /// Add a field, chaining
    pub fn field(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set(path, value);
        self
    }

    /// Add a field; a repeated path replaces the earlier value
    pub fn set(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.fields.insert(field_key(&path.into()), value);
        self
    }

    /// Add a field from any serializable value
    pub fn set_serialized<T: Serialize>(&mut self, path: impl Into<String>, value: &T) -> Result<&mut Self, AppError> {
        let value = serde_json::to_value(value).map_err(|e| AppError::parse(e.to_string()))?;
        Ok(self.set(path, value))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field was declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declared field paths
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Borrow the fields
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume into the field map
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}
