//! Records and their shared entity fields
//!
//! Every record stored through a data source embeds an [`Entity`]: an
//! identifier plus creation and update timestamps. The identifier is
//! replaced by the store-assigned key whenever a record is read back.

use crate::error::AppError;
use chrono::{DateTime, FixedOffset, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identifier of a record that has not been read from a store yet
pub const DEFAULT_ID: &str = "Unknown";

/// Timestamp layout, e.g. `2024-03-01T10:20:30+0100`
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Format a timestamp with [`DATE_FORMAT`]
pub fn format_timestamp(time: &DateTime<FixedOffset>) -> String {
    time.format(DATE_FORMAT).to_string()
}

/// Parse a timestamp written with [`DATE_FORMAT`]
///
/// The offset carried by the string is preserved.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, AppError> {
    DateTime::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| AppError::parse(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Current local time formatted with [`DATE_FORMAT`]
pub fn now_timestamp() -> String {
    format_timestamp(&Local::now().fixed_offset())
}

fn default_id() -> String {
    DEFAULT_ID.to_string()
}

/// Fields shared by every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Store key, or [`DEFAULT_ID`] before the first read
    #[serde(default = "default_id")]
    pub id: String,

    /// Creation time
    #[serde(default = "now_timestamp")]
    pub created_at: String,

    /// Last update time
    #[serde(default = "now_timestamp")]
    pub updated_at: String,
}

impl Entity {
    /// Create an entity stamped with the current time
    pub fn new() -> Self {
        let now = now_timestamp();
        Self {
            id: default_id(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Refresh `updated_at` to the current time
    pub fn touch(&mut self) {
        self.updated_at = now_timestamp();
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

/// A record that can be stored through a data source
///
/// Implementors embed an [`Entity`], usually flattened into the serialized
/// form with `#[serde(flatten)]`.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Shared entity fields
    fn entity(&self) -> &Entity;

    /// Mutable access to the shared entity fields
    fn entity_mut(&mut self) -> &mut Entity;

    /// Record identifier
    fn id(&self) -> &str {
        &self.entity().id
    }

    /// Overwrite the identifier with a store-assigned key
    fn assign_id(&mut self, key: impl Into<String>) {
        self.entity_mut().id = key.into();
    }
}

impl Record for Entity {
    fn entity(&self) -> &Entity {
        self
    }

    fn entity_mut(&mut self) -> &mut Entity {
        self
    }
}

/// A user profile record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserEntity {
    /// Shared entity fields
    #[serde(flatten)]
    pub entity: Entity,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

impl UserEntity {
    /// Create a user record with the given display name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            entity: Entity::new(),
            name: Some(name.into()),
        }
    }
}

impl Record for UserEntity {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }
}
