//! Firebase data source
//!
//! Uniform record access over Firebase Realtime Database and Cloud Firestore,
//! plus email/password authentication with verified-email login.
//!
//! A [`RemoteDataSource`] wraps any [`Store`](store::Store) backend and offers
//! the same operations for each: read one record or a filtered collection
//! (once or continuously), overwrite, merge fields, delete and search. Every
//! failure reaches the caller as an [`AppError`] from a small closed set of
//! categories.
//!
//! # Example
//! ```
//! use firebase_data_source::{
//!     Direction, FieldUpdates, MemoryStore, RemoteDataSource, UserEntity, WriteMode,
//! };
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let source = RemoteDataSource::new(MemoryStore::new());
//! source.write(&UserEntity::new("Ada"), "users/ada", WriteMode::Direct).await.unwrap();
//! source
//!     .update(FieldUpdates::new().field("name", json!("Ada L.")), "users/ada", WriteMode::Transactional)
//!     .await
//!     .unwrap();
//!
//! let mut users = source.search::<UserEntity, _>("users", |q| q.order_by("name", Direction::Ascending));
//! let found = users.next().await.unwrap().unwrap();
//! assert_eq!(found[0].name.as_deref(), Some("Ada L."));
//! # });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod auth;
pub mod database;
pub mod datasource;
pub mod entity;
pub mod error;
pub mod firestore;
pub mod query;
pub mod store;
pub mod subscription;
pub mod updater;

// Re-exports for convenience
pub use app::{App, AppOptions};
pub use auth::{Auth, AuthDataSource, AuthProvider, AuthResult, User};
pub use database::RealtimeDatabase;
pub use datasource::{DatabaseDataSource, FirestoreDataSource, ReadMode, RemoteDataSource, WriteMode};
pub use entity::{Entity, Record, UserEntity, DEFAULT_ID};
pub use error::{AppError, AuthError, ErrorKind, StoreError, StoreErrorCode};
pub use firestore::Firestore;
pub use query::{Direction, Operator, QueryBuilder, QuerySpec};
pub use store::{MemoryStore, Store};
pub use subscription::{Cancellable, Subscription};
pub use updater::FieldUpdates;
