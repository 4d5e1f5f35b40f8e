//! Remote data adapter
//!
//! [`RemoteDataSource`] gives every backend the same record-level API: read one
//! record or a filtered collection (once or continuously), overwrite, merge
//! fields, delete and search. Backend snapshots are decoded into [`Record`]s
//! and backend failures are normalized into [`AppError`] before reaching the
//! caller.
//!
//! # Example
//! ```
//! use firebase_data_source::{MemoryStore, ReadMode, RemoteDataSource, UserEntity, WriteMode};
//! use futures::StreamExt;
//!
//! # tokio_test::block_on(async {
//! let source = RemoteDataSource::new(MemoryStore::new());
//! source.write(&UserEntity::new("Ada"), "users/ada", WriteMode::Direct).await.unwrap();
//!
//! let mut users = source.read_one::<UserEntity>("users/ada", ReadMode::Single);
//! let user = users.next().await.unwrap().unwrap();
//! assert_eq!(user.entity.id, "ada");
//! assert_eq!(user.name.as_deref(), Some("Ada"));
//! # });
//! ```

use crate::database::RealtimeDatabase;
use crate::entity::Record;
use crate::error::{AppError, ErrorKind, StoreError};
use crate::firestore::Firestore;
use crate::query::{QueryBuilder, QuerySpec};
use crate::store::{merge_fields, normalize, Feed, Snapshot, Store};
use crate::subscription::{Cancellable, Subscription};
use crate::updater::FieldUpdates;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a read delivers results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Deliver once, then end the subscription
    Single,
    /// Deliver now and after every remote change until cancelled
    #[default]
    Continuous,
}

/// How a write reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Unconditional write, last writer wins
    #[default]
    Direct,
    /// Read-modify-write against the current stored value
    Transactional,
}

/// Adapter over the Realtime Database backend
pub type DatabaseDataSource = RemoteDataSource<RealtimeDatabase>;

/// Adapter over the Firestore backend
pub type FirestoreDataSource = RemoteDataSource<Firestore>;

/// Record-level access to a hierarchical store
///
/// Reads return a [`Subscription`]; they spawn onto the current tokio runtime,
/// so they must be called from within one.
#[derive(Clone, Debug)]
pub struct RemoteDataSource<S: Store> {
    store: S,
}

impl<S: Store> RemoteDataSource<S> {
    /// Wrap a store backend
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying backend
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read the record stored at `path`
    ///
    /// Delivers `NotFound` when nothing is stored there and `Parse` when the
    /// stored value does not match `T`. Neither ends a continuous read; a
    /// store failure does.
    pub fn read_one<T: Record>(&self, path: &str, mode: ReadMode) -> Subscription<T> {
        let path = normalize(path);
        let cancel = Cancellable::new();
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(path = %path, ?mode, "Opening record subscription");

        match mode {
            ReadMode::Single => {
                let store = self.store.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        result = store.get(&path) => {
                            let _ = tx.send(settle(&path, result, decode_one::<T>));
                        }
                        _ = cancel.cancelled() => {}
                    }
                    debug!(path = %path, "Single read finished");
                });
            }
            ReadMode::Continuous => {
                let feed = self.store.watch(&path, cancel.clone());
                forward(feed, tx, cancel.clone(), path, decode_one::<T>);
            }
        }

        Subscription::new(rx, cancel)
    }

    /// Read the children of `path` that satisfy `spec`, in query order
    ///
    /// An empty result is delivered as `NotFound`. A query the backend cannot
    /// express yields a single `BadArguments` error.
    pub fn read_many<T: Record>(&self, path: &str, spec: &QuerySpec, mode: ReadMode) -> Subscription<Vec<T>> {
        let path = normalize(path);
        let cancel = Cancellable::new();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Err(e) = self.store.validate_query(spec) {
            warn!(path = %path, error = %e, "Rejected query");
            let _ = tx.send(Err(e));
            return Subscription::new(rx, cancel);
        }
        debug!(path = %path, ?mode, "Opening collection subscription");

        match mode {
            ReadMode::Single => {
                let store = self.store.clone();
                let spec = spec.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        result = store.query(&path, &spec) => {
                            let _ = tx.send(settle(&path, result, decode_many::<T>));
                        }
                        _ = cancel.cancelled() => {}
                    }
                    debug!(path = %path, "Single query finished");
                });
            }
            ReadMode::Continuous => {
                let feed = self.store.watch_query(&path, spec, cancel.clone());
                forward(feed, tx, cancel.clone(), path, decode_many::<T>);
            }
        }

        Subscription::new(rx, cancel)
    }

    /// Build a query from `block` and follow its results continuously
    ///
    /// # Example
    /// ```
    /// use firebase_data_source::{Direction, MemoryStore, RemoteDataSource, UserEntity};
    /// use serde_json::json;
    ///
    /// # tokio_test::block_on(async {
    /// let source = RemoteDataSource::new(MemoryStore::new());
    /// let adults = source.search::<UserEntity, _>("users", |q| {
    ///     q.order_by("age", Direction::Ascending)
    ///         .where_greater_than_or_equal_to("age", json!(18))
    /// });
    /// adults.cancel();
    /// # });
    /// ```
    pub fn search<T, F>(&self, path: &str, block: F) -> Subscription<Vec<T>>
    where
        T: Record,
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        match block(QueryBuilder::new()).build() {
            Ok(spec) => self.read_many(path, &spec, ReadMode::Continuous),
            Err(e) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(Err(e));
                Subscription::new(rx, Cancellable::new())
            }
        }
    }

    /// Overwrite the whole record at `path`
    pub async fn write<T: Record>(&self, record: &T, path: &str, mode: WriteMode) -> Result<(), AppError> {
        let path = normalize(path);
        let value = serde_json::to_value(record).map_err(|e| AppError::parse(e.to_string()))?;
        debug!(path = %path, ?mode, "Writing record");

        match mode {
            WriteMode::Direct => self.store.set(&path, value).await?,
            WriteMode::Transactional => {
                self.store
                    .transaction(&path, Box::new(move |_current| Ok(value.clone())))
                    .await?
            }
        }
        Ok(())
    }

    /// Merge only the named fields into the record at `path`
    pub async fn update(&self, updates: FieldUpdates, path: &str, mode: WriteMode) -> Result<(), AppError> {
        let path = normalize(path);
        if updates.is_empty() {
            return Ok(());
        }
        debug!(path = %path, ?mode, fields = updates.len(), "Updating record");

        let fields = updates.into_map();
        match mode {
            WriteMode::Direct => self.store.update(&path, fields).await?,
            WriteMode::Transactional => {
                self.store
                    .transaction(&path, Box::new(move |current| Ok(merge_fields(current, &fields))))
                    .await?
            }
        }
        Ok(())
    }

    /// Remove the value at `path`
    pub async fn delete(&self, path: &str) -> Result<(), AppError> {
        let path = normalize(path);
        debug!(path = %path, "Deleting record");
        self.store.remove(&path).await?;
        Ok(())
    }
}

/// Decode a single snapshot into a record keyed by the snapshot's key
fn decode_one<T: Record>(snapshot: Snapshot) -> Result<T, AppError> {
    let value = match snapshot.value {
        Some(value) if !value.is_null() => value,
        _ => return Err(AppError::from(ErrorKind::NotFound)),
    };
    let mut record: T = serde_json::from_value(value).map_err(|e| AppError::parse(e.to_string()))?;
    if let Some(key) = snapshot.key {
        record.assign_id(key);
    }
    Ok(record)
}

/// Decode a query result; an empty result is `NotFound`
fn decode_many<T: Record>(rows: Vec<Snapshot>) -> Result<Vec<T>, AppError> {
    if rows.is_empty() {
        return Err(AppError::from(ErrorKind::NotFound));
    }
    rows.into_iter().map(decode_one).collect()
}

fn settle<R, T, D>(path: &str, result: Result<R, StoreError>, decode: D) -> Result<T, AppError>
where
    D: Fn(R) -> Result<T, AppError>,
{
    match result {
        Ok(raw) => {
            let decoded = decode(raw);
            if let Err(e) = &decoded {
                if e.kind() == ErrorKind::Parse {
                    warn!(path = %path, error = %e, "Failed to parse stored value");
                }
            }
            decoded
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Store read failed");
            Err(e.into())
        }
    }
}

/// Forward a backend feed to a subscriber until it ends, errors or is cancelled
fn forward<R, T, D>(
    mut feed: Feed<R>,
    tx: mpsc::UnboundedSender<Result<T, AppError>>,
    cancel: Cancellable,
    path: String,
    decode: D,
) where
    R: Send + 'static,
    T: Send + 'static,
    D: Fn(R) -> Result<T, AppError> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                item = feed.recv() => match item {
                    Some(Ok(raw)) => {
                        if tx.send(settle(&path, Ok(raw), &decode)).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(settle(&path, Err(e), &decode));
                        break;
                    }
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        // Stops the backend watch when the subscriber went away first
        cancel.cancel();
        debug!(path = %path, "Subscription closed");
    });
}
