//! End-to-end adapter tests over the in-memory store
//!
//! Set RUST_LOG=firebase_data_source=debug to see the adapter's logs.

use firebase_data_source::{
    Direction, ErrorKind, FieldUpdates, MemoryStore, ReadMode, RemoteDataSource, StoreError,
    StoreErrorCode, Subscription, UserEntity, WriteMode,
};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn next<T>(subscription: &mut Subscription<T>) -> Option<Result<T, firebase_data_source::AppError>> {
    tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("delivery timed out")
}

fn names(users: &[UserEntity]) -> Vec<&str> {
    users.iter().filter_map(|u| u.name.as_deref()).collect()
}

/// Test: Two subscribers to one collection see the same sequence of changes
#[tokio::test]
async fn test_subscribers_follow_writes_and_deletes() {
    init_logging();
    let source = RemoteDataSource::new(MemoryStore::new());
    source
        .write(&UserEntity::new("Ada"), "users/ada", WriteMode::Direct)
        .await
        .unwrap();

    let mut by_name = source.search::<UserEntity, _>("users", |q| q.order_by("name", Direction::Ascending));
    let mut by_key = source.search::<UserEntity, _>("users", |q| q.order_by_key(Direction::Descending));

    assert_eq!(names(&next(&mut by_name).await.unwrap().unwrap()), vec!["Ada"]);
    assert_eq!(names(&next(&mut by_key).await.unwrap().unwrap()), vec!["Ada"]);

    source
        .write(&UserEntity::new("Bob"), "users/bob", WriteMode::Transactional)
        .await
        .unwrap();
    assert_eq!(names(&next(&mut by_name).await.unwrap().unwrap()), vec!["Ada", "Bob"]);
    assert_eq!(names(&next(&mut by_key).await.unwrap().unwrap()), vec!["Bob", "Ada"]);

    source.delete("users/ada").await.unwrap();
    assert_eq!(names(&next(&mut by_name).await.unwrap().unwrap()), vec!["Bob"]);

    source.delete("users/bob").await.unwrap();
    let err = next(&mut by_name).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    by_name.cancel();
    by_key.cancel();
    assert!(next(&mut by_name).await.is_none());
}

/// Test: Merged fields reach a live single-record read
#[tokio::test]
async fn test_update_reaches_live_read() {
    init_logging();
    let source = RemoteDataSource::new(MemoryStore::new());
    source
        .write(&UserEntity::new("Ada"), "/users/ada/", WriteMode::Direct)
        .await
        .unwrap();

    let mut live = source.read_one::<UserEntity>("users/ada", ReadMode::Continuous);
    let first = next(&mut live).await.unwrap().unwrap();
    assert_eq!(first.entity.id, "ada");

    source
        .update(FieldUpdates::new().field("name", json!("Ada L.")), "users/ada", WriteMode::Direct)
        .await
        .unwrap();
    let second = next(&mut live).await.unwrap().unwrap();
    assert_eq!(second.name.as_deref(), Some("Ada L."));
    assert_eq!(second.entity.created_at, first.entity.created_at);
}

/// Test: A permission failure ends every live read with the same category
#[tokio::test]
async fn test_store_failure_ends_live_reads() {
    init_logging();
    let store = MemoryStore::new();
    let source = RemoteDataSource::new(store.clone());
    source
        .write(&UserEntity::new("Ada"), "users/ada", WriteMode::Direct)
        .await
        .unwrap();

    let mut live = source.read_one::<UserEntity>("users/ada", ReadMode::Continuous);
    next(&mut live).await.unwrap().unwrap();

    store.fail_with(Some(StoreError::new(StoreErrorCode::PermissionDenied, "denied")));
    let err = next(&mut live).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(next(&mut live).await.is_none());

    let write = source.write(&UserEntity::new("Bob"), "users/bob", WriteMode::Direct).await;
    assert_eq!(write.unwrap_err().kind(), ErrorKind::Permission);
}
