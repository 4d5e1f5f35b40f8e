//! Query Performance Benchmarks
//!
//! Measures client-side query evaluation and adapter reads over the
//! in-memory store, so no Firebase project is needed.
//!
//! ## Benchmark Structure
//! 1. Query evaluation (filter, order, limit) over growing collections
//! 2. Adapter reads (single collection read) under various concurrency levels
//!
//! ## Running Benchmarks
//! ```bash
//! cargo bench --bench query_bench
//!
//! # Specific benchmark
//! cargo bench --bench query_bench -- apply/1000
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use firebase_data_source::store::Snapshot;
use firebase_data_source::{Direction, MemoryStore, QuerySpec, ReadMode, RemoteDataSource, UserEntity};
use futures::future::join_all;
use futures::StreamExt;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tokio::runtime::Runtime;

/// Shared runtime for all benchmarks
static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime")
});

/// Collection sizes to test
const COLLECTION_SIZES: &[usize] = &[10, 100, 1_000, 10_000];

/// Concurrency levels to test
const CONCURRENCY_LEVELS: &[usize] = &[1, 4, 16, 64];

fn user(i: usize) -> Value {
    json!({"id": "Unknown", "name": format!("user-{}", i), "age": (i * 7919) % 100})
}

fn snapshots(size: usize) -> Vec<Snapshot> {
    (0..size).map(|i| Snapshot::new(format!("u{:05}", i), Some(user(i)))).collect()
}

fn adults_by_age() -> QuerySpec {
    QuerySpec::builder()
        .order_by("age", Direction::Descending)
        .where_greater_than_or_equal_to("age", json!(18))
        .limit_to_first(20)
        .build()
        .expect("Invalid query")
}

// ============================================================================
// Query Evaluation Benchmarks
// ============================================================================

fn bench_query_apply(c: &mut Criterion) {
    let spec = adults_by_age();

    let mut group = c.benchmark_group("query");
    for &size in COLLECTION_SIZES {
        let children = snapshots(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("apply", size), &children, |b, children| {
            b.iter(|| black_box(spec.apply(children.clone())));
        });
    }
    group.finish();
}

// ============================================================================
// Adapter Read Benchmarks
// ============================================================================

fn bench_read_many(c: &mut Criterion) {
    let mut users = Map::new();
    for i in 0..1_000 {
        users.insert(format!("u{:05}", i), user(i));
    }
    let source = RemoteDataSource::new(MemoryStore::with_data(json!({ "users": users })));
    let spec = adults_by_age();

    let mut group = c.benchmark_group("read_many");
    for &concurrency in CONCURRENCY_LEVELS {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(BenchmarkId::new("single", concurrency), &concurrency, |b, &concurrency| {
            b.to_async(&*RUNTIME).iter(|| async {
                let futures: Vec<_> = (0..concurrency)
                    .map(|_| async {
                        let mut subscription = source.read_many::<UserEntity>("users", &spec, ReadMode::Single);
                        black_box(subscription.next().await)
                    })
                    .collect();

                join_all(futures).await
            });
        });
    }
    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(query_benches, bench_query_apply);

criterion_group!(read_benches, bench_read_many);

criterion_main!(query_benches, read_benches);
