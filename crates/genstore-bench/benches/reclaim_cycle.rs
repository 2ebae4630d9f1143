//! Criterion benchmarks for full add/retire/reclaim workloads.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use genstore_arena::DataStore;
use genstore_bench::{run_workload, WorkloadProfile};
use genstore_generation::GenerationHandler;

/// Benchmark: balanced churn with no readers, so every reclaim frees.
fn bench_churn_no_readers(c: &mut Criterion) {
    let profile = WorkloadProfile::churn(42);
    let handler = GenerationHandler::new();
    c.bench_function("churn_100k_no_readers", |b| {
        b.iter_batched(
            DataStore::<u64>::new,
            |mut store| black_box(run_workload(&mut store, &handler, &profile)),
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: balanced churn while one reader stays pinned, so hold lists
/// grow without being trimmed.
fn bench_churn_pinned_reader(c: &mut Criterion) {
    let profile = WorkloadProfile::churn(42);
    let handler = GenerationHandler::new();
    let mut reader = handler.register_reader();
    let _guard = reader.pin();
    c.bench_function("churn_100k_pinned_reader", |b| {
        b.iter_batched(
            DataStore::<u64>::new,
            |mut store| black_box(run_workload(&mut store, &handler, &profile)),
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: append-only bulk load.
fn bench_bulk_load(c: &mut Criterion) {
    let profile = WorkloadProfile::bulk_load(7);
    let handler = GenerationHandler::new();
    c.bench_function("bulk_load_100k", |b| {
        b.iter_batched(
            DataStore::<u64>::new,
            |mut store| black_box(run_workload(&mut store, &handler, &profile)),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_churn_no_readers,
    bench_churn_pinned_reader,
    bench_bulk_load
);
criterion_main!(benches);
