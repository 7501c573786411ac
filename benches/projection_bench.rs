//! Benchmark for optimistic projection, reconciliation and snapshot capture.
//!
//! Measures how the pure view transforms scale with page size and segment
//! count, and what a full in-memory mutation costs end to end.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mutation_sync::domain::{
    CachedView, Entity, EntityId, FlatView, ListQuery, MergeStrategy, PageMeta, ResourceDescriptor,
    SegmentedView, ViewKey, ViewKeyPrefix,
};
use mutation_sync::infrastructure::{CacheStore, InMemoryCacheStore, InMemoryTransport};
use mutation_sync::sync::{
    Change, MutationId, MutationRequest, OptimisticProjector, Reconciler, SnapshotManager, SyncOptions,
    Synchronizer, ViewSelection,
};
use serde_json::{Map, Value, json};
use std::hint::black_box;
use std::sync::Arc;

fn entity(index: usize) -> Entity {
    let mut fields = Map::new();
    fields.insert("projectTitle".to_string(), json!(format!("Project {index}")));
    fields.insert("status".to_string(), json!("pending"));
    Entity::new(EntityId::new(format!("e{index}")), fields)
}

fn page(size: usize, page: u64, total: u64) -> FlatView {
    FlatView::new(
        (0..size).map(entity).collect(),
        PageMeta::new(page, size as u64, total),
    )
}

// =============================================================================
// Projection Benchmarks
// =============================================================================

fn benchmark_project_flat(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("project_flat");
    let created = Entity::new(EntityId::new("temp-1"), Map::new());
    let patch: Map<String, Value> = json!({"status": "approved"})
        .as_object()
        .cloned()
        .unwrap_or_default();

    for size in [10, 100, 1000] {
        let view = CachedView::Flat(page(size, 1, size as u64));
        let target = EntityId::new(format!("e{}", size / 2));

        group.bench_with_input(BenchmarkId::new("create", size), &view, |bencher, view| {
            bencher.iter(|| {
                black_box(OptimisticProjector::project(
                    view,
                    Change::Create(&created),
                    MergeStrategy::DEFAULT,
                ))
            });
        });
        group.bench_with_input(BenchmarkId::new("update", size), &view, |bencher, view| {
            bencher.iter(|| {
                black_box(OptimisticProjector::project(
                    view,
                    Change::Update {
                        id: &target,
                        patch: &patch,
                    },
                    MergeStrategy::DEFAULT,
                ))
            });
        });
        group.bench_with_input(BenchmarkId::new("delete", size), &view, |bencher, view| {
            bencher.iter(|| {
                black_box(OptimisticProjector::project(
                    view,
                    Change::Delete(&target),
                    MergeStrategy::DEFAULT,
                ))
            });
        });
    }

    group.finish();
}

fn benchmark_project_segmented(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("project_segmented");
    let created = Entity::new(EntityId::new("temp-1"), Map::new());

    for segments in [1_u64, 10, 50] {
        let total = segments * 20;
        let view = CachedView::Segmented(SegmentedView::new(
            (1..=segments).map(|index| page(20, index, total)).collect(),
        ));

        group.bench_with_input(
            BenchmarkId::new("create", segments),
            &view,
            |bencher, view| {
                bencher.iter(|| {
                    black_box(OptimisticProjector::project(
                        view,
                        Change::Create(&created),
                        MergeStrategy::DEFAULT,
                    ))
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Reconciliation Benchmarks
// =============================================================================

fn benchmark_reconcile_create(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("reconcile_create");
    let provisional = EntityId::new("temp-1");
    let server = entity(999_999);

    for size in [10, 100, 1000] {
        let mut data = page(size, 1, size as u64 + 1);
        data.data.insert(0, Entity::new(provisional.clone(), Map::new()));
        let view = CachedView::Flat(data);

        group.bench_with_input(BenchmarkId::from_parameter(size), &view, |bencher, view| {
            bencher.iter(|| {
                black_box(Reconciler::reconcile_create(
                    view,
                    &provisional,
                    &server,
                    MergeStrategy::DEFAULT,
                ))
            });
        });
    }

    group.finish();
}

// =============================================================================
// Snapshot Benchmarks
// =============================================================================

fn benchmark_snapshot_capture(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("snapshot_capture");

    for views in [1_u64, 10, 100] {
        let store = InMemoryCacheStore::new();
        for index in 1..=views {
            store.set_view(
                ViewKey::list("igps", &ListQuery::new(index, 20)),
                Arc::new(CachedView::Flat(page(20, index, views * 20))),
            );
        }
        let selection = ViewSelection::prefixes(&[ViewKeyPrefix::lists("igps")]);

        group.bench_with_input(BenchmarkId::from_parameter(views), &store, |bencher, store| {
            bencher.iter(|| {
                black_box(SnapshotManager::capture(
                    store,
                    MutationId::generate(),
                    &selection,
                ))
            });
        });
    }

    group.finish();
}

// =============================================================================
// End-to-end Benchmarks
// =============================================================================

fn benchmark_mutation_round_trip(criterion: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    let store = InMemoryCacheStore::new();
    store.set_view(
        ViewKey::list("igps", &ListQuery::default()),
        Arc::new(CachedView::Flat(page(10, 1, 10))),
    );
    let backend = InMemoryTransport::new();
    runtime.block_on(backend.seed("igp", page(10, 1, 10).data));
    let synchronizer = Synchronizer::new(
        ResourceDescriptor::new("igps", "igp"),
        Arc::new(store),
        Arc::new(backend),
        SyncOptions::default(),
    );
    let payload: Map<String, Value> = json!({"projectTitle": "Bench"})
        .as_object()
        .cloned()
        .unwrap_or_default();

    criterion.bench_function("mutation_round_trip_update", |bencher| {
        bencher.to_async(&runtime).iter(|| async {
            black_box(
                synchronizer
                    .mutate(MutationRequest::update(
                        EntityId::new("e3"),
                        payload.clone(),
                    ))
                    .await,
            )
        });
    });
}

criterion_group!(
    benches,
    benchmark_project_flat,
    benchmark_project_segmented,
    benchmark_reconcile_create,
    benchmark_snapshot_capture,
    benchmark_mutation_round_trip
);

criterion_main!(benches);
