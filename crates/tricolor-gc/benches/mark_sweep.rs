//! Benchmark: full cycles, write-barrier cost and pause times.

use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tricolor_gc::{
    CollectMode, Collector, GcConfig, MarkSliceResult, NoopControl, ObjectId, RootGuard,
    RootRegistry,
};

fn collector(mark_workers: usize) -> (Arc<Collector>, Arc<RootRegistry>) {
    let roots = Arc::new(RootRegistry::new());
    let config = GcConfig {
        mark_workers,
        verify_marking: false,
        ..GcConfig::manual()
    };
    let gc = Collector::new(config, Arc::clone(&roots), NoopControl).unwrap();
    (gc, roots)
}

/// A pinned binary tree of `depth` levels.
fn tree(gc: &Collector, roots: &Arc<RootRegistry>, depth: u32) -> RootGuard {
    fn build(gc: &Collector, depth: u32) -> ObjectId {
        if depth == 0 {
            return gc.allocate(&[]).unwrap();
        }
        let left = build(gc, depth - 1);
        let right = build(gc, depth - 1);
        gc.allocate(&[left, right]).unwrap()
    }
    roots.pin(build(gc, depth))
}

fn bench_collect_live_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_live_tree");
    for workers in [1, 4] {
        let (gc, roots) = collector(workers);
        let _root = tree(&gc, &roots, 14);
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| black_box(gc.collect_now(CollectMode::Sync).unwrap()));
        });
    }
    group.finish();
}

fn bench_collect_garbage(c: &mut Criterion) {
    for count in [1_000, 10_000] {
        c.bench_function(&format!("collect_{count}_garbage"), |b| {
            let (gc, _roots) = collector(1);
            b.iter(|| {
                for _ in 0..count {
                    gc.allocate_with_fields(2).unwrap();
                }
                black_box(gc.collect_now(CollectMode::Sync).unwrap());
            });
        });
    }
}

fn bench_set_reference(c: &mut Criterion) {
    let (gc, roots) = collector(1);
    let holder = gc.allocate_with_fields(1).unwrap();
    let _pin = roots.pin(holder);
    let target = gc.allocate(&[]).unwrap();

    c.bench_function("set_reference_idle", |b| {
        b.iter(|| gc.set_reference(holder, 0, black_box(Some(target))).unwrap());
    });

    gc.start_cycle().unwrap();
    while let MarkSliceResult::Pending { .. } = gc.mark_slice(64).unwrap() {}
    c.bench_function("set_reference_marking", |b| {
        b.iter(|| gc.set_reference(holder, 0, black_box(Some(target))).unwrap());
    });
    gc.collect_now(CollectMode::Sync).unwrap();
}

fn bench_max_pause(c: &mut Criterion) {
    let (gc, roots) = collector(1);
    let _root = tree(&gc, &roots, 14);
    c.bench_function("max_pause_live_tree", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let start = Instant::now();
                let outcome = gc.collect_now(CollectMode::Sync).unwrap();
                let pause = outcome.metrics().map_or(start.elapsed(), |m| m.max_pause());
                total += pause;
            }
            total
        });
    });
}

criterion_group!(
    benches,
    bench_collect_live_tree,
    bench_collect_garbage,
    bench_set_reference,
    bench_max_pause
);
criterion_main!(benches);
