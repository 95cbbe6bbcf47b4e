//! Criterion benchmarks for the task manager.
//!
//! Run with: cargo bench -p keel-task --bench task_criterion

use std::{
    hint::black_box,
    sync::atomic::{AtomicU64, Ordering},
};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use keel_task::{TaskManager, TaskManagerConfig, TaskQueueFlags, Timeout};

fn bench_task_graph(c: &mut Criterion) {
    let tasks = TaskManager::new(TaskManagerConfig::default());
    let mut group = c.benchmark_group("task_graph");

    for width in [8_usize, 64, 512] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("fan_in", width), &width, |b, &width| {
            b.iter(|| {
                let sink = tasks.create_join_task("sink");
                let mut ids = Vec::with_capacity(width + 1);
                for _ in 0..width {
                    let id = tasks.create_task("leaf", || {
                        black_box(17_u64.pow(3));
                    });
                    tasks.add_dependency(id, sink);
                    ids.push(id);
                }
                ids.push(sink);
                tasks.dispatch_all(&ids, TaskQueueFlags::NORMAL);
                tasks.wait_for_completion(sink, Timeout::INFINITE)
            });
        });
    }

    group.finish();
}

fn bench_parallel_for(c: &mut Criterion) {
    let tasks = TaskManager::new(TaskManagerConfig::default());
    let mut group = c.benchmark_group("parallel_for");

    for count in [1_000_usize, 100_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sum", count), &count, |b, &count| {
            b.iter(|| {
                let sum = AtomicU64::new(0);
                tasks.parallel_for(count, 256, "sum", |index| {
                    sum.fetch_add(index as u64, Ordering::Relaxed);
                });
                black_box(sum.into_inner())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_task_graph, bench_parallel_for);
criterion_main!(benches);
