//! Criterion benchmarks for component pools, aspect churn and world ticks.
//!
//! Run with: cargo bench -p keel-ecs --bench ecs_criterion

use std::{hint::black_box, sync::Arc};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use keel_ecs::{
    ComponentPool, ComponentSet, DEFAULT_BLOCK_SIZE, Entity, FrameTime, System, World, WorldConfig,
};
use keel_task::{TaskManager, TaskManagerConfig};

#[derive(Default, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Default, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

fn world() -> World {
    let tasks = Arc::new(TaskManager::new(TaskManagerConfig::default()));
    World::with_config(tasks, WorldConfig::default().strict_errors(false))
}

fn pool_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("component_pool");

    for count in [100_u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("alloc_free", count), &count, |b, &count| {
            b.iter(|| {
                let mut pool = ComponentPool::<Position>::new(0, DEFAULT_BLOCK_SIZE);
                let indices: Vec<_> = (0..count).map(|_| pool.allocate_index()).collect();
                for index in indices {
                    black_box(pool.free_index(index));
                }
            });
        });
    }

    group.finish();
}

fn aspect_churn_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("aspect_churn");

    for count in [100_u64, 1000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("toggle_velocity", count), &count, |b, &count| {
            let world = world();
            world.aspect_id_of::<(Position, Velocity)>();
            world.aspect_id_of::<(Position,)>();
            let entities: Vec<_> = (0..count)
                .map(|_| {
                    let entity = world.create_entity();
                    world.add_component::<Position>(entity).unwrap();
                    entity
                })
                .collect();

            b.iter(|| {
                for &entity in &entities {
                    world.add_component::<Velocity>(entity).unwrap();
                }
                for &entity in &entities {
                    world.remove_component::<Velocity>(entity).unwrap();
                }
            });
        });
    }

    group.finish();
}

struct Integrate;

impl System for Integrate {
    type Components = (Position, Velocity);

    fn tick(
        &mut self,
        _: &World,
        time: &FrameTime,
        _: &[Entity],
        (positions, velocities): <Self::Components as ComponentSet>::Slices<'_>,
    ) {
        for (position, velocity) in positions.iter().zip(velocities) {
            // SAFETY: only this system touches Position and Velocity
            let (position, velocity) = unsafe { (position.as_mut(), velocity.as_ref()) };
            position.x += velocity.x * time.delta_seconds;
            position.y += velocity.y * time.delta_seconds;
            position.z += velocity.z * time.delta_seconds;
        }
    }
}

fn tick_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_tick");

    for count in [1000_u64, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("integrate", count), &count, |b, &count| {
            let mut world = world();
            world.add_system(Integrate).unwrap();
            for _ in 0..count {
                let entity = world.create_entity();
                world.add_component::<Position>(entity).unwrap();
                world
                    .add_component_with(entity, Velocity { x: 1.0, y: 0.5, z: 0.0 })
                    .unwrap();
            }

            let mut time = FrameTime::first(1.0 / 60.0);
            b.iter(|| {
                world.tick(&time);
                time = time.advance(1.0 / 60.0);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    pool_benchmarks,
    aspect_churn_benchmarks,
    tick_benchmarks
);
criterion_main!(benches);
