//! Keel frame driver
//!
//! This binary:
//! 1. Builds a task manager and a world from `KEEL_*` environment variables
//! 2. Spawns a transform hierarchy driven by motion, transform and bounds systems
//! 3. Ticks the world at the target frame rate, logging a summary every second

mod components;
mod config;
mod scene;
mod systems;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use keel_ecs::{FrameTime, World};
use keel_task::TaskManager;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::DemoConfig,
    systems::{BoundsSystem, MotionSystem, TransformSystem},
};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = DemoConfig::from_env();
    info!(?config, "starting keel demo");

    let tasks = Arc::new(TaskManager::new(config.task_manager()));
    let mut world = World::new(Arc::clone(&tasks));
    world.add_system(MotionSystem)?;
    world.add_system(TransformSystem::default())?;
    world.add_system(BoundsSystem::default())?;

    let scene = scene::spawn(&world, config.entities)?;
    info!(
        entities = world.entity_count(),
        roots = scene.roots.len(),
        workers = tasks.worker_count(),
        "scene ready"
    );

    run(&mut world, &config);

    tasks.shutdown();
    info!(frames = world.tick_count(), "shut down");
    Ok(())
}

fn run(world: &mut World, config: &DemoConfig) {
    let frame_budget = Duration::from_secs_f32(1.0 / config.target_fps);
    let mut time = FrameTime::first(frame_budget.as_secs_f32());

    let mut frame_start = Instant::now();
    let mut window_start = frame_start;
    let mut window_frames = 0_u32;
    let mut window_busy = Duration::ZERO;

    while config.frames == 0 || time.frame_index < config.frames {
        let tick_start = Instant::now();
        world.tick(&time);
        let busy = tick_start.elapsed();

        window_busy += busy;
        window_frames += 1;
        if window_start.elapsed() >= SUMMARY_INTERVAL {
            log_summary(world, &time, window_frames, window_busy, window_start.elapsed());
            window_start = Instant::now();
            window_frames = 0;
            window_busy = Duration::ZERO;
        }

        if let Some(idle) = frame_budget.checked_sub(busy) {
            thread::sleep(idle);
        }

        let now = Instant::now();
        time = time.advance((now - frame_start).as_secs_f32());
        frame_start = now;
    }
}

fn log_summary(world: &mut World, time: &FrameTime, frames: u32, busy: Duration, window: Duration) {
    let fps = f64::from(frames) / window.as_secs_f64();
    let tick_ms = busy.as_secs_f64() * 1000.0 / f64::from(frames.max(1));
    let transforms = world
        .system_mut::<TransformSystem>()
        .map(|system| system.stats())
        .unwrap_or_default();
    let bounds = world
        .system_mut::<BoundsSystem>()
        .map(|system| system.bounds())
        .unwrap_or_default();

    info!(
        frame = time.frame_index,
        fps = (fps * 10.0).round() / 10.0,
        tick_ms = (tick_ms * 1000.0).round() / 1000.0,
        recomputed = transforms.recomputed,
        max_depth = transforms.max_depth,
        bounds_min = ?bounds.min,
        bounds_max = ?bounds.max,
        "frame summary"
    );
}
