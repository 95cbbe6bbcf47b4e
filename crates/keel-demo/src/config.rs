//! Environment configuration.

use std::str::FromStr;

use keel_task::TaskManagerConfig;
use tracing::warn;

const DEFAULT_TARGET_FPS: f32 = 60.0;
const DEFAULT_FRAMES: u64 = 600;
const DEFAULT_ENTITIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    /// Worker threads for normal and time-critical work; `None` keeps the
    /// task manager default.
    pub workers: Option<usize>,
    pub target_fps: f32,
    /// Frames to run; 0 runs until killed.
    pub frames: u64,
    pub entities: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            workers: None,
            target_fps: DEFAULT_TARGET_FPS,
            frames: DEFAULT_FRAMES,
            entities: DEFAULT_ENTITIES,
        }
    }
}

impl DemoConfig {
    /// Read `KEEL_WORKERS`, `KEEL_TARGET_FPS`, `KEEL_FRAMES` and
    /// `KEEL_ENTITIES`, falling back to defaults for missing or invalid values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            workers: parse(&lookup, "KEEL_WORKERS"),
            target_fps: parse::<f32>(&lookup, "KEEL_TARGET_FPS")
                .filter(|fps| fps.is_finite() && *fps > 0.0)
                .unwrap_or(defaults.target_fps),
            frames: parse(&lookup, "KEEL_FRAMES").unwrap_or(defaults.frames),
            entities: parse(&lookup, "KEEL_ENTITIES").unwrap_or(defaults.entities),
        }
    }

    pub fn task_manager(&self) -> TaskManagerConfig {
        let mut config = TaskManagerConfig::default();
        if let (Some(workers), Some(group)) = (self.workers, config.worker_groups.first_mut()) {
            group.threads = workers;
        }
        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!(key, value = %value, "ignoring invalid value");
    }
    parsed
}
