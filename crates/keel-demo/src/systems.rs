//! Demo systems: motion feeds transforms, transforms feed bounds.

use std::sync::atomic::{AtomicUsize, Ordering};

use keel_ecs::{
    ComponentPtr, ComponentRef, ComponentSet, Dependencies, Entity, FrameTime, System, World,
};
use tracing::{trace, warn};

use crate::components::{SetTransformMessage, SetTransformParentMessage, Transform, Velocity};

type Slices<'a, S> = <<S as System>::Components as ComponentSet>::Slices<'a>;

/// Deeper chains are treated as roots. Also cuts parent cycles.
const MAX_DEPTH: usize = 32;
const PROPAGATE_GRANULARITY: usize = 256;
/// Half-size of the region roots bounce around in.
pub const EXTENT: f32 = 100.0;

// ============================================================================
// Motion
// ============================================================================

/// Integrates velocities and requests the new local poses.
#[derive(Debug, Default)]
pub struct MotionSystem;

impl System for MotionSystem {
    type Components = (Transform, Velocity);

    fn tick(
        &mut self,
        world: &World,
        time: &FrameTime,
        entities: &[Entity],
        (transforms, velocities): Slices<'_, Self>,
    ) {
        let dt = time.delta_seconds;
        for ((&entity, transform), velocity) in entities.iter().zip(transforms).zip(velocities) {
            // SAFETY: Transform is only written by TransformSystem, which runs
            // after this system; Velocity belongs to this system.
            let (transform, velocity) = unsafe { (transform.as_ref(), velocity.as_mut()) };

            let mut local = transform.local;
            for axis in 0..3 {
                local.translation[axis] += velocity.linear[axis] * dt;
                if local.translation[axis].abs() > EXTENT {
                    local.translation[axis] = local.translation[axis].clamp(-EXTENT, EXTENT);
                    velocity.linear[axis] = -velocity.linear[axis];
                }
            }

            world.queue_message(SetTransformMessage {
                target: ComponentRef::new(entity),
                local,
            });
        }
    }
}

// ============================================================================
// Transform hierarchy
// ============================================================================

/// Counters from the last tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransformStats {
    pub transforms: usize,
    pub roots: usize,
    pub max_depth: usize,
    pub recomputed: usize,
    pub dropped_messages: usize,
}

/// Applies transform messages and propagates world poses parent-first.
#[derive(Debug, Default)]
pub struct TransformSystem {
    /// Collection indices grouped by hierarchy depth.
    levels: Vec<Vec<usize>>,
    parents: Vec<Option<ComponentPtr<Transform>>>,
    stats: TransformStats,
}

impl TransformSystem {
    #[must_use]
    pub const fn stats(&self) -> TransformStats {
        self.stats
    }

    fn apply_messages(&mut self, world: &World) {
        let mut dropped = 0;
        let moves = world.consume_messages::<SetTransformMessage>();
        for SetTransformMessage { target, local } in moves {
            match target.get(world) {
                Some(ptr) => {
                    // SAFETY: this system owns Transform for the duration of its tick
                    let transform = unsafe { ptr.as_mut() };
                    transform.local = local;
                    transform.dirty = true;
                }
                None => dropped += 1,
            }
        }
        let reparents = world.consume_messages::<SetTransformParentMessage>();
        for SetTransformParentMessage { target, parent } in reparents {
            match target.get(world) {
                Some(ptr) => {
                    // SAFETY: as above
                    let transform = unsafe { ptr.as_mut() };
                    transform.parent = parent;
                    transform.dirty = true;
                }
                None => dropped += 1,
            }
        }
        self.stats.dropped_messages = dropped;
    }

    /// Resolve every parent and bucket indices by depth.
    fn build_levels(
        &mut self,
        world: &World,
        entities: &[Entity],
        transforms: &[ComponentPtr<Transform>],
    ) {
        for level in &mut self.levels {
            level.clear();
        }
        self.parents.clear();

        let mut truncated = 0;
        for (&entity, ptr) in entities.iter().zip(transforms) {
            // SAFETY: read-only walk, no writer runs concurrently
            let transform = unsafe { ptr.as_ref() };
            let parent = transform
                .parent
                .filter(|parent| parent.entity() != entity)
                .and_then(|parent| parent.get(world));

            let mut depth = 0;
            let mut cursor = parent;
            while let Some(ancestor) = cursor {
                depth += 1;
                if depth > MAX_DEPTH {
                    break;
                }
                // SAFETY: as above
                cursor = unsafe { ancestor.as_ref() }.parent.and_then(|p| p.get(world));
            }

            let (depth, parent) = if depth > MAX_DEPTH {
                truncated += 1;
                (0, None)
            } else {
                (depth, parent)
            };

            if self.levels.len() <= depth {
                self.levels.resize_with(depth + 1, Vec::new);
            }
            self.levels[depth].push(self.parents.len());
            self.parents.push(parent);
        }

        if truncated > 0 {
            warn!(
                truncated,
                max_depth = MAX_DEPTH,
                "transform chains too deep or cyclic; treating as roots"
            );
        }
    }
}

impl System for TransformSystem {
    type Components = (Transform,);

    fn dependencies(&self, dependencies: &mut Dependencies) {
        dependencies.after::<MotionSystem>().before::<BoundsSystem>();
    }

    fn tick(
        &mut self,
        world: &World,
        _: &FrameTime,
        entities: &[Entity],
        (transforms,): Slices<'_, Self>,
    ) {
        let transforms: &[ComponentPtr<Transform>] = transforms;
        self.apply_messages(world);
        self.build_levels(world, entities, transforms);

        let tasks = world.task_manager();
        let recomputed = AtomicUsize::new(0);
        let parents = &self.parents;

        for level in self.levels.iter().filter(|level| !level.is_empty()) {
            tasks.parallel_for(level.len(), PROPAGATE_GRANULARITY, "transform propagate", |k| {
                let index = level[k];
                // SAFETY: each index is visited once per level, and parents sit
                // on an earlier, finished level.
                let transform = unsafe { transforms[index].as_mut() };
                let parent = parents[index].map(|ptr| unsafe { ptr.as_ref() });

                if transform.dirty || parent.is_some_and(|parent| parent.dirty) {
                    transform.world = parent
                        .map_or(transform.local, |parent| parent.world.then(transform.local));
                    transform.dirty = true;
                    recomputed.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        tasks.parallel_for(transforms.len(), PROPAGATE_GRANULARITY, "transform clean", |index| {
            // SAFETY: each index is visited once
            unsafe { transforms[index].as_mut() }.dirty = false;
        });

        self.stats = TransformStats {
            transforms: transforms.len(),
            roots: self.levels.first().map_or(0, Vec::len),
            max_depth: self.levels.iter().rposition(|level| !level.is_empty()).unwrap_or(0),
            recomputed: recomputed.into_inner(),
            dropped_messages: self.stats.dropped_messages,
        };
        trace!(stats = ?self.stats, "propagated transforms");
    }
}

// ============================================================================
// Bounds
// ============================================================================

/// Axis-aligned box around every world translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub count: usize,
}

impl Default for SceneBounds {
    fn default() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
            count: 0,
        }
    }
}

impl SceneBounds {
    pub fn include(&mut self, point: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
        self.count += 1;
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Reads world poses once the hierarchy is up to date.
#[derive(Debug, Default)]
pub struct BoundsSystem {
    bounds: SceneBounds,
}

impl BoundsSystem {
    #[must_use]
    pub const fn bounds(&self) -> SceneBounds {
        self.bounds
    }
}

impl System for BoundsSystem {
    type Components = (Transform,);

    fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], (transforms,): Slices<'_, Self>) {
        let mut bounds = SceneBounds::default();
        for ptr in transforms {
            // SAFETY: runs after TransformSystem, read-only
            bounds.include(unsafe { ptr.as_ref() }.world.translation);
        }
        self.bounds = bounds;
    }
}
