//! Initial transform hierarchy.

use keel_ecs::{ComponentRef, EcsResult, Entity, World};
use tracing::debug;

use crate::{
    components::{Pose, SetTransformParentMessage, Transform, Velocity},
    systems::EXTENT,
};

/// Entities per group: one moving root followed by a chain of children.
const GROUP_SIZE: usize = 8;

#[derive(Debug, Default)]
pub struct Scene {
    pub roots: Vec<Entity>,
    pub children: Vec<Entity>,
}

/// Spawn `count` transforms in groups of a moving root and a chain of
/// children. Parents are attached through messages, so the hierarchy exists
/// from the first tick on.
pub fn spawn(world: &World, count: usize) -> EcsResult<Scene> {
    let mut scene = Scene::default();
    let mut previous = Entity::NONE;

    for i in 0..count {
        let entity = world.create_entity();
        let phase = i as f32 * 0.618_034;

        if i % GROUP_SIZE == 0 {
            let start = [
                (phase * 7.0).sin() * EXTENT * 0.5,
                (phase * 3.0).cos() * EXTENT * 0.5,
                0.0,
            ];
            world.add_component_with(entity, Transform::new(Pose::at(start)))?;
            world.add_component_with(
                entity,
                Velocity {
                    linear: [phase.cos() * 10.0, phase.sin() * 10.0, 0.0],
                },
            )?;
            scene.roots.push(entity);
        } else {
            let local = Pose {
                translation: [1.0, 0.0, 0.5],
                scale: 0.9,
            };
            world.add_component_with(entity, Transform::new(local))?;
            world.queue_message(SetTransformParentMessage {
                target: ComponentRef::new(entity),
                parent: Some(ComponentRef::new(previous)),
            });
            scene.children.push(entity);
        }
        previous = entity;
    }

    debug!(
        roots = scene.roots.len(),
        children = scene.children.len(),
        "spawned scene"
    );
    Ok(scene)
}
