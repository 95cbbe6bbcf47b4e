//! Demo components and messages.

use keel_ecs::ComponentRef;

/// Translation plus uniform scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub translation: [f32; 3],
    pub scale: f32,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        translation: [0.0; 3],
        scale: 1.0,
    };

    #[must_use]
    pub const fn at(translation: [f32; 3]) -> Self {
        Self {
            translation,
            scale: 1.0,
        }
    }

    /// `child` expressed in this pose's parent space.
    #[must_use]
    pub fn then(self, child: Self) -> Self {
        let [x, y, z] = child.translation;
        let [px, py, pz] = self.translation;
        Self {
            translation: [
                px + self.scale * x,
                py + self.scale * y,
                pz + self.scale * z,
            ],
            scale: self.scale * child.scale,
        }
    }

    #[must_use]
    pub fn translated(self, offset: [f32; 3]) -> Self {
        let [x, y, z] = self.translation;
        Self {
            translation: [x + offset[0], y + offset[1], z + offset[2]],
            scale: self.scale,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Local and world pose, with an optional parent transform.
///
/// Owned by [`TransformSystem`](crate::systems::TransformSystem); other
/// systems change it through [`SetTransformMessage`] and
/// [`SetTransformParentMessage`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Transform {
    pub local: Pose,
    pub world: Pose,
    pub parent: Option<ComponentRef<Transform>>,
    /// World pose needs recomputing.
    pub dirty: bool,
}

impl Transform {
    #[must_use]
    pub fn new(local: Pose) -> Self {
        Self {
            local,
            world: local,
            parent: None,
            dirty: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Velocity {
    pub linear: [f32; 3],
}

/// Replace a transform's local pose.
#[derive(Debug, Clone, Copy)]
pub struct SetTransformMessage {
    pub target: ComponentRef<Transform>,
    pub local: Pose,
}

/// Attach a transform to a parent, or detach it with `None`.
#[derive(Debug, Clone, Copy)]
pub struct SetTransformParentMessage {
    pub target: ComponentRef<Transform>,
    pub parent: Option<ComponentRef<Transform>>,
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_composition() {
        let parent = Pose {
            translation: [1.0, 0.0, 0.0],
            scale: 2.0,
        };
        let child = Pose::at([0.0, 1.0, 0.0]);
        let world = parent.then(child);

        assert_eq!(world.translation, [1.0, 2.0, 0.0]);
        assert!((world.scale - 2.0).abs() < f32::EPSILON);
        assert_eq!(Pose::IDENTITY.then(child), child);
    }
}
