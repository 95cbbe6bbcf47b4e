//! Systems: per-tick logic over one aspect's packed arrays.

use std::{
    any::{Any, TypeId},
    fmt,
    hash::{Hash, Hasher},
};

use parking_lot::Mutex;
use smallvec::{SmallVec, smallvec};
use tracing::debug_span;

use crate::{
    aspect::{AspectCollection, AspectId},
    component::{Component, ComponentPtr, ComponentTypeId, component_type_id},
    entity::Entity,
    frame::FrameTime,
    world::World,
};

/// A tuple of component types forming a system's aspect.
///
/// Implemented for `()` and tuples of up to eight components. `Slices` is the
/// matching tuple of packed pointer slices.
pub trait ComponentSet: 'static {
    type Slices<'a>;

    fn component_types() -> SmallVec<[ComponentTypeId; 8]>;

    fn slices(collection: &AspectCollection) -> Self::Slices<'_>;
}

impl ComponentSet for () {
    type Slices<'a> = ();

    fn component_types() -> SmallVec<[ComponentTypeId; 8]> {
        SmallVec::new()
    }

    fn slices(_collection: &AspectCollection) -> Self::Slices<'_> {}
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            type Slices<'a> = ($(&'a [ComponentPtr<$name>],)+);

            fn component_types() -> SmallVec<[ComponentTypeId; 8]> {
                smallvec![$(component_type_id::<$name>()),+]
            }

            fn slices(collection: &AspectCollection) -> Self::Slices<'_> {
                ($(collection.entity_components::<$name>(),)+)
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);

/// Identity of a system type.
#[derive(Clone, Copy)]
pub struct SystemKey {
    type_id: TypeId,
    name: &'static str,
}

impl SystemKey {
    #[must_use]
    pub fn of<S: System>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        }
    }

    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for SystemKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for SystemKey {}

impl Hash for SystemKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for SystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemKey({})", self.name)
    }
}

/// Ordering constraints a system declares against other system types.
#[derive(Debug, Default, Clone)]
pub struct Dependencies {
    predecessors: SmallVec<[SystemKey; 4]>,
    successors: SmallVec<[SystemKey; 4]>,
}

impl Dependencies {
    /// Run after every tick of `S` has completed.
    pub fn after<S: System>(&mut self) -> &mut Self {
        self.predecessors.push(SystemKey::of::<S>());
        self
    }

    /// Complete before `S` starts.
    pub fn before<S: System>(&mut self) -> &mut Self {
        self.successors.push(SystemKey::of::<S>());
        self
    }

    #[must_use]
    pub fn predecessors(&self) -> &[SystemKey] {
        &self.predecessors
    }

    #[must_use]
    pub fn successors(&self) -> &[SystemKey] {
        &self.successors
    }
}

/// Per-tick logic over the entities matching `Components`.
///
/// The world runs every registered system once per [`World::tick`], each as
/// its own task. Systems without a declared ordering may run concurrently, so
/// a system should only write the components of its own aspect and request
/// anything else through messages.
///
/// ```ignore
/// struct Gravity;
///
/// impl System for Gravity {
///     type Components = (Velocity,);
///
///     fn tick(
///         &mut self,
///         _: &World,
///         time: &FrameTime,
///         _: &[Entity],
///         (velocities,): (&[ComponentPtr<Velocity>],),
///     ) {
///         for velocity in velocities {
///             unsafe { velocity.as_mut() }.y -= 9.81 * time.delta_seconds;
///         }
///     }
/// }
/// ```
pub trait System: Send + 'static {
    type Components: ComponentSet;

    /// Declare predecessor and successor systems. Called once on registration.
    fn dependencies(&self, dependencies: &mut Dependencies) {
        let _ = dependencies;
    }

    /// `entities` and every slice of `components` are index-aligned.
    fn tick(
        &mut self,
        world: &World,
        frame_time: &FrameTime,
        entities: &[Entity],
        components: <Self::Components as ComponentSet>::Slices<'_>,
    );
}

pub(crate) trait ErasedSystem: Send {
    fn run(&mut self, world: &World, frame_time: &FrameTime, aspect: AspectId);
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<S: System> ErasedSystem for S {
    fn run(&mut self, world: &World, frame_time: &FrameTime, aspect: AspectId) {
        world.with_aspect_collection(aspect, |collection| {
            self.tick(
                world,
                frame_time,
                collection.entities(),
                S::Components::slices(collection),
            );
        });
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A registered system.
pub(crate) struct SystemEntry {
    key: SystemKey,
    aspect: AspectId,
    dependencies: Dependencies,
    system: Mutex<Box<dyn ErasedSystem>>,
}

impl SystemEntry {
    pub(crate) fn new<S: System>(system: S, aspect: AspectId) -> Self {
        let mut dependencies = Dependencies::default();
        system.dependencies(&mut dependencies);
        Self {
            key: SystemKey::of::<S>(),
            aspect,
            dependencies,
            system: Mutex::new(Box::new(system)),
        }
    }

    pub(crate) const fn key(&self) -> &SystemKey {
        &self.key
    }

    pub(crate) const fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub(crate) fn run(&self, world: &World, frame_time: &FrameTime) {
        let _span = debug_span!("system", system = self.key.name).entered();
        self.system.lock().run(world, frame_time, self.aspect);
    }

    pub(crate) fn get_mut<S: System>(&mut self) -> Option<&mut S> {
        self.system.get_mut().as_any_mut().downcast_mut()
    }

    pub(crate) fn into_system<S: System>(self) -> Option<S> {
        self.system
            .into_inner()
            .into_any()
            .downcast()
            .ok()
            .map(|system| *system)
    }
}

impl fmt::Debug for SystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemEntry")
            .field("key", &self.key)
            .field("aspect", &self.aspect)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Slices<'a, S> = <<S as System>::Components as ComponentSet>::Slices<'a>;

    #[derive(Default)]
    struct Position;

    #[derive(Default)]
    struct Velocity;

    struct Integrate;

    impl System for Integrate {
        type Components = (Position, Velocity);

        fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], _: Slices<'_, Self>) {}
    }

    struct Render;

    impl System for Render {
        type Components = (Position,);

        fn dependencies(&self, dependencies: &mut Dependencies) {
            dependencies.after::<Integrate>();
        }

        fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], _: Slices<'_, Self>) {}
    }

    #[test]
    fn test_component_set_types() {
        assert!(<() as ComponentSet>::component_types().is_empty());
        assert_eq!(
            <(Position, Velocity) as ComponentSet>::component_types().as_slice(),
            &[component_type_id::<Position>(), component_type_id::<Velocity>()]
        );
    }

    #[test]
    fn test_dependencies_are_recorded() {
        let entry = SystemEntry::new(Render, AspectId::from_raw(0));
        assert_eq!(entry.dependencies().predecessors(), &[SystemKey::of::<Integrate>()]);
        assert!(entry.dependencies().successors().is_empty());
        assert!(entry.key().name().ends_with("Render"));
    }

    #[test]
    fn test_entry_downcasts_to_its_type() {
        let mut entry = SystemEntry::new(Integrate, AspectId::from_raw(1));
        assert!(entry.get_mut::<Integrate>().is_some());
        assert!(entry.get_mut::<Render>().is_none());
        assert!(entry.into_system::<Integrate>().is_some());
    }
}
