//! Component type registration and component handles.
//!
//! Every component type is assigned a small integer [`ComponentTypeId`] the
//! first time it is used. Ids are process-wide, so aspects and systems can be
//! declared before any world exists, and they index component pools directly.

use std::{
    any::TypeId,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    ptr::NonNull,
    sync::LazyLock,
};

use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::{entity::Entity, world::World};

/// Marker trait for types that can be stored as components.
///
/// Pools default-construct a slot on allocation, so components must be
/// `Default`.
pub trait Component: Default + Send + Sync + 'static {}

impl<T: Default + Send + Sync + 'static> Component for T {}

/// Registered identifier of a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(u32);

impl ComponentTypeId {
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The registered type name, or `"<unregistered>"`.
    #[must_use]
    pub fn name(self) -> &'static str {
        REGISTRY
            .read()
            .get_info(self)
            .map_or("<unregistered>", ComponentInfo::name)
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime information about a component type.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    id: ComponentTypeId,
    name: &'static str,
    size: usize,
    align: usize,
    type_id: TypeId,
}

impl ComponentInfo {
    fn of<T: Component>(id: ComponentTypeId) -> Self {
        Self {
            id,
            name: std::any::type_name::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ComponentTypeId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct ComponentRegistry {
    type_to_id: HashMap<TypeId, ComponentTypeId, FxBuildHasher>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    fn register<T: Component>(&mut self) -> ComponentTypeId {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.type_to_id.get(&type_id) {
            return id;
        }

        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo::of::<T>(id));
        self.type_to_id.insert(type_id, id);
        tracing::trace!(
            component = std::any::type_name::<T>(),
            id = id.0,
            "registered component type"
        );
        id
    }

    fn get_id(&self, type_id: TypeId) -> Option<ComponentTypeId> {
        self.type_to_id.get(&type_id).copied()
    }

    fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }
}

static REGISTRY: LazyLock<RwLock<ComponentRegistry>> =
    LazyLock::new(|| RwLock::new(ComponentRegistry::default()));

/// The id of component type `T`, registering it on first use.
pub fn component_type_id<T: Component>() -> ComponentTypeId {
    if let Some(id) = REGISTRY.read().get_id(TypeId::of::<T>()) {
        return id;
    }
    REGISTRY.write().register::<T>()
}

/// Information about a registered component type.
#[must_use]
pub fn component_info(id: ComponentTypeId) -> Option<ComponentInfo> {
    REGISTRY.read().get_info(id).copied()
}

/// Number of component types registered in this process.
#[must_use]
pub fn registered_component_count() -> usize {
    REGISTRY.read().infos.len()
}

// ============================================================================
// Component Map
// ============================================================================

/// The components attached to one entity: component type to pool index.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ComponentMap {
    /// Sorted by component type.
    entries: SmallVec<[(ComponentTypeId, u64); 8]>,
}

impl ComponentMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn search(&self, component: ComponentTypeId) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&component, |&(ty, _)| ty)
    }

    /// Pool index of `component`, if attached.
    #[must_use]
    pub fn get(&self, component: ComponentTypeId) -> Option<u64> {
        self.search(component).ok().map(|i| self.entries[i].1)
    }

    #[must_use]
    pub fn contains(&self, component: ComponentTypeId) -> bool {
        self.search(component).is_ok()
    }

    /// Attach `component` at `index`, returning the previous index if any.
    pub fn insert(&mut self, component: ComponentTypeId, index: u64) -> Option<u64> {
        match self.search(component) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].1, index)),
            Err(i) => {
                self.entries.insert(i, (component, index));
                None
            }
        }
    }

    pub fn remove(&mut self, component: ComponentTypeId) -> Option<u64> {
        self.search(component)
            .ok()
            .map(|i| self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentTypeId, u64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn types(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.entries.iter().map(|&(ty, _)| ty)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ComponentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(ty, index)| (ty, index)))
            .finish()
    }
}

// ============================================================================
// Component Pointers
// ============================================================================

/// A stable pointer to a component slot.
///
/// Handed out by pools and aspect collections. The pointee stays valid until
/// its component is removed, which never happens mid-tick. Dereferencing is
/// `unsafe`: the caller must make sure no other thread writes the same
/// component concurrently, normally by only writing components of its own
/// aspect and ordering systems with dependencies.
#[repr(transparent)]
pub struct ComponentPtr<T>(NonNull<T>);

// SAFETY: a ComponentPtr is a shared handle to a T living in a pool; sending
// or sharing it only allows access that T: Send + Sync already permits.
unsafe impl<T: Send + Sync> Send for ComponentPtr<T> {}
unsafe impl<T: Send + Sync> Sync for ComponentPtr<T> {}

impl<T> ComponentPtr<T> {
    pub(crate) const fn new(ptr: NonNull<T>) -> Self {
        Self(ptr)
    }

    #[must_use]
    pub const fn as_ptr(self) -> *mut T {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// The component must still be attached, and no thread may write it for
    /// the lifetime `'a`.
    #[must_use]
    pub unsafe fn as_ref<'a>(self) -> &'a T {
        // SAFETY: guaranteed by the caller
        unsafe { self.0.as_ref() }
    }

    /// # Safety
    ///
    /// The component must still be attached, and no other reference to it may
    /// exist for the lifetime `'a`.
    #[must_use]
    pub unsafe fn as_mut<'a>(mut self) -> &'a mut T {
        // SAFETY: guaranteed by the caller
        unsafe { self.0.as_mut() }
    }
}

impl<T> Clone for ComponentPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ComponentPtr<T> {}

impl<T> PartialEq for ComponentPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for ComponentPtr<T> {}

impl<T> fmt::Debug for ComponentPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentPtr({:p})", self.0)
    }
}

/// A handle to "the `T` component of an entity", resolved through the
/// world on every access.
///
/// Survives the entity's destruction: resolution then yields `None`.
pub struct ComponentRef<T> {
    entity: Entity,
    marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentRef<T> {
    #[must_use]
    pub const fn new(entity: Entity) -> Self {
        Self {
            entity,
            marker: PhantomData,
        }
    }

    /// A handle that never resolves.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(Entity::NONE)
    }

    #[must_use]
    pub const fn entity(&self) -> Entity {
        self.entity
    }

    #[must_use]
    pub fn get(&self, world: &World) -> Option<ComponentPtr<T>> {
        if self.entity.is_none() {
            return None;
        }
        world.get_component::<T>(self.entity)
    }

    #[must_use]
    pub fn is_valid(&self, world: &World) -> bool {
        self.get(world).is_some()
    }
}

impl<T: Component> Default for ComponentRef<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> Clone for ComponentRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ComponentRef<T> {}

impl<T> PartialEq for ComponentRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl<T> Eq for ComponentRef<T> {}

impl<T> Hash for ComponentRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
    }
}

impl<T> fmt::Debug for ComponentRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ComponentRef<{}>({:?})",
            std::any::type_name::<T>(),
            self.entity
        )
    }
}
