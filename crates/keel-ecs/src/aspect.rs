//! Aspects and aspect collections.
//!
//! An [`Aspect`] is a set of required component types. An
//! [`AspectCollection`] is the live set of entities matching one aspect,
//! kept as packed parallel arrays: `entities()[i]` owns
//! `entity_components::<T>()[i]` for every type `T` of the aspect.

use std::{fmt, ptr::NonNull};

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::{
    component::{Component, ComponentMap, ComponentPtr, ComponentTypeId, component_type_id},
    entity::Entity,
    pool::PoolTable,
    system::ComponentSet,
};

/// A normalized set of required component types.
///
/// Types are kept sorted and deduplicated, so two aspects built from the same
/// types in any order are equal.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Aspect {
    types: SmallVec<[ComponentTypeId; 8]>,
}

impl Aspect {
    #[must_use]
    pub fn new(types: &[ComponentTypeId]) -> Self {
        let mut types: SmallVec<[ComponentTypeId; 8]> = types.iter().copied().collect();
        types.sort_unstable();
        types.dedup();
        Self { types }
    }

    /// The aspect of a component tuple such as `(Transform, Mesh)`.
    #[must_use]
    pub fn of<S: ComponentSet>() -> Self {
        Self::new(&S::component_types())
    }

    #[must_use]
    pub fn types(&self) -> &[ComponentTypeId] {
        &self.types
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[must_use]
    pub fn contains(&self, component: ComponentTypeId) -> bool {
        self.position(component).is_some()
    }

    fn position(&self, component: ComponentTypeId) -> Option<usize> {
        self.types.binary_search(&component).ok()
    }

    /// Whether an entity with `components` has every required type.
    #[must_use]
    pub fn matches(&self, components: &ComponentMap) -> bool {
        self.types.iter().all(|&ty| components.contains(ty))
    }
}

impl fmt::Debug for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.types.iter().map(|ty| ty.name()))
            .finish()
    }
}

/// Handle to an interned aspect collection of one world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AspectId(u32);

impl AspectId {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for AspectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AspectId({})", self.0)
    }
}

/// The entities currently matching one aspect, with packed component arrays.
pub struct AspectCollection {
    id: AspectId,
    aspect: Aspect,
    entities: Vec<Entity>,
    index_map: HashMap<Entity, usize, FxBuildHasher>,
    /// One array per aspect type, in `aspect.types()` order.
    components: SmallVec<[Vec<NonNull<u8>>; 8]>,
}

// SAFETY: the pointers are handles into pools owned by the same world; the
// collection never dereferences them itself.
unsafe impl Send for AspectCollection {}
unsafe impl Sync for AspectCollection {}

impl AspectCollection {
    pub(crate) fn new(id: AspectId, aspect: Aspect) -> Self {
        let components = aspect.types().iter().map(|_| Vec::new()).collect();
        Self {
            id,
            aspect,
            entities: Vec::new(),
            index_map: HashMap::default(),
            components,
        }
    }

    #[must_use]
    pub const fn id(&self) -> AspectId {
        self.id
    }

    #[must_use]
    pub const fn aspect(&self) -> &Aspect {
        &self.aspect
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entity to its index in [`entities`](Self::entities).
    #[must_use]
    pub const fn entity_index_map(&self) -> &HashMap<Entity, usize, FxBuildHasher> {
        &self.index_map
    }

    #[must_use]
    pub fn index_of(&self, entity: Entity) -> Option<usize> {
        self.index_map.get(&entity).copied()
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.index_map.contains_key(&entity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Packed pointers to each entity's `T`, index-aligned with
    /// [`entities`](Self::entities). Empty if `T` is not part of the aspect.
    #[must_use]
    pub fn entity_components<T: Component>(&self) -> &[ComponentPtr<T>] {
        let Some(position) = self.aspect.position(component_type_id::<T>()) else {
            return &[];
        };
        let raw = &self.components[position];
        // SAFETY: ComponentPtr<T> is a transparent NonNull<T>, which has the
        // layout of NonNull<u8>; every pointer in this array was taken from the
        // pool of T.
        unsafe { std::slice::from_raw_parts(raw.as_ptr().cast::<ComponentPtr<T>>(), raw.len()) }
    }

    /// Packed untyped pointers for `component`.
    #[must_use]
    pub fn raw_components(&self, component: ComponentTypeId) -> &[NonNull<u8>] {
        self.aspect
            .position(component)
            .map_or(&[], |position| self.components[position].as_slice())
    }

    /// Re-evaluate `entity` against the aspect.
    ///
    /// Removes the entity if it no longer matches, appends it if it is new,
    /// and refreshes its pointers in place otherwise. Returns whether the
    /// entity is in the collection afterwards.
    pub(crate) fn try_update(
        &mut self,
        entity: Entity,
        components: &ComponentMap,
        pools: &PoolTable,
    ) -> bool {
        if !self.aspect.matches(components) {
            self.try_remove(entity);
            return false;
        }

        let mut pointers: SmallVec<[NonNull<u8>; 8]> = SmallVec::new();
        for &ty in self.aspect.types() {
            let Some(ptr) = components
                .get(ty)
                .and_then(|index| pools.component_ptr(ty, index))
            else {
                // Attached in the map but not live in its pool.
                self.try_remove(entity);
                return false;
            };
            pointers.push(ptr);
        }

        match self.index_map.get(&entity) {
            Some(&index) => {
                for (array, ptr) in self.components.iter_mut().zip(pointers) {
                    array[index] = ptr;
                }
            }
            None => {
                self.index_map.insert(entity, self.entities.len());
                self.entities.push(entity);
                for (array, ptr) in self.components.iter_mut().zip(pointers) {
                    array.push(ptr);
                }
            }
        }
        true
    }

    /// Swap-remove `entity` from every array. Returns false if absent.
    pub(crate) fn try_remove(&mut self, entity: Entity) -> bool {
        let Some(index) = self.index_map.remove(&entity) else {
            return false;
        };

        self.entities.swap_remove(index);
        for array in &mut self.components {
            array.swap_remove(index);
        }
        if let Some(&moved) = self.entities.get(index) {
            self.index_map.insert(moved, index);
        }
        true
    }
}

impl fmt::Debug for AspectCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectCollection")
            .field("id", &self.id)
            .field("aspect", &self.aspect)
            .field("entities", &self.entities.len())
            .finish()
    }
}
