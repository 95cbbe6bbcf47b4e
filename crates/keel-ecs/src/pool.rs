//! Block-allocated component pools.
//!
//! A pool stores one component type in fixed-size blocks. Blocks are never
//! moved or freed while the pool lives, so a slot's address is stable from
//! allocation until the slot is freed. Indices are offset by a per-pool base,
//! which makes them unique across pools of one world.

use std::{any::Any, fmt, mem::MaybeUninit, ptr::NonNull};

use tracing::debug;

use crate::component::{Component, ComponentPtr, ComponentTypeId, component_type_id};

/// Slots per block unless configured otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Distance between the base indices of consecutive pools.
pub const POOL_INDEX_STRIDE: u64 = 1_000_000;

#[cfg(debug_assertions)]
const POISON_UNINIT: u8 = 0xFE;
#[cfg(debug_assertions)]
const POISON_FREED: u8 = 0xAB;

/// One fixed-size run of slots.
struct Block<T> {
    slots: NonNull<MaybeUninit<T>>,
    len: usize,
    occupied: Box<[bool]>,
    /// Free slots, lowest on top so allocation walks upwards.
    free: Vec<u32>,
}

impl<T> Block<T> {
    fn new(len: usize) -> Self {
        let slots: Box<[MaybeUninit<T>]> = Box::new_uninit_slice(len);
        Self {
            slots: NonNull::from(Box::leak(slots)).cast(),
            len,
            occupied: vec![false; len].into_boxed_slice(),
            free: (0..len as u32).rev().collect(),
        }
    }

    fn slot_ptr(&self, slot: usize) -> NonNull<T> {
        debug_assert!(slot < self.len);
        // SAFETY: slot is within the allocation
        unsafe { self.slots.add(slot).cast() }
    }
}

impl<T> Drop for Block<T> {
    fn drop(&mut self) {
        // SAFETY: `slots` came from Box::leak of a boxed slice of `len` elements.
        // Dropping MaybeUninit runs no destructors; the pool drops live slots first.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.slots.as_ptr(),
                self.len,
            )));
        }
    }
}

/// Storage for every instance of component type `T` in one world.
pub struct ComponentPool<T: Component> {
    base_index: u64,
    block_size: usize,
    blocks: Vec<Block<T>>,
    live: usize,
}

// SAFETY: the pool owns its blocks. Slots are written through `&mut self`, or
// through ComponentPtr under the caller's own synchronization.
unsafe impl<T: Component> Send for ComponentPool<T> {}
unsafe impl<T: Component> Sync for ComponentPool<T> {}

impl<T: Component> ComponentPool<T> {
    #[must_use]
    pub fn new(base_index: u64, block_size: usize) -> Self {
        Self {
            base_index,
            block_size: block_size.clamp(1, u32::MAX as usize),
            blocks: Vec::new(),
            live: 0,
        }
    }

    #[must_use]
    pub const fn base_index(&self) -> u64 {
        self.base_index
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of live slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.blocks.len() * self.block_size
    }

    fn locate(&self, index: u64) -> Option<(usize, usize)> {
        let relative = index.checked_sub(self.base_index)?;
        let block = (relative / self.block_size as u64) as usize;
        let slot = (relative % self.block_size as u64) as usize;
        (block < self.blocks.len()).then_some((block, slot))
    }

    /// Allocate a slot holding `T::default()`.
    pub fn allocate_index(&mut self) -> u64 {
        self.allocate_with(T::default()).0
    }

    /// Allocate a slot holding `value`.
    pub fn allocate_with(&mut self, value: T) -> (u64, ComponentPtr<T>) {
        let block_index = match self.blocks.iter().position(|block| !block.free.is_empty()) {
            Some(block_index) => block_index,
            None => {
                self.blocks.push(Block::new(self.block_size));
                self.blocks.len() - 1
            }
        };

        let block = &mut self.blocks[block_index];
        let Some(slot) = block.free.pop() else {
            unreachable!("block with free slots has an empty free list");
        };
        let slot = slot as usize;
        let ptr = block.slot_ptr(slot);

        // SAFETY: the slot is free, so nothing else refers to it
        unsafe {
            #[cfg(debug_assertions)]
            ptr.cast::<u8>().write_bytes(POISON_UNINIT, size_of::<T>());
            ptr.write(value);
        }
        block.occupied[slot] = true;
        self.live += 1;

        let index = self.base_index + (block_index * self.block_size + slot) as u64;
        (index, ComponentPtr::new(ptr))
    }

    /// Drop the component at `index` and return its slot to the free list.
    ///
    /// Returns false, changing nothing, if `index` is not live.
    pub fn free_index(&mut self, index: u64) -> bool {
        let Some((block_index, slot)) = self.locate(index) else {
            return false;
        };
        let block = &mut self.blocks[block_index];
        if !block.occupied[slot] {
            return false;
        }

        let ptr = block.slot_ptr(slot);
        // SAFETY: the slot is occupied, and the caller no longer refers to it
        unsafe {
            ptr.drop_in_place();
            #[cfg(debug_assertions)]
            ptr.cast::<u8>().write_bytes(POISON_FREED, size_of::<T>());
        }
        block.occupied[slot] = false;
        block.free.push(slot as u32);
        self.live -= 1;
        true
    }

    #[must_use]
    pub fn contains(&self, index: u64) -> bool {
        self.locate(index)
            .is_some_and(|(block, slot)| self.blocks[block].occupied[slot])
    }

    /// Pointer to the live component at `index`.
    #[must_use]
    pub fn index_ptr(&self, index: u64) -> Option<ComponentPtr<T>> {
        let (block, slot) = self.locate(index)?;
        let block = &self.blocks[block];
        block.occupied[slot].then(|| ComponentPtr::new(block.slot_ptr(slot)))
    }

    #[must_use]
    pub fn get(&self, index: u64) -> Option<&T> {
        // SAFETY: the slot is live; writers through ComponentPtr are excluded by
        // the caller's scheduling, as with any shared read
        self.index_ptr(index).map(|ptr| unsafe { ptr.as_ref() })
    }

    pub fn get_mut(&mut self, index: u64) -> Option<&mut T> {
        // SAFETY: the slot is live and `&mut self` is exclusive
        self.index_ptr(index).map(|ptr| unsafe { ptr.as_mut() })
    }

    /// Iterate live components with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .flat_map(move |(block_index, block)| {
                (0..block.len).filter(|&slot| block.occupied[slot]).map(move |slot| {
                    let index = self.base_index + (block_index * self.block_size + slot) as u64;
                    // SAFETY: slot is occupied
                    (index, unsafe { block.slot_ptr(slot).as_ref() })
                })
            })
    }
}

impl<T: Component> Drop for ComponentPool<T> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }
        for block in &self.blocks {
            for slot in 0..block.len {
                if block.occupied[slot] {
                    // SAFETY: slot is occupied and the pool is going away
                    unsafe { block.slot_ptr(slot).drop_in_place() };
                }
            }
        }
    }
}

impl<T: Component> fmt::Debug for ComponentPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentPool")
            .field("component", &std::any::type_name::<T>())
            .field("base_index", &self.base_index)
            .field("live", &self.live)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

// ============================================================================
// Type-erased pools
// ============================================================================

/// The operations a world needs on a pool without knowing its type.
pub(crate) trait ErasedPool: Send + Sync {
    fn component_type(&self) -> ComponentTypeId;
    fn free_index(&mut self, index: u64) -> bool;
    fn index_ptr(&self, index: u64) -> Option<NonNull<u8>>;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedPool for ComponentPool<T> {
    fn component_type(&self) -> ComponentTypeId {
        component_type_id::<T>()
    }

    fn free_index(&mut self, index: u64) -> bool {
        ComponentPool::free_index(self, index)
    }

    fn index_ptr(&self, index: u64) -> Option<NonNull<u8>> {
        ComponentPool::index_ptr(self, index).and_then(|ptr| NonNull::new(ptr.as_ptr().cast()))
    }

    fn len(&self) -> usize {
        self.live
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Every pool of a world, indexed by component type id.
pub(crate) struct PoolTable {
    pools: Vec<Option<Box<dyn ErasedPool>>>,
    created: u64,
    block_size: usize,
}

impl PoolTable {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            pools: Vec::new(),
            created: 0,
            block_size,
        }
    }

    pub(crate) fn erased(&self, component: ComponentTypeId) -> Option<&dyn ErasedPool> {
        self.pools.get(component.index())?.as_deref()
    }

    pub(crate) fn pool<T: Component>(&self) -> Option<&ComponentPool<T>> {
        self.erased(component_type_id::<T>())?
            .as_any()
            .downcast_ref()
    }

    pub(crate) fn pool_mut<T: Component>(&mut self) -> Option<&mut ComponentPool<T>> {
        self.pools
            .get_mut(component_type_id::<T>().index())?
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut()
    }

    /// The pool for `T`, created on first use.
    ///
    /// # Panics
    ///
    /// Panics if the slot for `T`'s id holds a pool of another type, which
    /// would mean the component registry handed out one id twice.
    pub(crate) fn pool_or_create<T: Component>(&mut self) -> &mut ComponentPool<T> {
        let component = component_type_id::<T>();
        let index = component.index();
        if index >= self.pools.len() {
            self.pools.resize_with(index + 1, || None);
        }

        let slot = &mut self.pools[index];
        if slot.is_none() {
            self.created += 1;
            let base_index = self.created * POOL_INDEX_STRIDE;
            debug!(component = %component, base_index, "created component pool");
            *slot = Some(Box::new(ComponentPool::<T>::new(base_index, self.block_size)));
        }

        slot.as_deref_mut()
            .and_then(|pool| pool.as_any_mut().downcast_mut())
            .expect("component pool registered under another type")
    }

    pub(crate) fn free(&mut self, component: ComponentTypeId, index: u64) -> bool {
        self.pools
            .get_mut(component.index())
            .and_then(Option::as_deref_mut)
            .is_some_and(|pool| pool.free_index(index))
    }

    pub(crate) fn component_ptr(
        &self,
        component: ComponentTypeId,
        index: u64,
    ) -> Option<NonNull<u8>> {
        self.erased(component)?.index_ptr(index)
    }

    pub(crate) fn live_components(&self) -> usize {
        self.pools.iter().flatten().map(|pool| pool.len()).sum()
    }
}

impl fmt::Debug for PoolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolTable")
            .field("pools", &self.created)
            .field("live", &self.live_components())
            .finish()
    }
}
