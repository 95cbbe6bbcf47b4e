//! The world: entities, component pools, aspect collections, messages and the
//! per-frame system graph.
//!
//! # Tick
//!
//! [`World::tick`] runs, in order:
//!
//! 1. Component removals and entity destructions requested during the
//!    previous tick (removals first).
//! 2. Flush of staged structural notifications.
//! 3. One task per system plus a join task, wired by declared dependencies,
//!    dispatched and awaited with work assist.
//! 4. Aspect registration of entities created or extended during the tick.
//!
//! Structural calls made while systems run only record intent, so component
//! pointers handed out during a tick stay valid until the next tick starts.
//!
//! # Locking
//!
//! Entity table, pool table and aspect table each have their own lock, always
//! taken in that order and never held while system code runs. Message queues,
//! staged notifications and the command buffer are leaf locks.

use std::{
    any::TypeId,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use hashbrown::HashMap;
use keel_task::{TaskId, TaskManager, TaskQueueFlags, Timeout};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::{debug, error, trace, trace_span, warn};

use crate::{
    aspect::{Aspect, AspectCollection, AspectId},
    command::CommandBuffer,
    component::{Component, ComponentMap, ComponentPtr, ComponentTypeId, component_type_id},
    entity::{Entity, EntityAllocator},
    error::{EcsError, EcsResult},
    frame::FrameTime,
    message::{Message, MessageQueues, StagedNotifications},
    pool::{ComponentPool, DEFAULT_BLOCK_SIZE, PoolTable},
    system::{ComponentSet, System, SystemEntry, SystemKey},
};

/// World construction options.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Panic after logging a programmer error instead of only returning it.
    pub strict_errors: bool,
    /// Slots per component pool block.
    pub pool_block_size: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            strict_errors: cfg!(debug_assertions),
            pool_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl WorldConfig {
    #[must_use]
    pub const fn strict_errors(mut self, strict: bool) -> Self {
        self.strict_errors = strict;
        self
    }

    #[must_use]
    pub const fn pool_block_size(mut self, block_size: usize) -> Self {
        self.pool_block_size = block_size;
        self
    }
}

#[derive(Default)]
struct EntityTable {
    allocator: EntityAllocator,
    states: HashMap<Entity, ComponentMap, FxBuildHasher>,
}

#[derive(Default)]
struct AspectTable {
    collections: Vec<Arc<RwLock<AspectCollection>>>,
    lookup: HashMap<Aspect, AspectId, FxBuildHasher>,
}

/// Clears the tick flag even if a system panics.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Entities, their components, and the systems that run over them.
pub struct World {
    config: WorldConfig,
    tasks: Arc<TaskManager>,

    entities: RwLock<EntityTable>,
    pools: RwLock<PoolTable>,
    aspects: RwLock<AspectTable>,

    messages: Mutex<MessageQueues>,
    staged: Mutex<StagedNotifications>,
    commands: Mutex<CommandBuffer>,

    systems: Vec<SystemEntry>,
    system_lookup: HashMap<TypeId, usize, FxBuildHasher>,
    /// Resolved `(predecessor, successor)` system indices; rebuilt when the
    /// system set changes.
    graph: Option<Vec<(usize, usize)>>,

    tick_active: AtomicBool,
    ticks: u64,
}

impl World {
    #[must_use]
    pub fn new(tasks: Arc<TaskManager>) -> Self {
        Self::with_config(tasks, WorldConfig::default())
    }

    #[must_use]
    pub fn with_config(tasks: Arc<TaskManager>, config: WorldConfig) -> Self {
        let block_size = config.pool_block_size;
        Self {
            config,
            tasks,
            entities: RwLock::new(EntityTable::default()),
            pools: RwLock::new(PoolTable::new(block_size)),
            aspects: RwLock::new(AspectTable::default()),
            messages: Mutex::new(MessageQueues::default()),
            staged: Mutex::new(StagedNotifications::default()),
            commands: Mutex::new(CommandBuffer::default()),
            systems: Vec::new(),
            system_lookup: HashMap::default(),
            graph: None,
            tick_active: AtomicBool::new(false),
            ticks: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[must_use]
    pub const fn task_manager(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    /// Whether systems are currently running.
    #[must_use]
    pub fn is_tick_active(&self) -> bool {
        self.tick_active.load(Ordering::Acquire)
    }

    /// Number of completed ticks.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Log a programmer error, and panic if the world is strict.
    fn report(&self, err: EcsError) -> EcsError {
        error!(error = %err, "world operation failed");
        assert!(!self.config.strict_errors, "{err}");
        err
    }

    // ==================== Entities ====================

    pub fn create_entity(&self) -> Entity {
        let entity = {
            let mut table = self.entities.write();
            let entity = table.allocator.allocate();
            table.states.insert(entity, ComponentMap::new());
            entity
        };
        self.staged.lock().created_entity(entity);

        if self.is_tick_active() {
            self.commands.lock().register(entity);
        } else {
            self.sync_entity(entity);
        }
        trace!(entity = %entity, "created entity");
        entity
    }

    /// Destroy `entity` and every component it owns.
    ///
    /// During a tick the destruction is applied at the start of the next tick;
    /// until then the entity and its components remain readable. Destroying a
    /// missing entity does nothing.
    pub fn destroy_entity(&self, entity: Entity) {
        if self.is_tick_active() {
            self.commands.lock().destroy(entity);
        } else {
            self.apply_destroy(entity);
        }
    }

    fn apply_destroy(&self, entity: Entity) {
        let Some(components) = self.entities.write().states.remove(&entity) else {
            return;
        };

        {
            let aspects = self.aspects.read();
            for collection in &aspects.collections {
                collection.write().try_remove(entity);
            }
        }
        {
            let mut pools = self.pools.write();
            for (component, index) in components.iter() {
                pools.free(component, index);
            }
        }
        {
            let mut staged = self.staged.lock();
            for component in components.types() {
                staged.deleted_component(entity, component);
            }
            staged.deleted_entity(entity);
        }
        self.messages.lock().remove_entity(entity);
        trace!(entity = %entity, components = components.len(), "destroyed entity");
    }

    #[must_use]
    pub fn is_entity_alive(&self, entity: Entity) -> bool {
        self.entities.read().states.contains_key(&entity)
    }

    /// A copy of the entity's component map.
    #[must_use]
    pub fn entity_component_map(&self, entity: Entity) -> Option<ComponentMap> {
        self.entities.read().states.get(&entity).cloned()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.read().states.len()
    }

    // ==================== Components ====================

    /// Attach a default-constructed `T` to `entity`.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] or [`EcsError::DuplicateComponent`].
    ///
    /// # Panics
    ///
    /// On either error when [`WorldConfig::strict_errors`] is set.
    pub fn add_component<T: Component>(&self, entity: Entity) -> EcsResult<ComponentPtr<T>> {
        self.add_component_with(entity, T::default())
    }

    /// Attach `value` to `entity`.
    ///
    /// The component is readable through [`get_component`](Self::get_component)
    /// immediately. During a tick the entity joins matching aspect collections
    /// once the tick's systems have finished.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] or [`EcsError::DuplicateComponent`].
    ///
    /// # Panics
    ///
    /// On either error when [`WorldConfig::strict_errors`] is set.
    pub fn add_component_with<T: Component>(
        &self,
        entity: Entity,
        value: T,
    ) -> EcsResult<ComponentPtr<T>> {
        let component = component_type_id::<T>();
        let ptr = {
            let mut entities = self.entities.write();
            let Some(components) = entities.states.get_mut(&entity) else {
                drop(entities);
                return Err(self.report(EcsError::EntityNotFound(entity)));
            };
            if components.contains(component) {
                drop(entities);
                return Err(self.report(EcsError::DuplicateComponent { entity, component }));
            }

            let (index, ptr) = self.pools.write().pool_or_create::<T>().allocate_with(value);
            components.insert(component, index);
            ptr
        };
        self.staged.lock().created_component(entity, component);

        if self.is_tick_active() {
            self.commands.lock().register(entity);
        } else {
            self.sync_entity(entity);
        }
        trace!(entity = %entity, component = %component, "added component");
        Ok(ptr)
    }

    /// Detach `T` from `entity`. Deferred to the next tick when called during
    /// a tick.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] or [`EcsError::ComponentNotFound`].
    ///
    /// # Panics
    ///
    /// On either error when [`WorldConfig::strict_errors`] is set.
    pub fn remove_component<T: Component>(&self, entity: Entity) -> EcsResult<()> {
        self.remove_component_by_id(entity, component_type_id::<T>())
    }

    /// Detach the component of type `component` from `entity`.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] or [`EcsError::ComponentNotFound`].
    ///
    /// # Panics
    ///
    /// On either error when [`WorldConfig::strict_errors`] is set.
    pub fn remove_component_by_id(
        &self,
        entity: Entity,
        component: ComponentTypeId,
    ) -> EcsResult<()> {
        let attached = self
            .entities
            .read()
            .states
            .get(&entity)
            .map(|components| components.contains(component));
        match attached {
            None => return Err(self.report(EcsError::EntityNotFound(entity))),
            Some(false) => {
                return Err(self.report(EcsError::ComponentNotFound { entity, component }));
            }
            Some(true) => {}
        }

        if self.is_tick_active() {
            self.commands.lock().remove_component(entity, component);
        } else {
            self.apply_remove(entity, component);
        }
        Ok(())
    }

    /// Returns false if the component is no longer attached.
    fn apply_remove(&self, entity: Entity, component: ComponentTypeId) -> bool {
        let index = {
            let mut entities = self.entities.write();
            let Some(index) = entities
                .states
                .get_mut(&entity)
                .and_then(|components| components.remove(component))
            else {
                return false;
            };
            index
        };

        // Collections drop the pointer before the slot is freed.
        self.sync_entity(entity);
        self.pools.write().free(component, index);
        self.staged.lock().deleted_component(entity, component);
        trace!(entity = %entity, component = %component, "removed component");
        true
    }

    /// Pointer to `entity`'s `T`, if both exist.
    #[must_use]
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<ComponentPtr<T>> {
        let entities = self.entities.read();
        let index = entities.states.get(&entity)?.get(component_type_id::<T>())?;
        self.pools.read().pool::<T>()?.index_ptr(index)
    }

    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.entities
            .read()
            .states
            .get(&entity)
            .is_some_and(|components| components.contains(component_type_id::<T>()))
    }

    /// Exclusive access to `entity`'s `T` outside a tick.
    pub fn component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let index = self
            .entities
            .get_mut()
            .states
            .get(&entity)?
            .get(component_type_id::<T>())?;
        self.pools.get_mut().pool_mut::<T>()?.get_mut(index)
    }

    /// Run `f` over the pool of `T`, if one exists.
    pub fn with_component_pool<T: Component, R>(
        &self,
        f: impl FnOnce(&ComponentPool<T>) -> R,
    ) -> Option<R> {
        self.pools.read().pool::<T>().map(f)
    }

    // ==================== Aspects ====================

    /// Intern the aspect requiring `types`.
    pub fn aspect_id(&self, types: &[ComponentTypeId]) -> AspectId {
        self.aspect_id_for(&Aspect::new(types))
    }

    /// Intern the aspect of a component tuple.
    pub fn aspect_id_of<S: ComponentSet>(&self) -> AspectId {
        self.aspect_id_for(&Aspect::of::<S>())
    }

    /// Intern `aspect`, creating its collection on first use. A new collection
    /// starts out holding every matching entity.
    pub fn aspect_id_for(&self, aspect: &Aspect) -> AspectId {
        if let Some(&id) = self.aspects.read().lookup.get(aspect) {
            return id;
        }

        let entities = self.entities.read();
        let pools = self.pools.read();
        let mut aspects = self.aspects.write();
        if let Some(&id) = aspects.lookup.get(aspect) {
            return id;
        }

        let id = AspectId::from_raw(aspects.collections.len() as u32);
        let mut collection = AspectCollection::new(id, aspect.clone());
        let mut candidates: Vec<_> = entities.states.iter().collect();
        candidates.sort_unstable_by_key(|(entity, _)| **entity);
        for (&entity, components) in candidates {
            collection.try_update(entity, components, &pools);
        }

        debug!(
            aspect = ?aspect,
            id = id.as_raw(),
            entities = collection.len(),
            "created aspect collection"
        );
        aspects.collections.push(Arc::new(RwLock::new(collection)));
        aspects.lookup.insert(aspect.clone(), id);
        id
    }

    /// Run `f` over a collection. `None` if `id` was not interned here.
    ///
    /// `f` holds the collection's read lock: outside a tick it must not make
    /// structural changes to the world.
    pub fn with_aspect_collection<R>(
        &self,
        id: AspectId,
        f: impl FnOnce(&AspectCollection) -> R,
    ) -> Option<R> {
        let collection = Arc::clone(self.aspects.read().collections.get(id.index())?);
        let guard = collection.read();
        Some(f(&guard))
    }

    /// Intern the aspect requiring `types` and run `f` over its collection.
    pub fn with_aspect_collection_for<R>(
        &self,
        types: &[ComponentTypeId],
        f: impl FnOnce(&AspectCollection) -> R,
    ) -> R {
        let id = self.aspect_id(types);
        let collection = Arc::clone(&self.aspects.read().collections[id.index()]);
        let guard = collection.read();
        f(&guard)
    }

    #[must_use]
    pub fn aspect_collection_count(&self) -> usize {
        self.aspects.read().collections.len()
    }

    /// Re-evaluate `entity` against every collection.
    fn sync_entity(&self, entity: Entity) {
        self.sync_entities(std::slice::from_ref(&entity));
    }

    fn sync_entities(&self, entities: &[Entity]) {
        if entities.is_empty() {
            return;
        }
        let table = self.entities.read();
        let pools = self.pools.read();
        let aspects = self.aspects.read();
        for collection in &aspects.collections {
            let mut collection = collection.write();
            for &entity in entities {
                match table.states.get(&entity) {
                    Some(components) => {
                        collection.try_update(entity, components, &pools);
                    }
                    None => {
                        collection.try_remove(entity);
                    }
                }
            }
        }
    }

    // ==================== Messages ====================

    /// Queue a world-wide message.
    pub fn queue_message<M: Message>(&self, message: M) {
        self.queue_message_for(Entity::NONE, message);
    }

    pub fn queue_message_for<M: Message>(&self, entity: Entity, message: M) {
        self.messages.lock().push(message, entity);
    }

    /// Take every world-wide message of type `M`.
    pub fn consume_messages<M: Message>(&self) -> Vec<M> {
        self.consume_messages_for(Entity::NONE)
    }

    pub fn consume_messages_for<M: Message>(&self, entity: Entity) -> Vec<M> {
        self.messages.lock().pop(entity)
    }

    /// Take every message of type `M` for every target.
    pub fn consume_all_messages<M: Message>(&self) -> Vec<(Entity, M)> {
        self.messages.lock().drain_all()
    }

    /// Run `f` over the world-wide messages of type `M` without removing them.
    ///
    /// `f` holds the message lock; see [`peek_messages_for`](Self::peek_messages_for).
    pub fn peek_messages<M: Message, R>(&self, f: impl FnOnce(&[M]) -> R) -> R {
        self.peek_messages_for(Entity::NONE, f)
    }

    /// Run `f` over the messages of type `M` queued for `entity` without
    /// removing them.
    ///
    /// `f` holds the message lock: it must not queue, consume or peek messages,
    /// nor destroy entities outside a tick.
    pub fn peek_messages_for<M: Message, R>(
        &self,
        entity: Entity,
        f: impl FnOnce(&[M]) -> R,
    ) -> R {
        let messages = self.messages.lock();
        f(messages.queue::<M>().map_or(&[], |queue| queue.peek(entity)))
    }

    /// Messages of type `M` queued for any target.
    #[must_use]
    pub fn message_count<M: Message>(&self) -> usize {
        self.messages.lock().len::<M>()
    }

    // ==================== Systems ====================

    /// Register a system. Its aspect collection is created if needed.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateSystem`] if a system of type `S` is registered.
    pub fn add_system<S: System>(&mut self, system: S) -> EcsResult<()> {
        let key = SystemKey::of::<S>();
        if self.system_lookup.contains_key(&key.type_id()) {
            warn!(system = key.name(), "system already registered");
            return Err(EcsError::DuplicateSystem(key.name()));
        }

        let aspect = self.aspect_id_of::<S::Components>();
        self.system_lookup.insert(key.type_id(), self.systems.len());
        self.systems.push(SystemEntry::new(system, aspect));
        self.graph = None;
        debug!(system = key.name(), aspect = aspect.as_raw(), "registered system");
        Ok(())
    }

    /// Unregister and return the system of type `S`.
    ///
    /// # Errors
    ///
    /// [`EcsError::SystemNotFound`] if no system of type `S` is registered.
    pub fn remove_system<S: System>(&mut self) -> EcsResult<S> {
        let key = SystemKey::of::<S>();
        let not_found = || EcsError::SystemNotFound(key.name());
        let index = self.system_lookup.remove(&key.type_id()).ok_or_else(not_found)?;

        let entry = self.systems.remove(index);
        for (position, moved) in self.systems.iter().enumerate().skip(index) {
            self.system_lookup.insert(moved.key().type_id(), position);
        }
        self.graph = None;
        debug!(system = key.name(), "removed system");
        entry.into_system().ok_or_else(not_found)
    }

    pub fn system_mut<S: System>(&mut self) -> Option<&mut S> {
        let index = *self.system_lookup.get(&TypeId::of::<S>())?;
        self.systems[index].get_mut()
    }

    #[must_use]
    pub fn has_system<S: System>(&self) -> bool {
        self.system_lookup.contains_key(&TypeId::of::<S>())
    }

    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Resolve declared dependencies into index edges. Unregistered systems
    /// are skipped with a warning.
    fn resolve_graph(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for (index, entry) in self.systems.iter().enumerate() {
            let dependencies = entry.dependencies();
            let resolve = |other: &SystemKey, relation: &'static str| {
                let found = self.system_lookup.get(&other.type_id()).copied();
                if found.is_none() {
                    warn!(
                        system = entry.key().name(),
                        other = other.name(),
                        relation,
                        "dependency on unregistered system ignored"
                    );
                }
                found
            };

            for predecessor in dependencies.predecessors() {
                if let Some(other) = resolve(predecessor, "after") {
                    edges.push((other, index));
                }
            }
            for successor in dependencies.successors() {
                if let Some(other) = resolve(successor, "before") {
                    edges.push((index, other));
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    // ==================== Tick ====================

    /// Advance the world by one frame.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from any system, after every system task of this tick
    /// has finished.
    pub fn tick(&mut self, frame_time: &FrameTime) {
        let _span = trace_span!("world_tick", frame = frame_time.frame_index).entered();

        self.apply_deferred_destruction();
        {
            let messages = self.messages.get_mut();
            self.staged.get_mut().flush_into(messages);
        }
        if self.graph.is_none() {
            self.graph = Some(self.resolve_graph());
        }

        self.run_systems(frame_time);

        let registrations = self.commands.get_mut().take_registrations();
        if !registrations.is_empty() {
            trace!(entities = registrations.len(), "applying deferred registrations");
        }
        self.sync_entities(&registrations);
        self.ticks += 1;
    }

    fn apply_deferred_destruction(&mut self) {
        let (removals, destructions) = self.commands.get_mut().take_destructive();
        if removals.is_empty() && destructions.is_empty() {
            return;
        }
        trace!(
            removals = removals.len(),
            destructions = destructions.len(),
            "applying deferred destruction"
        );

        for (entity, component) in removals {
            if !self.apply_remove(entity, component) {
                debug!(
                    entity = %entity,
                    component = %component,
                    "deferred removal no longer applies"
                );
            }
        }
        for entity in destructions {
            self.apply_destroy(entity);
        }
    }

    fn run_systems(&self, frame_time: &FrameTime) {
        let edges = self.graph.as_deref().unwrap_or_default();

        self.tasks.scope(|scope| {
            let join = scope.create_join_task("World Join");
            let tasks: SmallVec<[TaskId; 16]> = self
                .systems
                .iter()
                .map(|entry| {
                    scope.create_task(entry.key().name(), move || entry.run(self, frame_time))
                })
                .collect();

            for &(predecessor, successor) in edges {
                scope.add_dependency(tasks[predecessor], tasks[successor]);
            }
            for &task in &tasks {
                scope.add_dependency(task, join);
            }

            let _active = TickGuard::enter(&self.tick_active);
            scope.dispatch_all(&tasks, TaskQueueFlags::NORMAL);
            scope.dispatch(join, TaskQueueFlags::NORMAL);
            self.tasks.wait_for_completion(join, Timeout::INFINITE);
        });
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entity_count())
            .field("aspects", &self.aspect_collection_count())
            .field("systems", &self.systems.len())
            .field("ticks", &self.ticks)
            .field("pending_notifications", &self.staged.lock().len())
            .field("queued_messages", &self.messages.lock().total())
            .finish_non_exhaustive()
    }
}
