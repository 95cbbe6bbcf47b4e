//! Typed per-entity mailboxes.
//!
//! Each message type has one [`MessageQueue`] per world, holding a FIFO per
//! target entity. [`Entity::NONE`] is the world-wide target.

use std::any::{Any, TypeId};

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::{component::ComponentTypeId, entity::Entity};

/// Marker trait for message types.
pub trait Message: Send + 'static {}

impl<T: Send + 'static> Message for T {}

/// FIFOs of one message type, keyed by target entity.
pub struct MessageQueue<M> {
    queues: HashMap<Entity, Vec<M>, FxBuildHasher>,
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self {
            queues: HashMap::default(),
        }
    }
}

impl<M: Message> MessageQueue<M> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: M, entity: Entity) {
        self.queues.entry(entity).or_default().push(message);
    }

    /// Take every message queued for `entity`, oldest first.
    pub fn pop(&mut self, entity: Entity) -> Vec<M> {
        self.queues.remove(&entity).unwrap_or_default()
    }

    #[must_use]
    pub fn peek(&self, entity: Entity) -> &[M] {
        self.queues.get(&entity).map_or(&[], Vec::as_slice)
    }

    pub fn remove_entity(&mut self, entity: Entity) {
        self.queues.remove(&entity);
    }

    /// Take every message of every entity.
    pub fn drain_all(&mut self) -> Vec<(Entity, M)> {
        self.queues
            .drain()
            .flat_map(|(entity, messages)| messages.into_iter().map(move |m| (entity, m)))
            .collect()
    }

    /// Total queued messages across all entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(Vec::is_empty)
    }
}

impl<M> std::fmt::Debug for MessageQueue<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("message", &std::any::type_name::<M>())
            .field("targets", &self.queues.len())
            .finish()
    }
}

// ============================================================================
// Type-erased queue table
// ============================================================================

pub(crate) trait ErasedMessageQueue: Send {
    fn remove_entity(&mut self, entity: Entity);
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<M: Message> ErasedMessageQueue for MessageQueue<M> {
    fn remove_entity(&mut self, entity: Entity) {
        Self::remove_entity(self, entity);
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Every message queue of a world. Queues are created on first push; a type
/// that was never pushed reads as empty.
#[derive(Default)]
pub(crate) struct MessageQueues {
    queues: HashMap<TypeId, Box<dyn ErasedMessageQueue>, FxBuildHasher>,
}

impl MessageQueues {
    pub(crate) fn queue<M: Message>(&self) -> Option<&MessageQueue<M>> {
        self.queues
            .get(&TypeId::of::<M>())
            .and_then(|queue| queue.as_any().downcast_ref())
    }

    pub(crate) fn queue_mut<M: Message>(&mut self) -> Option<&mut MessageQueue<M>> {
        self.queues
            .get_mut(&TypeId::of::<M>())
            .and_then(|queue| queue.as_any_mut().downcast_mut())
    }

    /// # Panics
    ///
    /// Panics if the entry for `M` holds a queue of another type.
    pub(crate) fn queue_or_create<M: Message>(&mut self) -> &mut MessageQueue<M> {
        self.queues
            .entry(TypeId::of::<M>())
            .or_insert_with(|| Box::new(MessageQueue::<M>::new()))
            .as_any_mut()
            .downcast_mut()
            .expect("message queue registered under another type")
    }

    pub(crate) fn push<M: Message>(&mut self, message: M, entity: Entity) {
        self.queue_or_create::<M>().push(message, entity);
    }

    pub(crate) fn pop<M: Message>(&mut self, entity: Entity) -> Vec<M> {
        self.queue_mut::<M>()
            .map(|queue| queue.pop(entity))
            .unwrap_or_default()
    }

    pub(crate) fn drain_all<M: Message>(&mut self) -> Vec<(Entity, M)> {
        self.queue_mut::<M>()
            .map(MessageQueue::drain_all)
            .unwrap_or_default()
    }

    pub(crate) fn remove_entity(&mut self, entity: Entity) {
        for queue in self.queues.values_mut() {
            queue.remove_entity(entity);
        }
    }

    pub(crate) fn len<M: Message>(&self) -> usize {
        self.queue::<M>().map_or(0, MessageQueue::len)
    }

    pub(crate) fn total(&self) -> usize {
        self.queues.values().map(|queue| queue.len()).sum()
    }
}

// ============================================================================
// Structural notifications
// ============================================================================

/// Queued on [`Entity::NONE`] when an entity is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedEntityMessage {
    pub entity: Entity,
}

/// Queued on [`Entity::NONE`] when an entity is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedEntityMessage {
    pub entity: Entity,
}

/// Queued on [`Entity::NONE`] when a component is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedComponentMessage {
    pub entity: Entity,
    pub component: ComponentTypeId,
}

/// Queued on [`Entity::NONE`] when a component is detached or its entity is
/// destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedComponentMessage {
    pub entity: Entity,
    pub component: ComponentTypeId,
}

/// Notifications produced since the last flush.
#[derive(Debug, Default)]
pub(crate) struct StagedNotifications {
    created_entities: Vec<CreatedEntityMessage>,
    deleted_entities: Vec<DeletedEntityMessage>,
    created_components: Vec<CreatedComponentMessage>,
    deleted_components: Vec<DeletedComponentMessage>,
}

impl StagedNotifications {
    pub(crate) fn created_entity(&mut self, entity: Entity) {
        self.created_entities.push(CreatedEntityMessage { entity });
    }

    pub(crate) fn deleted_entity(&mut self, entity: Entity) {
        self.deleted_entities.push(DeletedEntityMessage { entity });
    }

    pub(crate) fn created_component(&mut self, entity: Entity, component: ComponentTypeId) {
        self.created_components
            .push(CreatedComponentMessage { entity, component });
    }

    pub(crate) fn deleted_component(&mut self, entity: Entity, component: ComponentTypeId) {
        self.deleted_components
            .push(DeletedComponentMessage { entity, component });
    }

    pub(crate) fn len(&self) -> usize {
        self.created_entities.len()
            + self.deleted_entities.len()
            + self.created_components.len()
            + self.deleted_components.len()
    }

    /// Replace last flush's notifications in `queues` with the staged batch.
    pub(crate) fn flush_into(&mut self, queues: &mut MessageQueues) {
        fn replace<M: Message>(queues: &mut MessageQueues, staged: &mut Vec<M>) {
            let queue = queues.queue_or_create::<M>();
            queue.pop(Entity::NONE);
            for message in staged.drain(..) {
                queue.push(message, Entity::NONE);
            }
        }

        replace(queues, &mut self.created_entities);
        replace(queues, &mut self.deleted_entities);
        replace(queues, &mut self.created_components);
        replace(queues, &mut self.deleted_components);
    }
}
