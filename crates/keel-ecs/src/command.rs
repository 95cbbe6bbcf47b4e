//! Structural changes recorded during a tick.
//!
//! Registrations are applied right after the tick's join. Component removals
//! and entity destructions wait for the next tick's first step, removals
//! first, so pointers read during a tick stay valid until it ends.

use crate::{component::ComponentTypeId, entity::Entity};

#[derive(Debug, Default)]
pub(crate) struct CommandBuffer {
    /// Entities whose aspect membership must be re-evaluated.
    registrations: Vec<Entity>,
    removals: Vec<(Entity, ComponentTypeId)>,
    destructions: Vec<Entity>,
}

impl CommandBuffer {
    pub(crate) fn register(&mut self, entity: Entity) {
        self.registrations.push(entity);
    }

    pub(crate) fn remove_component(&mut self, entity: Entity, component: ComponentTypeId) {
        self.removals.push((entity, component));
    }

    pub(crate) fn destroy(&mut self, entity: Entity) {
        self.destructions.push(entity);
    }

    /// Pending registrations, each entity once, in id order.
    pub(crate) fn take_registrations(&mut self) -> Vec<Entity> {
        let mut registrations = std::mem::take(&mut self.registrations);
        registrations.sort_unstable();
        registrations.dedup();
        registrations
    }

    /// Pending removals and destructions, in request order.
    pub(crate) fn take_destructive(&mut self) -> (Vec<(Entity, ComponentTypeId)>, Vec<Entity>) {
        (
            std::mem::take(&mut self.removals),
            std::mem::take(&mut self.destructions),
        )
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.registrations.is_empty() && self.removals.is_empty() && self.destructions.is_empty()
    }
}
