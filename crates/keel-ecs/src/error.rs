//! Error types for world operations.

use thiserror::Error;

use crate::{component::ComponentTypeId, entity::Entity};

/// Errors from structural world operations and system registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The entity does not exist (never created, or already destroyed).
    #[error("entity not found: {0:?}")]
    EntityNotFound(Entity),

    /// The entity already has a component of this type.
    #[error("entity {entity:?} already has component {component}")]
    DuplicateComponent {
        entity: Entity,
        component: ComponentTypeId,
    },

    /// The entity has no component of this type.
    #[error("entity {entity:?} has no component {component}")]
    ComponentNotFound {
        entity: Entity,
        component: ComponentTypeId,
    },

    /// A system of this type is already registered.
    #[error("system already registered: {0}")]
    DuplicateSystem(&'static str),

    /// No system of this type is registered.
    #[error("system not found: {0}")]
    SystemNotFound(&'static str),
}

/// Result type for world operations.
pub type EcsResult<T> = Result<T, EcsError>;
