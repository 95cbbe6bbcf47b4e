// Component storage hands out raw slot pointers
#![allow(unsafe_code)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::ptr_as_ptr)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::redundant_pub_crate)]

//! Keel ECS - pool-backed Entity Component System with a task-graph tick.
//!
//! # Key Concepts
//!
//! - **Entity**: an opaque non-zero 64-bit id
//! - **Component**: plain data stored in a block-allocated per-type pool
//! - **Aspect**: a set of required component types; its collection keeps the
//!   matching entities and packed component pointers up to date
//! - **System**: per-tick logic over one aspect, ordered against other systems
//!   by declared dependencies
//! - **Message**: typed per-entity mailboxes for communication between systems
//!
//! # Tick
//!
//! Every [`World::tick`] runs each registered system as a task on the shared
//! [`keel_task::TaskManager`]. Destructive structural changes requested during
//! a tick are applied at the start of the next one.
//!
//! ```ignore
//! let tasks = Arc::new(TaskManager::new(TaskManagerConfig::default()));
//! let mut world = World::new(tasks);
//!
//! let entity = world.create_entity();
//! world.add_component_with(entity, Velocity { x: 1.0, y: 0.0 })?;
//! world.add_system(Gravity)?;
//!
//! let mut time = FrameTime::first(1.0 / 60.0);
//! loop {
//!     world.tick(&time);
//!     time = time.advance(1.0 / 60.0);
//! }
//! ```

mod aspect;
mod command;
mod component;
mod entity;
mod error;
mod frame;
mod message;
mod pool;
mod system;
mod world;

pub use aspect::{Aspect, AspectCollection, AspectId};
pub use component::{
    Component, ComponentInfo, ComponentMap, ComponentPtr, ComponentRef, ComponentTypeId,
    component_info, component_type_id, registered_component_count,
};
pub use entity::{Entity, EntityAllocator};
pub use error::{EcsError, EcsResult};
pub use frame::FrameTime;
pub use message::{
    CreatedComponentMessage, CreatedEntityMessage, DeletedComponentMessage, DeletedEntityMessage,
    Message, MessageQueue,
};
pub use pool::{ComponentPool, DEFAULT_BLOCK_SIZE, POOL_INDEX_STRIDE};
pub use system::{ComponentSet, Dependencies, System, SystemKey};
pub use world::{World, WorldConfig};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ComponentPtr, ComponentRef, ComponentSet, Dependencies, Entity, EcsError, EcsResult,
        FrameTime, System, World, WorldConfig,
    };
}
