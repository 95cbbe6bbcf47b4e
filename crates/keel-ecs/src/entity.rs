//! Entity identifiers.
//!
//! Entities are plain 64-bit ids handed out monotonically from a large
//! starting offset, so small integers and stale ids are obviously invalid.
//! Zero is reserved for "no entity".

use std::fmt;

/// A unique identifier for an entity in the world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Entity(u64);

impl Entity {
    /// "No entity". Messages queued for `NONE` are world-wide.
    pub const NONE: Entity = Entity(0);

    /// The first id handed out by an [`EntityAllocator`].
    pub const FIRST_ID: u64 = 1_100_000;

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Entity(NONE)")
        } else {
            write!(f, "Entity({})", self.0)
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out entity ids. Ids are never reused.
#[derive(Debug)]
pub struct EntityAllocator {
    next: u64,
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: Entity::FIRST_ID,
        }
    }

    pub fn allocate(&mut self) -> Entity {
        let entity = Entity(self.next);
        self.next += 1;
        entity
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub const fn allocated(&self) -> u64 {
        self.next - Entity::FIRST_ID
    }
}
