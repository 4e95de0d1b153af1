//! An entity is a stable identifier for one row of components.
//!
//! Entities never change their identifier; structural changes only move their row.
//! The [`EntityTable`] maps each identifier to its current location,
//! and bumps the generation of a slot whenever it is freed
//! so that stale identifiers fail [`EntityTable::exists`].

use std::fmt;

mod table;
pub use table::{EntityTable, Location};

mod remap;
pub use remap::EntityRemap;

#[cfg(test)]
mod tests;

/// A logical identifier of an entity.
///
/// The layout is fixed so that entity fields embedded in components
/// can be located and rewritten by byte offset.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    pub(crate) index:      u32,
    pub(crate) generation: u32,
}

static_assertions::assert_eq_size!(Entity, u64);

impl Entity {
    /// The null entity. Live generations start at 1, so this never exists.
    pub const NULL: Self = Self { index: 0, generation: 0 };

    /// The slot in the entity table.
    pub fn index(self) -> u32 { self.index }

    /// The number of times the slot has been recycled, starting from 1.
    pub fn generation(self) -> u32 { self.generation }

    /// Whether this is [`Entity::NULL`].
    pub fn is_null(self) -> bool { self == Self::NULL }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}
