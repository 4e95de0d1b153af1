//! Errors reported by the store.

use crate::types::{Category, TypeIndex};
use crate::Entity;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors are local to the call that reports them.
/// The store is left unchanged when an error is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An archetype was requested with an empty type list.
    #[error("an archetype needs at least one component type")]
    EmptyArchetype,
    /// The same type appears twice in a type list.
    #[error("component type {0:?} appears more than once")]
    DuplicateType(TypeIndex),
    /// The entity type is missing from the head of a sorted type list.
    #[error("the entity type must be the first type of an archetype")]
    EntityTypeNotFirst,
    /// A type list passed to a sorted-input API is not in canonical order.
    #[error("component types are not in canonical order")]
    UnsortedTypes,
    /// A single row of the archetype does not fit in one chunk.
    #[error("a single row of {size} bytes does not fit in a chunk")]
    ArchetypeTooLarge {
        /// Per-entity byte size of the archetype.
        size: usize,
    },
    /// A component type is aligned more strictly than chunks are.
    #[error("type {name} requires alignment {align}, but at most 64 is supported")]
    AlignmentTooLarge {
        /// Name of the offending type.
        name:  &'static str,
        /// Its alignment.
        align: usize,
    },
    /// A declared entity field does not lie within the value.
    #[error("entity field at offset {offset} does not fit in type {name}")]
    EntityOffsetOutOfBounds {
        /// Name of the offending type.
        name:   &'static str,
        /// The declared offset.
        offset: usize,
    },
    /// A type was registered twice.
    #[error("type {0} is already registered")]
    AlreadyRegistered(&'static str),
    /// A rust type was used that the registry does not know.
    #[error("type {0} is not registered")]
    UnknownType(&'static str),
    /// A type index does not belong to the registry.
    #[error("type index {0:?} is out of range")]
    InvalidTypeIndex(TypeIndex),
    /// A typed accessor was used on a type of another category.
    #[error("type {name} is a {actual:?} component, expected {expected:?}")]
    WrongCategory {
        /// Name of the type.
        name:     &'static str,
        /// Category the type was registered with.
        actual:   Category,
        /// Category the accessor works with.
        expected: Category,
    },
    /// Two stores with different registries cannot exchange entities.
    #[error("the stores were created from different registries")]
    RegistryMismatch,
    /// The entity is null or its generation no longer matches.
    #[error("entity {0:?} does not exist")]
    EntityNotFound(Entity),
    /// The entity does not have the requested component.
    #[error("entity {entity:?} has no {name} component")]
    MissingComponent {
        /// The entity queried.
        entity: Entity,
        /// Name of the missing type.
        name:   &'static str,
    },
    /// The entity column is managed by the store only.
    #[error("the entity component cannot be added, removed or written")]
    EntityComponent,
    /// A query handle does not belong to this store.
    #[error("query handle {0} is not valid")]
    InvalidQuery(u32),
    /// Queries support at most two filter types per filter kind.
    #[error("at most two {0} filters are supported")]
    TooManyFilters(&'static str),
    /// Filters can only use types the query requires.
    #[error("filter type {0} is not required by the query")]
    FilterNotInQuery(&'static str),
    /// A chunk view has no column of the requested type.
    #[error("the chunk has no {0} column")]
    NoSuchColumn(&'static str),
    /// A column was borrowed mutably twice from the same chunk view.
    #[error("column {0} is already borrowed")]
    ColumnBorrowed(&'static str),
    /// Ordinary mutation is forbidden while an exclusive transaction runs.
    #[error("an exclusive transaction is in progress")]
    InExclusiveTransaction,
    /// The operation requires an exclusive transaction.
    #[error("no exclusive transaction is in progress")]
    NotInExclusiveTransaction,
}
