//! A chunked archetype entity store.
//!
//! # Archetypes and chunks
//! Every entity belongs to exactly one *archetype*,
//! the distinct set of component types it currently has.
//! Entities of an archetype are packed into fixed-size 16 KiB chunks,
//! where each component type occupies one contiguous column.
//! Iterating over a column is therefore a linear scan over a slice.
//!
//! Changing the type set of an entity (adding or removing a component)
//! is a *structural change*: the entity moves to the chunk of another archetype.
//! Chunks always stay packed, so a removal moves the last row of the chunk into the hole.
//!
//! # Component categories
//! - *Plain* components are `Copy` values stored inline in their column.
//! - *Tags* carry no data; only their presence matters.
//! - *Shared* components are deduplicated values shared by all entities of a chunk.
//!   Entities with different shared values live in different chunks.
//! - *Buffer* and *managed* components live in a side table;
//!   the column stores a handle to them.
//!
//! Some types have special meaning:
//! entities with [`Disabled`](types::Disabled) or [`Prefab`](types::Prefab)
//! are hidden from queries that do not ask for them,
//! and *cleanup* components outlive the destruction of their entity,
//! which remains as a *cleanup residue* until they are all removed.
//!
//! # Queries
//! A [query](query::QueryDesc) selects archetypes by required, optional and excluded types,
//! and stays bound to matching archetypes created later.
//! Queries iterate chunk by chunk and can be filtered by a shared value
//! or by the version at which a column was last written.
//!
//! # Scheduling
//! The store does not run jobs itself.
//! Callers register their work in the [dependency tracker](dependency::DependencyTracker),
//! and the store waits for conflicting work before touching the affected types.

#![cfg_attr(not(debug_assertions), deny(missing_docs))]
#![cfg_attr(doc, warn(missing_docs))]

mod error;
pub use error::{Error, Result};

pub mod types;
pub use types::{Registry, TypeIndex};

pub mod entity;
pub use entity::Entity;

pub mod shared;

pub mod chunk;

pub mod archetype;
pub use archetype::Archetype;

pub mod query;

pub mod dependency;

pub mod tracer;

pub mod store;
pub use store::Store;

#[cfg(any(test, feature = "internal-bench"))]
pub mod test_util;
