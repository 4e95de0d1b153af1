//! The store owns all entities of one world and their components.
//!
//! Every mutation goes through [`Store`]:
//! it keeps the entity table, the archetypes and their chunks,
//! the live queries and the dependency tracker consistent with each other.

use std::fmt;
use std::sync::Arc;

use crate::archetype::{Archetype, ArchetypeId, ArchetypeManager};
use crate::chunk::{Chunk, ChunkId};
use crate::dependency::DependencyTracker;
use crate::entity::{EntityTable, Location};
use crate::query::Query;
use crate::shared::SharedStore;
use crate::tracer::Tracer;
use crate::types::{Registry, TypeIndex};
use crate::{Entity, Error, Result};

mod builder;
pub use builder::Builder;

mod access;
mod migrate;
mod queries;
mod structural;

mod transaction;
pub use transaction::ExclusiveTransaction;

mod validate;

#[cfg(test)]
mod tests;

/// A chunked archetype entity store.
pub struct Store {
    manager:        ArchetypeManager,
    entities:       EntityTable,
    queries:        Vec<Query>,
    deps:           DependencyTracker,
    /// Stamped into change versions by writes.
    system_version: u32,
    tracer:         Arc<dyn Tracer>,
}

static_assertions::assert_impl_all!(Store: Send, Sync);

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("entities", &self.entities.len())
            .field("archetypes", &self.manager.archetypes.len())
            .field("queries", &self.queries.len())
            .field("system_version", &self.system_version)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates an empty store with the default configuration.
    pub fn new(registry: Arc<Registry>) -> Self { Builder::new(registry).build() }

    /// Configures a new store.
    pub fn builder(registry: Arc<Registry>) -> Builder { Builder::new(registry) }

    /// The registry of component types.
    pub fn registry(&self) -> &Arc<Registry> { &self.manager.registry }

    /// The number of live entities, including cleanup residues.
    pub fn entity_count(&self) -> usize { self.entities.len() }

    /// The entity table.
    pub fn entities(&self) -> &EntityTable { &self.entities }

    /// Iterates over all archetypes in creation order.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> + '_ {
        self.manager.archetypes.iter()
    }

    /// Gets an archetype by identifier.
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.manager.archetypes.get(id.get())
    }

    /// Looks up the archetype with exactly these types, in any order.
    pub fn find_archetype(&self, types: &[TypeIndex]) -> Result<Option<ArchetypeId>> {
        let sorted = self.registry().canonicalize(types)?;
        Ok(self.manager.find(&sorted))
    }

    /// Returns the archetype with exactly these types, in any order, creating it if needed.
    /// The entity type is implied.
    pub fn get_or_create_archetype(&mut self, types: &[TypeIndex]) -> Result<ArchetypeId> {
        let sorted = self.registry().canonicalize(types)?;
        self.archetype_for(&sorted)
    }

    /// Gets a chunk in use.
    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.manager.chunks.get(id.get()).filter(|chunk| chunk.archetype.is_some())
    }

    /// The number of chunks kept for reuse.
    pub fn empty_chunk_count(&self) -> usize { self.manager.empty_chunks() }

    /// The shared-value store.
    pub fn shared_values(&self) -> &SharedStore { &self.manager.shared }

    /// The version stamped into change versions by writes.
    pub fn system_version(&self) -> u32 { self.system_version }

    /// Sets the version stamped into change versions by subsequent writes.
    ///
    /// Callers advance it once per update tick.
    pub fn set_system_version(&mut self, version: u32) { self.system_version = version }

    /// The per-type dependency tracker.
    pub fn dependencies(&self) -> &DependencyTracker { &self.deps }

    /// The per-type dependency tracker, for registering scheduled work.
    pub fn dependencies_mut(&mut self) -> &mut DependencyTracker { &mut self.deps }

    /// Starts an exclusive transaction, waiting for all outstanding work first.
    ///
    /// Until the returned guard is dropped, dependencies cannot be added
    /// and only the guard can mutate the store.
    pub fn begin_exclusive_transaction(&mut self) -> Result<ExclusiveTransaction<'_>> {
        self.deps.begin_exclusive_transaction()?;
        Ok(ExclusiveTransaction::new(self))
    }

    /// Ends an exclusive transaction whose guard was leaked.
    pub fn end_exclusive_transaction(&mut self) -> Result<()> {
        self.deps.end_exclusive_transaction()
    }

    fn ensure_not_exclusive(&self) -> Result<()> {
        match self.deps.is_exclusive() {
            true => Err(Error::InExclusiveTransaction),
            false => Ok(()),
        }
    }

    /// Locates a live entity.
    pub(crate) fn location(&self, entity: Entity) -> Result<Location> {
        self.entities.location(entity).ok_or(Error::EntityNotFound(entity))
    }

    /// Returns the archetype of a canonically sorted type list,
    /// binding it to live queries if it is new.
    pub(crate) fn archetype_for(&mut self, sorted: &[TypeIndex]) -> Result<ArchetypeId> {
        let (id, created) = self.manager.get_or_create(sorted)?;
        if created {
            let arch = self.manager.get(id);
            for (index, query) in self.queries.iter_mut().enumerate() {
                if query.matches(arch) {
                    log::debug!("bound archetype {id:?} to query {index}");
                    query.matched.push(id);
                }
            }
        }
        Ok(id)
    }

    /// Waits for all outstanding work on the types of an archetype.
    pub(crate) fn complete_archetype(&mut self, id: ArchetypeId) {
        for &ty in self.manager.get(id).types.iter() {
            self.deps.complete_read_and_write_dependency(ty);
        }
    }
}
