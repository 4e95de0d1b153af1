//! Exposes profiling and tracing hooks for structural events.

use crate::archetype::ArchetypeId;
use crate::chunk::ChunkId;
use crate::types::TypeIndex;
use crate::Entity;

/// A handler that receives structural events of a store.
///
/// All methods default to doing nothing,
/// so implementations only override the events they care about.
pub trait Tracer: Send + Sync {
    /// A new archetype was created.
    fn archetype_created(&self, _archetype: ArchetypeId, _types: &[TypeIndex]) {}

    /// A chunk was initialized for an archetype.
    fn chunk_allocated(&self, _archetype: ArchetypeId, _chunk: ChunkId) {}

    /// A chunk became empty and returned to the pool.
    fn chunk_released(&self, _archetype: ArchetypeId, _chunk: ChunkId) {}

    /// Entities were created in an archetype.
    fn entities_created(&self, _archetype: ArchetypeId, _count: usize) {}

    /// Entities were destroyed from an archetype.
    fn entities_destroyed(&self, _archetype: ArchetypeId, _count: usize) {}

    /// An entity moved to another archetype.
    fn entity_moved(&self, _entity: Entity, _from: ArchetypeId, _to: ArchetypeId) {}

    /// Entities were migrated in from another store.
    fn entities_migrated(&self, _count: usize) {}

    /// The calling thread waited for outstanding work on a type.
    fn dependency_completed(&self, _ty: TypeIndex) {}

    /// An exclusive transaction started.
    fn begin_exclusive_transaction(&self) {}

    /// An exclusive transaction ended.
    fn end_exclusive_transaction(&self) {}
}

/// An empty tracer.
pub struct Noop;

impl Tracer for Noop {}

/// Groups multiple tracers into a tuple and dispatches each call to them in serial.
pub struct Aggregate<T>(
    /// A tuple of child tracers to execute in serial.
    pub T,
);

macro_rules! impl_aggregate {
    ($($name:ident: $index:tt),*) => {
        impl<$($name: Tracer),*> Tracer for Aggregate<($($name,)*)> {
            fn archetype_created(&self, archetype: ArchetypeId, types: &[TypeIndex]) {
                $(self.0.$index.archetype_created(archetype, types);)*
            }
            fn chunk_allocated(&self, archetype: ArchetypeId, chunk: ChunkId) {
                $(self.0.$index.chunk_allocated(archetype, chunk);)*
            }
            fn chunk_released(&self, archetype: ArchetypeId, chunk: ChunkId) {
                $(self.0.$index.chunk_released(archetype, chunk);)*
            }
            fn entities_created(&self, archetype: ArchetypeId, count: usize) {
                $(self.0.$index.entities_created(archetype, count);)*
            }
            fn entities_destroyed(&self, archetype: ArchetypeId, count: usize) {
                $(self.0.$index.entities_destroyed(archetype, count);)*
            }
            fn entity_moved(&self, entity: Entity, from: ArchetypeId, to: ArchetypeId) {
                $(self.0.$index.entity_moved(entity, from, to);)*
            }
            fn entities_migrated(&self, count: usize) {
                $(self.0.$index.entities_migrated(count);)*
            }
            fn dependency_completed(&self, ty: TypeIndex) {
                $(self.0.$index.dependency_completed(ty);)*
            }
            fn begin_exclusive_transaction(&self) {
                $(self.0.$index.begin_exclusive_transaction();)*
            }
            fn end_exclusive_transaction(&self) {
                $(self.0.$index.end_exclusive_transaction();)*
            }
        }
    };
}

impl_aggregate!(A: 0, B: 1);
impl_aggregate!(A: 0, B: 1, C: 2);
impl_aggregate!(A: 0, B: 1, C: 2, D: 3);

/// A tracer that logs all events.
pub struct Log(
    /// The log level to log events with.
    pub log::Level,
);

impl Tracer for Log {
    fn archetype_created(&self, archetype: ArchetypeId, types: &[TypeIndex]) {
        log::log!(self.0, "archetype_created({archetype:?}, {types:?})");
    }

    fn chunk_allocated(&self, archetype: ArchetypeId, chunk: ChunkId) {
        log::log!(self.0, "chunk_allocated({archetype:?}, {chunk:?})");
    }

    fn chunk_released(&self, archetype: ArchetypeId, chunk: ChunkId) {
        log::log!(self.0, "chunk_released({archetype:?}, {chunk:?})");
    }

    fn entities_created(&self, archetype: ArchetypeId, count: usize) {
        log::log!(self.0, "entities_created({archetype:?}, {count})");
    }

    fn entities_destroyed(&self, archetype: ArchetypeId, count: usize) {
        log::log!(self.0, "entities_destroyed({archetype:?}, {count})");
    }

    fn entity_moved(&self, entity: Entity, from: ArchetypeId, to: ArchetypeId) {
        log::log!(self.0, "entity_moved({entity:?}, {from:?} -> {to:?})");
    }

    fn entities_migrated(&self, count: usize) {
        log::log!(self.0, "entities_migrated({count})");
    }

    fn dependency_completed(&self, ty: TypeIndex) {
        log::log!(self.0, "dependency_completed({ty:?})");
    }

    fn begin_exclusive_transaction(&self) { log::log!(self.0, "begin_exclusive_transaction()"); }

    fn end_exclusive_transaction(&self) { log::log!(self.0, "end_exclusive_transaction()"); }
}
