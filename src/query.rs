//! Live queries over archetypes.
//!
//! A query is compiled once into type masks and stays bound to every matching archetype,
//! including archetypes created after the query.
//! Iteration is chunk-granular:
//! matched archetypes are visited newest first, then their chunks in allocation order,
//! skipping chunks rejected by the shared-value or changed-version filters.

use bitvec::vec::BitVec;
use xias::Xias;

use crate::archetype::{Archetype, ArchetypeId, ArchetypeManager};
use crate::chunk::{Chunk, ChunkId};
use crate::shared::SharedHandle;
use crate::types::{Registry, TypeIndex};
use crate::Result;

mod view;
pub use view::{ChunkIter, ChunkView, ChunkViewMut};

#[cfg(test)]
mod tests;

/// The maximum number of types per filter kind.
pub const MAX_FILTER_TYPES: usize = 2;

/// Describes which archetypes a query matches.
#[derive(Debug, Clone, Default)]
pub struct QueryDesc {
    all:              Vec<TypeIndex>,
    any:              Vec<TypeIndex>,
    none:             Vec<TypeIndex>,
    include_disabled: bool,
    include_prefab:   bool,
}

impl QueryDesc {
    /// Creates a query matching every enabled, non-prefab archetype.
    pub fn new() -> Self { Self::default() }

    /// Requires every type in `types`.
    pub fn all(mut self, types: &[TypeIndex]) -> Self {
        self.all.extend_from_slice(types);
        self
    }

    /// Requires at least one type in `types`.
    pub fn any(mut self, types: &[TypeIndex]) -> Self {
        self.any.extend_from_slice(types);
        self
    }

    /// Rejects archetypes with any type in `types`.
    pub fn none(mut self, types: &[TypeIndex]) -> Self {
        self.none.extend_from_slice(types);
        self
    }

    /// Also matches disabled archetypes.
    pub fn include_disabled(mut self) -> Self {
        self.include_disabled = true;
        self
    }

    /// Also matches prefab archetypes.
    pub fn include_prefab(mut self) -> Self {
        self.include_prefab = true;
        self
    }
}

/// Identifies a query of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub(crate) u32);

impl QueryId {
    pub(crate) fn get(self) -> usize { self.0.small_int() }
}

/// Whether a column written at version `change` changed after version `since`.
///
/// Versions wrap around, so they are compared by signed distance.
/// Version 0 is unknown and always counts as changed.
pub fn did_change(change: u32, since: u32) -> bool {
    change == 0 || since == 0 || (change.wrapping_sub(since) as i32) > 0
}

/// A compiled query and the archetypes bound to it.
#[derive(Debug)]
pub(crate) struct Query {
    all:                BitVec,
    any:                BitVec,
    none:               BitVec,
    accepts_disabled:   bool,
    accepts_prefab:     bool,
    /// In creation order; iterated newest first.
    pub(crate) matched: Vec<ArchetypeId>,
    /// Each handle holds one reference in the shared-value store.
    pub(crate) shared:  Vec<(TypeIndex, SharedHandle)>,
    pub(crate) changed: Vec<TypeIndex>,
    pub(crate) since:   u32,
}

impl Query {
    pub(crate) fn new(desc: &QueryDesc, registry: &Registry) -> Result<Self> {
        let mask = |types: &[TypeIndex]| -> Result<BitVec> {
            let mut mask = BitVec::repeat(false, registry.len());
            for &ty in types {
                registry.get(ty)?;
                mask.set(ty.get(), true);
            }
            Ok(mask)
        };
        let (all, any, none) = (mask(&desc.all)?, mask(&desc.any)?, mask(&desc.none)?);

        let names = |ty: TypeIndex| all[ty.get()] || any[ty.get()];
        let accepts_disabled = desc.include_disabled || names(registry.disabled());
        let accepts_prefab = desc.include_prefab || names(registry.prefab());

        Ok(Self {
            all,
            any,
            none,
            accepts_disabled,
            accepts_prefab,
            matched: Vec::new(),
            shared: Vec::new(),
            changed: Vec::new(),
            since: 0,
        })
    }

    /// Tests an archetype against the All/Any/None masks and the disabled/prefab rule.
    pub(crate) fn matches(&self, arch: &Archetype) -> bool {
        if (arch.disabled && !self.accepts_disabled) || (arch.prefab && !self.accepts_prefab) {
            return false;
        }

        let has = |index: usize| arch.mask[index];
        self.all.iter_ones().all(has)
            && (self.any.not_any() || self.any.iter_ones().any(has))
            && !self.none.iter_ones().any(has)
    }

    /// Whether `ty` is required by the query.
    pub(crate) fn requires(&self, ty: TypeIndex) -> bool {
        self.all.get(ty.get()).map_or(false, |bit| *bit)
    }

    /// The required types.
    pub(crate) fn required(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.all.iter_ones().map(|index| TypeIndex(index.small_int()))
    }

    pub(crate) fn has_filter(&self) -> bool { !self.shared.is_empty() || !self.changed.is_empty() }

    /// Applies the shared-value and changed-version filters to a chunk.
    pub(crate) fn accepts_chunk(&self, arch: &Archetype, chunk: &Chunk) -> bool {
        let shared = self.shared.iter().all(|&(ty, handle)| {
            arch.shared_slot(ty).map_or(false, |slot| chunk.shared[slot] == handle)
        });
        let changed = self.changed.is_empty()
            || self.changed.iter().any(|&ty| {
                arch.column_index(ty)
                    .map_or(false, |index| did_change(chunk.change_versions[index], self.since))
            });
        shared && changed
    }

    /// The chunks selected by the query.
    pub(crate) fn chunks<'t>(
        &'t self,
        manager: &'t ArchetypeManager,
    ) -> impl Iterator<Item = ChunkId> + 't {
        self.matched.iter().rev().flat_map(move |&id| {
            let arch = manager.get(id);
            arch.chunks(&manager.chunks)
                .filter(move |&chunk| self.accepts_chunk(arch, manager.chunk(chunk)))
        })
    }

    /// The number of entities in the selected chunks.
    pub(crate) fn entity_count(&self, manager: &ArchetypeManager) -> usize {
        if self.has_filter() {
            self.chunks(manager).map(|chunk| manager.chunk(chunk).len()).sum()
        } else {
            self.matched.iter().map(|&id| manager.get(id).entity_count()).sum()
        }
    }
}
