//! Archetypes group entities by their exact set of component types.
//!
//! Each archetype computes its chunk layout once:
//! the per-chunk capacity and the byte offset of every column.
//! Columns are placed in *memory order*,
//! which is independent of the canonical type order used for identity.

use std::collections::HashMap;

use bitvec::vec::BitVec;
use indexmap::IndexSet;
use xias::Xias;

use crate::chunk::{ChunkId, List, ListHead, CHUNK_BUFFER_SIZE};
use crate::shared::SharedHandle;
use crate::types::{Category, Registry, TypeIndex};
use crate::{Error, Result};

pub(crate) mod manager;
pub(crate) use manager::ArchetypeManager;

#[cfg(test)]
mod tests;

/// Identifies an archetype within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    pub(crate) fn get(self) -> usize { self.0.small_int() }
}

/// How a column is stored in a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    /// Values stored inline, including the entity column.
    Inline,
    /// A `u32` object-table handle per row.
    Handle,
    /// No storage.
    Tag,
    /// No per-row storage; the value is the chunk's shared handle at this slot.
    Shared(usize),
}

/// Layout of one column within a chunk of an archetype.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Column {
    pub(crate) ty:     TypeIndex,
    pub(crate) kind:   ColumnKind,
    pub(crate) offset: usize,
    pub(crate) stride: usize,
}

impl Column {
    /// Byte range of `rows` rows starting at `row`.
    pub(crate) fn range(&self, row: usize, rows: usize) -> std::ops::Range<usize> {
        let start = self.offset + row * self.stride;
        start..start + rows * self.stride
    }
}

/// A distinct set of component types and its chunk layout.
#[derive(Debug)]
pub struct Archetype {
    pub(crate) id:             ArchetypeId,
    /// Canonically sorted; the entity type is always first.
    pub(crate) types:          Box<[TypeIndex]>,
    /// Parallel to `types`.
    pub(crate) columns:        Box<[Column]>,
    pub(crate) mask:           BitVec,
    /// Column indices in physical placement order.
    pub(crate) memory_order:   Box<[usize]>,
    pub(crate) chunk_capacity: usize,
    pub(crate) entity_count:   usize,
    pub(crate) lists:          [ListHead; 2],
    /// Partially filled chunks keyed by their shared values.
    /// Only used when the archetype has shared columns.
    pub(crate) shared_free:    HashMap<Box<[SharedHandle]>, IndexSet<ChunkId>>,
    pub(crate) num_shared:     usize,
    pub(crate) num_managed:    usize,
    pub(crate) num_buffers:    usize,
    pub(crate) disabled:       bool,
    pub(crate) prefab:         bool,
    /// Contains the [`CleanupEntity`](crate::types::CleanupEntity) tag.
    pub(crate) residue:        bool,
    /// Contains at least one cleanup component.
    pub(crate) has_cleanup:    bool,
    pub(crate) instantiable:   Option<ArchetypeId>,
    pub(crate) cleanup_form:   Option<ArchetypeId>,
    pub(crate) add_edges:      HashMap<TypeIndex, ArchetypeId>,
    pub(crate) remove_edges:   HashMap<TypeIndex, ArchetypeId>,
}

fn align_up(offset: usize, align: usize) -> usize { (offset + align - 1) & !(align - 1) }

/// Orders column indices by memory-order key with a stable insertion sort.
fn memory_order(keys: &[u64]) -> Box<[usize]> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    for i in 1..order.len() {
        let mut j = i;
        while j > 0 && keys[order[j - 1]] > keys[order[j]] {
            order.swap(j - 1, j);
            j -= 1;
        }
    }
    order.into_boxed_slice()
}

/// Places columns for `capacity` rows, returning their offsets if they fit.
fn place(
    order: &[usize],
    strides: &[usize],
    aligns: &[usize],
    capacity: usize,
) -> Option<Vec<usize>> {
    let mut offsets = vec![0; strides.len()];
    let mut cursor = 0;
    for &column in order {
        if strides[column] == 0 {
            offsets[column] = cursor;
            continue;
        }
        let offset = align_up(cursor, aligns[column]);
        offsets[column] = offset;
        cursor = offset + strides[column] * capacity;
    }
    (cursor <= CHUNK_BUFFER_SIZE).then_some(offsets)
}

impl Archetype {
    /// Computes the layout of a validated, canonically sorted type list.
    pub(crate) fn new(id: ArchetypeId, types: &[TypeIndex], registry: &Registry) -> Result<Self> {
        let infos: Vec<_> = types.iter().map(|&ty| registry.info(ty)).collect();
        let strides: Vec<usize> = infos.iter().map(|info| info.stride()).collect();
        let aligns: Vec<usize> = infos.iter().map(|info| info.column_align()).collect();
        let keys: Vec<u64> = infos.iter().map(|info| info.memory_order).collect();
        let order = memory_order(&keys);

        let row_size: usize = strides.iter().sum();
        let mut capacity = CHUNK_BUFFER_SIZE / row_size;
        let offsets = loop {
            if capacity == 0 {
                return Err(Error::ArchetypeTooLarge { size: row_size });
            }
            match place(&order, &strides, &aligns, capacity) {
                Some(offsets) => break offsets,
                None => capacity -= 1,
            }
        };

        let mut num_shared = 0;
        let columns = types
            .iter()
            .zip(&infos)
            .zip(offsets)
            .map(|((&ty, info), offset)| {
                let kind = match info.category {
                    Category::Plain => ColumnKind::Inline,
                    Category::Tag => ColumnKind::Tag,
                    Category::Buffer | Category::Managed => ColumnKind::Handle,
                    Category::Shared => {
                        num_shared += 1;
                        ColumnKind::Shared(num_shared - 1)
                    }
                };
                Column { ty, kind, offset, stride: info.stride() }
            })
            .collect();

        let mut mask = BitVec::repeat(false, registry.len());
        for &ty in types {
            mask.set(ty.get(), true);
        }

        let count = |category| infos.iter().filter(|info| info.category == category).count();
        Ok(Self {
            id,
            types: types.into(),
            columns,
            memory_order: order,
            chunk_capacity: capacity,
            entity_count: 0,
            lists: Default::default(),
            shared_free: HashMap::new(),
            num_shared,
            num_managed: count(Category::Managed),
            num_buffers: count(Category::Buffer),
            disabled: mask[registry.disabled().get()],
            prefab: mask[registry.prefab().get()],
            residue: mask[registry.cleanup_entity().get()],
            has_cleanup: infos.iter().any(|info| info.cleanup),
            mask,
            instantiable: None,
            cleanup_form: None,
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        })
    }

    /// The identifier of this archetype.
    pub fn id(&self) -> ArchetypeId { self.id }

    /// The component types, canonically sorted with the entity type first.
    pub fn types(&self) -> &[TypeIndex] { &self.types }

    /// Whether the archetype contains `ty`.
    pub fn has(&self, ty: TypeIndex) -> bool { self.mask.get(ty.get()).map_or(false, |bit| *bit) }

    /// The maximum number of entities per chunk.
    pub fn chunk_capacity(&self) -> usize { self.chunk_capacity }

    /// The number of entities across all chunks.
    pub fn entity_count(&self) -> usize { self.entity_count }

    /// The number of chunks.
    pub fn chunk_count(&self) -> usize { self.lists[List::All as usize].len() }

    /// The number of shared columns.
    pub fn shared_count(&self) -> usize { self.num_shared }

    /// The number of managed columns.
    pub fn managed_count(&self) -> usize { self.num_managed }

    /// The number of buffer columns.
    pub fn buffer_count(&self) -> usize { self.num_buffers }

    /// Whether entities are disabled.
    pub fn is_disabled(&self) -> bool { self.disabled }

    /// Whether entities are prefabs.
    pub fn is_prefab(&self) -> bool { self.prefab }

    /// Whether this archetype holds destroyed entities awaiting cleanup.
    pub fn is_cleanup_residue(&self) -> bool { self.residue }

    /// Byte offset of each column, in canonical type order.
    pub fn column_offsets(&self) -> impl Iterator<Item = (TypeIndex, usize)> + '_ {
        self.columns.iter().map(|column| (column.ty, column.offset))
    }

    /// Column indices in physical placement order.
    pub fn memory_order(&self) -> &[usize] { &self.memory_order }

    /// The column position of `ty`.
    pub(crate) fn column_index(&self, ty: TypeIndex) -> Option<usize> {
        self.types.binary_search(&ty).ok()
    }

    pub(crate) fn column(&self, ty: TypeIndex) -> Option<&Column> {
        self.column_index(ty).map(|index| &self.columns[index])
    }

    /// The shared-value slot of a shared column.
    pub(crate) fn shared_slot(&self, ty: TypeIndex) -> Option<usize> {
        match self.column(ty)?.kind {
            ColumnKind::Shared(slot) => Some(slot),
            _ => None,
        }
    }

    /// Offset of the entity column.
    pub(crate) fn entity_offset(&self) -> usize { self.columns[0].offset }

    /// The types of shared columns, in slot order.
    pub(crate) fn shared_types(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.columns
            .iter()
            .filter(|column| matches!(column.kind, ColumnKind::Shared(_)))
            .map(|column| column.ty)
    }

    pub(crate) fn chunks<'t>(
        &self,
        chunks: &'t [crate::chunk::Chunk],
    ) -> impl Iterator<Item = ChunkId> + 't {
        self.lists[List::All as usize].iter(chunks, List::All)
    }
}
