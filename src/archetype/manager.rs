//! Owns archetypes, chunks and the storage they reference.

use std::sync::Arc;
use std::{fmt, mem};

use indexmap::IndexMap;
use xias::Xias;

use super::{Archetype, ArchetypeId};
use crate::chunk::objects::ObjectTable;
use crate::chunk::{BlockAllocator, Chunk, ChunkId, List};
use crate::shared::{SharedHandle, SharedStore};
use crate::tracer::Tracer;
use crate::types::{Registry, TypeIndex};
use crate::{Entity, Error, Result};

/// The physical storage of a store:
/// the archetype pool, the chunk arena with its empty pool,
/// the shared-value store and the object side table.
pub(crate) struct ArchetypeManager {
    pub(crate) registry:   Arc<Registry>,
    pub(crate) archetypes: Vec<Archetype>,
    lookup:                IndexMap<Box<[TypeIndex]>, ArchetypeId>,
    pub(crate) chunks:     Vec<Chunk>,
    /// Chunks detached from any archetype, keeping their blocks for reuse.
    empty:                 Vec<ChunkId>,
    allocator:             Box<dyn BlockAllocator>,
    next_sequence:         u64,
    pub(crate) shared:     SharedStore,
    pub(crate) objects:    ObjectTable,
    pub(crate) tracer:     Arc<dyn Tracer>,
}

impl fmt::Debug for ArchetypeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeManager")
            .field("archetypes", &self.archetypes.len())
            .field("chunks", &self.chunks.len())
            .field("empty", &self.empty.len())
            .finish_non_exhaustive()
    }
}

impl ArchetypeManager {
    pub(crate) fn new(
        registry: Arc<Registry>,
        allocator: Box<dyn BlockAllocator>,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        let shared = SharedStore::new(&registry);
        Self {
            registry,
            archetypes: Vec::new(),
            lookup: IndexMap::new(),
            chunks: Vec::new(),
            empty: Vec::new(),
            allocator,
            next_sequence: 0,
            shared,
            objects: ObjectTable::default(),
            tracer,
        }
    }

    pub(crate) fn get(&self, id: ArchetypeId) -> &Archetype { &self.archetypes[id.get()] }

    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.get()]
    }

    pub(crate) fn chunk(&self, id: ChunkId) -> &Chunk { &self.chunks[id.get()] }

    /// The archetype of a chunk in use.
    pub(crate) fn chunk_archetype(&self, id: ChunkId) -> &Archetype {
        self.get(self.chunk(id).archetype.expect("chunk is in use"))
    }

    /// The number of pooled empty chunks.
    pub(crate) fn empty_chunks(&self) -> usize { self.empty.len() }

    /// Looks up an existing archetype with exactly these sorted types.
    pub(crate) fn find(&self, types: &[TypeIndex]) -> Option<ArchetypeId> {
        self.lookup.get(types).copied()
    }

    /// Returns the archetype of a canonically sorted type list, creating it if needed.
    ///
    /// The boolean is true if the archetype was created by this call.
    pub(crate) fn get_or_create(&mut self, types: &[TypeIndex]) -> Result<(ArchetypeId, bool)> {
        if let Some(id) = self.find(types) {
            return Ok((id, false));
        }

        match types.first() {
            None => return Err(Error::EmptyArchetype),
            Some(&first) if first != TypeIndex::ENTITY => return Err(Error::EntityTypeNotFirst),
            Some(_) => {}
        }
        for &ty in types {
            self.registry.get(ty)?;
        }
        for pair in types.windows(2) {
            if pair[0] == pair[1] {
                return Err(Error::DuplicateType(pair[0]));
            }
            if pair[0] > pair[1] {
                return Err(Error::UnsortedTypes);
            }
        }

        let id = ArchetypeId(self.archetypes.len().small_int());
        let archetype = Archetype::new(id, types, &self.registry)?;
        log::debug!(
            "created archetype {id:?} with {} types, {} entities per chunk",
            types.len(),
            archetype.chunk_capacity
        );
        self.tracer.archetype_created(id, types);

        self.archetypes.push(archetype);
        self.lookup.insert(types.into(), id);
        Ok((id, true))
    }

    /// Returns a chunk of `archetype` with the given shared values and at least one free row.
    pub(crate) fn get_chunk_with_free_row(
        &mut self,
        archetype: ArchetypeId,
        shared: &[SharedHandle],
        version: u32,
    ) -> ChunkId {
        let arch = self.get(archetype);
        debug_assert_eq!(shared.len(), arch.num_shared);

        if arch.num_shared > 0 {
            if let Some(&id) = arch.shared_free.get(shared).and_then(|set| set.get_index(0)) {
                return id;
            }
        } else if let Some(id) = arch.lists[List::Free as usize].first() {
            return id;
        }

        self.new_chunk(archetype, shared, version)
    }

    /// Initializes an empty chunk for `archetype`, reusing a pooled block if possible.
    pub(crate) fn new_chunk(
        &mut self,
        archetype: ArchetypeId,
        shared: &[SharedHandle],
        version: u32,
    ) -> ChunkId {
        let id = match self.empty.pop() {
            Some(id) => id,
            None => {
                let block = self.allocator.allocate();
                self.chunks.push(Chunk::empty(block));
                ChunkId((self.chunks.len() - 1).small_int())
            }
        };

        let arch = &mut self.archetypes[archetype.get()];
        let chunk = &mut self.chunks[id.get()];
        chunk.archetype = Some(archetype);
        chunk.count = 0;
        chunk.capacity = arch.chunk_capacity;
        chunk.change_versions = vec![version; arch.types.len()];
        chunk.shared = shared.into();
        chunk.sequence = self.next_sequence;
        self.next_sequence += 1;

        for &handle in shared {
            self.shared.add_reference(handle, 1);
        }

        arch.lists[List::All as usize].push_back(&mut self.chunks, List::All, id);
        self.insert_free(id);

        log::trace!("initialized chunk {id:?} for archetype {archetype:?}");
        self.tracer.chunk_allocated(archetype, id);
        id
    }

    /// Reserves up to `count` rows at the end of a chunk.
    ///
    /// Returns the first reserved row and the number of rows reserved.
    pub(crate) fn allocate_rows(&mut self, id: ChunkId, count: usize) -> (usize, usize) {
        let chunk = self.chunk(id);
        let base = chunk.count;
        let allocated = count.min(chunk.capacity - chunk.count);
        self.set_chunk_row_count(id, base + allocated);
        (base, allocated)
    }

    /// Changes the number of occupied rows,
    /// maintaining free-row membership and releasing the chunk at zero.
    pub(crate) fn set_chunk_row_count(&mut self, id: ChunkId, new_count: usize) {
        let chunk = &mut self.chunks[id.get()];
        let archetype = chunk.archetype.expect("cannot resize a pooled chunk");
        let (old_count, capacity) = (chunk.count, chunk.capacity);
        assert!(new_count <= capacity, "row count {new_count} exceeds capacity {capacity}");
        if new_count == old_count {
            return;
        }
        chunk.count = new_count;

        let arch = &mut self.archetypes[archetype.get()];
        arch.entity_count = arch.entity_count + new_count - old_count;

        if new_count == 0 {
            if old_count < capacity {
                self.remove_free(id);
            }
            self.release_chunk(id);
        } else if old_count == capacity {
            self.insert_free(id);
        } else if new_count == capacity {
            self.remove_free(id);
        }
    }

    fn insert_free(&mut self, id: ChunkId) {
        let chunk = &self.chunks[id.get()];
        let arch = &mut self.archetypes[chunk.archetype.expect("chunk is in use").get()];
        if arch.num_shared > 0 {
            arch.shared_free.entry(chunk.shared.clone()).or_default().insert(id);
        } else {
            arch.lists[List::Free as usize].push_back(&mut self.chunks, List::Free, id);
        }
    }

    fn remove_free(&mut self, id: ChunkId) {
        let chunk = &self.chunks[id.get()];
        let arch = &mut self.archetypes[chunk.archetype.expect("chunk is in use").get()];
        if arch.num_shared > 0 {
            let set = arch.shared_free.get_mut(&chunk.shared).expect("chunk has free rows");
            set.shift_remove(&id);
            if set.is_empty() {
                arch.shared_free.remove(&chunk.shared);
            }
        } else {
            arch.lists[List::Free as usize].unlink(&mut self.chunks, List::Free, id);
        }
    }

    /// Detaches an emptied chunk from its archetype and returns it to the pool.
    fn release_chunk(&mut self, id: ChunkId) {
        let chunk = &mut self.chunks[id.get()];
        let archetype = chunk.archetype.take().expect("chunk is in use");
        for &handle in chunk.shared.iter() {
            self.shared.remove_reference(handle, 1);
        }
        chunk.shared = Box::new([]);
        chunk.change_versions.clear();
        chunk.capacity = 0;

        self.archetypes[archetype.get()].lists[List::All as usize].unlink(
            &mut self.chunks,
            List::All,
            id,
        );
        self.empty.push(id);

        log::trace!("released chunk {id:?} of archetype {archetype:?}");
        self.tracer.chunk_released(archetype, id);
    }

    /// Removes a row by moving the last row of the chunk into it.
    ///
    /// Side-table objects of the removed row must already be cleared or moved.
    /// Returns the entity that moved into `row`, if any.
    pub(crate) fn remove_row(&mut self, id: ChunkId, row: usize) -> Option<Entity> {
        let chunk = &mut self.chunks[id.get()];
        let arch = &self.archetypes[chunk.archetype.expect("chunk is in use").get()];
        assert!(row < chunk.count, "row {row} out of {} occupied rows", chunk.count);

        let last = chunk.count - 1;
        let moved = if row == last {
            None
        } else {
            let bytes = chunk.block.bytes_mut();
            for column in arch.columns.iter().filter(|column| column.stride > 0) {
                bytes.copy_within(column.range(last, 1), column.range(row, 1).start);
            }
            Some(chunk.entities(arch.entity_offset())[row])
        };

        self.set_chunk_row_count(id, last);
        moved
    }

    /// Returns every block to the allocator.
    pub(crate) fn destroy(&mut self) {
        let chunks = mem::take(&mut self.chunks);
        let released = chunks.len();
        for chunk in chunks {
            self.allocator.release(chunk.block);
        }
        self.empty.clear();
        for arch in &mut self.archetypes {
            arch.lists = Default::default();
            arch.shared_free.clear();
            arch.entity_count = 0;
        }
        log::debug!("released {released} chunk blocks");
    }
}

impl Drop for ArchetypeManager {
    fn drop(&mut self) { self.destroy() }
}
