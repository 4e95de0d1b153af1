use std::marker::PhantomData;
use std::{any, fmt, slice};

use bitvec::vec::BitVec;

use crate::archetype::{Archetype, ArchetypeManager};
use crate::chunk::objects::ObjectTable;
use crate::chunk::{Chunk, ChunkId};
use crate::shared::{SharedHandle, SharedStore, SharedValue};
use crate::types::{Category, Registry, TypeIndex};
use crate::{Entity, Error, Result};

fn shared_value<'t, T: SharedValue>(
    registry: &Registry,
    archetype: &Archetype,
    handles: &[SharedHandle],
    store: &'t SharedStore,
) -> Result<&'t T> {
    let ty = registry.typed::<T>(Category::Shared)?;
    let slot = archetype.shared_slot(ty).ok_or(Error::NoSuchColumn(any::type_name::<T>()))?;
    let value = store.get(ty, handles[slot]).as_any();
    Ok(value.downcast_ref::<T>().expect("shared type matches its registration"))
}

/// Read-only access to the rows of one chunk.
pub struct ChunkView<'t> {
    id:         ChunkId,
    chunk:      &'t Chunk,
    archetype:  &'t Archetype,
    registry:   &'t Registry,
    shared:     &'t SharedStore,
    objects:    &'t ObjectTable,
    base_index: usize,
}

impl<'t> ChunkView<'t> {
    pub(crate) fn new(manager: &'t ArchetypeManager, id: ChunkId, base_index: usize) -> Self {
        Self {
            id,
            chunk: manager.chunk(id),
            archetype: manager.chunk_archetype(id),
            registry: &manager.registry,
            shared: &manager.shared,
            objects: &manager.objects,
            base_index,
        }
    }

    /// The chunk identifier.
    pub fn id(&self) -> ChunkId { self.id }

    /// The archetype of the chunk.
    pub fn archetype(&self) -> &'t Archetype { self.archetype }

    /// The number of rows.
    pub fn len(&self) -> usize { self.chunk.count }

    /// Whether the chunk has no rows. Selected chunks are never empty.
    pub fn is_empty(&self) -> bool { self.chunk.count == 0 }

    /// The number of entities yielded by the same iteration before this chunk.
    pub fn base_index(&self) -> usize { self.base_index }

    /// The entity of each row.
    pub fn entities(&self) -> &'t [Entity] { self.chunk.entities(self.archetype.entity_offset()) }

    /// Whether the chunk stores `ty`.
    pub fn has(&self, ty: TypeIndex) -> bool { self.archetype.has(ty) }

    /// The version at which the column of `ty` was last written.
    pub fn change_version(&self, ty: TypeIndex) -> Option<u32> {
        Some(self.chunk.change_versions[self.archetype.column_index(ty)?])
    }

    /// The plain column of `T`.
    pub fn column<T: 'static>(&self) -> Result<&'t [T]> {
        let ty = self.registry.typed::<T>(Category::Plain)?;
        let column = self.archetype.column(ty).ok_or(Error::NoSuchColumn(any::type_name::<T>()))?;
        // SAFETY: the column is aligned for `T` and its first `count` slots are initialized.
        Ok(unsafe {
            slice::from_raw_parts(
                self.chunk.block.as_ptr().add(column.offset).cast::<T>(),
                self.chunk.count,
            )
        })
    }

    /// The shared value of `T` for all rows of the chunk.
    pub fn shared<T: SharedValue>(&self) -> Result<&'t T> {
        shared_value(self.registry, self.archetype, &self.chunk.shared, self.shared)
    }

    /// The buffer of `T` at `row`.
    pub fn buffer<T: 'static>(&self, row: usize) -> Result<&'t [T]> {
        let ty = self.registry.typed::<T>(Category::Buffer)?;
        let column = self.archetype.column(ty).ok_or(Error::NoSuchColumn(any::type_name::<T>()))?;
        assert!(row < self.chunk.count, "row {row} out of {} rows", self.chunk.count);
        Ok(self.objects.buffer(self.chunk.read_handle(column.offset, row)))
    }

    /// The managed value of `T` at `row`, if it was ever set.
    pub fn managed<T: 'static>(&self, row: usize) -> Result<Option<&'t T>> {
        let ty = self.registry.typed::<T>(Category::Managed)?;
        let column = self.archetype.column(ty).ok_or(Error::NoSuchColumn(any::type_name::<T>()))?;
        assert!(row < self.chunk.count, "row {row} out of {} rows", self.chunk.count);
        Ok(self.objects.managed(self.chunk.read_handle(column.offset, row)))
    }
}

/// Iterates over the chunks selected by a query.
pub struct ChunkIter<'t> {
    manager:    &'t ArchetypeManager,
    ids:        std::vec::IntoIter<ChunkId>,
    base_index: usize,
}

impl<'t> ChunkIter<'t> {
    pub(crate) fn new(manager: &'t ArchetypeManager, ids: Vec<ChunkId>) -> Self {
        Self { manager, ids: ids.into_iter(), base_index: 0 }
    }
}

impl<'t> Iterator for ChunkIter<'t> {
    type Item = ChunkView<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        let view = ChunkView::new(self.manager, id, self.base_index);
        self.base_index += view.len();
        Some(view)
    }

    fn size_hint(&self) -> (usize, Option<usize>) { self.ids.size_hint() }
}

impl ExactSizeIterator for ChunkIter<'_> {}

/// Read-write access to the plain columns of one chunk.
///
/// Each column can be borrowed once, either shared or mutably.
/// Borrowing a column mutably stamps its change version.
pub struct ChunkViewMut<'t> {
    id:             ChunkId,
    block:          *mut u8,
    count:          usize,
    versions:       &'t mut [u32],
    handles:        &'t [SharedHandle],
    archetype:      &'t Archetype,
    registry:       &'t Registry,
    shared:         &'t SharedStore,
    reads:          BitVec,
    writes:         BitVec,
    base_index:     usize,
    system_version: u32,
    _chunk:         PhantomData<&'t mut Chunk>,
}

impl<'t> ChunkViewMut<'t> {
    pub(crate) fn new(
        id: ChunkId,
        chunk: &'t mut Chunk,
        archetype: &'t Archetype,
        registry: &'t Registry,
        shared: &'t SharedStore,
        base_index: usize,
        system_version: u32,
    ) -> Self {
        let Chunk { block, count, change_versions, shared: handles, .. } = chunk;
        let columns = archetype.types.len();
        Self {
            id,
            block: block.as_mut_ptr(),
            count: *count,
            versions: change_versions,
            handles,
            archetype,
            registry,
            shared,
            reads: BitVec::repeat(false, columns),
            writes: BitVec::repeat(false, columns),
            base_index,
            system_version,
            _chunk: PhantomData,
        }
    }

    /// The chunk identifier.
    pub fn id(&self) -> ChunkId { self.id }

    /// The archetype of the chunk.
    pub fn archetype(&self) -> &'t Archetype { self.archetype }

    /// The number of rows.
    pub fn len(&self) -> usize { self.count }

    /// Whether the chunk has no rows.
    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// The number of entities selected by the same query before this chunk.
    pub fn base_index(&self) -> usize { self.base_index }

    /// The entity of each row.
    pub fn entities(&self) -> &'t [Entity] {
        // SAFETY: the entity column is never handed out mutably,
        // and its first `count` slots are initialized.
        unsafe {
            slice::from_raw_parts(
                self.block.add(self.archetype.entity_offset()).cast::<Entity>(),
                self.count,
            )
        }
    }

    fn column_index<T: 'static>(&self) -> Result<(TypeIndex, usize)> {
        let ty = self.registry.typed::<T>(Category::Plain)?;
        let index =
            self.archetype.column_index(ty).ok_or(Error::NoSuchColumn(any::type_name::<T>()))?;
        Ok((ty, index))
    }

    /// Borrows the plain column of `T`.
    pub fn column<T: 'static>(&mut self) -> Result<&'t [T]> {
        let (_, index) = self.column_index::<T>()?;
        if self.writes[index] {
            return Err(Error::ColumnBorrowed(any::type_name::<T>()));
        }
        self.reads.set(index, true);

        let offset = self.archetype.columns[index].offset;
        // SAFETY: the column is aligned for `T`, initialized for `count` rows,
        // and not borrowed mutably.
        Ok(unsafe { slice::from_raw_parts(self.block.add(offset).cast::<T>(), self.count) })
    }

    /// Borrows the plain column of `T` mutably and stamps its change version.
    pub fn column_mut<T: 'static>(&mut self) -> Result<&'t mut [T]> {
        let (ty, index) = self.column_index::<T>()?;
        if ty == TypeIndex::ENTITY {
            return Err(Error::EntityComponent);
        }
        if self.reads[index] || self.writes[index] {
            return Err(Error::ColumnBorrowed(any::type_name::<T>()));
        }
        self.writes.set(index, true);
        self.versions[index] = self.system_version;

        let offset = self.archetype.columns[index].offset;
        // SAFETY: the column is aligned for `T`, initialized for `count` rows,
        // and borrowed at most once; columns never overlap.
        Ok(unsafe { slice::from_raw_parts_mut(self.block.add(offset).cast::<T>(), self.count) })
    }

    /// The shared value of `T` for all rows of the chunk.
    pub fn shared<T: SharedValue>(&self) -> Result<&'t T> {
        shared_value(self.registry, self.archetype, self.handles, self.shared)
    }

    /// The version at which the column of `ty` was last written.
    pub fn change_version(&self, ty: TypeIndex) -> Option<u32> {
        Some(self.versions[self.archetype.column_index(ty)?])
    }
}

impl fmt::Debug for ChunkViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkViewMut")
            .field("id", &self.id)
            .field("len", &self.count)
            .field("base_index", &self.base_index)
            .finish_non_exhaustive()
    }
}
