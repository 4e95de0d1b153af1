//! Fixed-size memory blocks holding the rows of one archetype.
//!
//! A chunk stores its rows as parallel columns (structure of arrays).
//! Column offsets are computed once per archetype,
//! so a chunk itself only carries its block and bookkeeping.

use std::alloc::{self, Layout};
use std::mem::{self, MaybeUninit};

use xias::Xias;

use crate::archetype::ArchetypeId;
use crate::shared::SharedHandle;
use crate::Entity;

pub(crate) mod objects;
pub(crate) mod ops;

/// The total size of a chunk.
pub const CHUNK_SIZE: usize = 16 * 1024;
/// Bytes of each chunk reserved for bookkeeping.
pub const CHUNK_HEADER_SIZE: usize = 64;
/// Bytes of each chunk available to columns.
pub const CHUNK_BUFFER_SIZE: usize = CHUNK_SIZE - CHUNK_HEADER_SIZE;
/// The strictest component alignment supported.
pub const MAX_ALIGN: usize = 64;

/// The column storage of one chunk.
#[repr(C, align(64))]
pub struct Block([MaybeUninit<u8>; CHUNK_BUFFER_SIZE]);

static_assertions::const_assert_eq!(mem::align_of::<Block>(), MAX_ALIGN);
static_assertions::const_assert_eq!(mem::size_of::<Block>(), CHUNK_BUFFER_SIZE);

impl Block {
    /// Allocates an uninitialized block on the heap.
    pub fn new_boxed() -> Box<Self> {
        let layout = Layout::new::<Self>();
        // SAFETY: the layout is non-zero-sized,
        // and uninitialized bytes are a valid `[MaybeUninit<u8>]`.
        unsafe {
            let ptr = alloc::alloc(layout).cast::<Self>();
            if ptr.is_null() {
                alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    pub(crate) fn bytes(&self) -> &[MaybeUninit<u8>] { &self.0 }

    pub(crate) fn bytes_mut(&mut self) -> &mut [MaybeUninit<u8>] { &mut self.0 }

    pub(crate) fn as_ptr(&self) -> *const u8 { self.0.as_ptr().cast() }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 { self.0.as_mut_ptr().cast() }
}

/// Supplies and reclaims chunk blocks.
///
/// The store never assumes a particular allocator;
/// it only requests and releases blocks of [`CHUNK_BUFFER_SIZE`] bytes.
pub trait BlockAllocator: Send + Sync {
    /// Obtains a block. Its contents may be arbitrary.
    fn allocate(&mut self) -> Box<Block>;
    /// Returns a block that is no longer used by any chunk.
    fn release(&mut self, block: Box<Block>);
}

/// Allocates blocks from the global heap.
#[derive(Debug, Default)]
pub struct HeapAllocator;

impl BlockAllocator for HeapAllocator {
    fn allocate(&mut self) -> Box<Block> { Block::new_boxed() }

    fn release(&mut self, block: Box<Block>) { drop(block) }
}

/// Identifies a chunk within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub(crate) u32);

impl ChunkId {
    pub(crate) fn get(self) -> usize { self.0.small_int() }
}

/// The intrusive lists a chunk can be linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum List {
    /// Every chunk of an archetype.
    All  = 0,
    /// Chunks of an archetype without shared columns that have free rows.
    Free = 1,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Link {
    prev: Option<ChunkId>,
    next: Option<ChunkId>,
}

/// Head of an intrusive doubly-linked list of chunks.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ListHead {
    first: Option<ChunkId>,
    last:  Option<ChunkId>,
    len:   usize,
}

impl ListHead {
    pub(crate) fn first(&self) -> Option<ChunkId> { self.first }

    pub(crate) fn len(&self) -> usize { self.len }

    pub(crate) fn push_back(&mut self, chunks: &mut [Chunk], list: List, id: ChunkId) {
        let link = &mut chunks[id.get()].links[list as usize];
        *link = Link { prev: self.last, next: None };
        match self.last {
            Some(last) => chunks[last.get()].links[list as usize].next = Some(id),
            None => self.first = Some(id),
        }
        self.last = Some(id);
        self.len += 1;
    }

    pub(crate) fn unlink(&mut self, chunks: &mut [Chunk], list: List, id: ChunkId) {
        let link = mem::take(&mut chunks[id.get()].links[list as usize]);
        match link.prev {
            Some(prev) => chunks[prev.get()].links[list as usize].next = link.next,
            None => {
                debug_assert_eq!(self.first, Some(id));
                self.first = link.next;
            }
        }
        match link.next {
            Some(next) => chunks[next.get()].links[list as usize].prev = link.prev,
            None => {
                debug_assert_eq!(self.last, Some(id));
                self.last = link.prev;
            }
        }
        self.len -= 1;
    }

    pub(crate) fn iter<'t>(
        &self,
        chunks: &'t [Chunk],
        list: List,
    ) -> impl Iterator<Item = ChunkId> + 't {
        let mut cursor = self.first;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = chunks[id.get()].links[list as usize].next;
            Some(id)
        })
    }
}

/// A chunk and its bookkeeping.
pub struct Chunk {
    pub(crate) block:           Box<Block>,
    /// `None` while the chunk sits in the empty pool.
    pub(crate) archetype:       Option<ArchetypeId>,
    pub(crate) count:           usize,
    pub(crate) capacity:        usize,
    /// Per-column version of the last write, parallel to the archetype's types.
    pub(crate) change_versions: Vec<u32>,
    /// One handle per shared column, in canonical type order.
    pub(crate) shared:          Box<[SharedHandle]>,
    pub(crate) links:           [Link; 2],
    /// Allocation order, unique across the store.
    pub(crate) sequence:        u64,
}

static_assertions::assert_impl_all!(Chunk: Send, Sync);

impl Chunk {
    pub(crate) fn empty(block: Box<Block>) -> Self {
        Self {
            block,
            archetype: None,
            count: 0,
            capacity: 0,
            change_versions: Vec::new(),
            shared: Box::new([]),
            links: Default::default(),
            sequence: 0,
        }
    }

    /// The archetype whose rows are stored here.
    pub fn archetype(&self) -> Option<ArchetypeId> { self.archetype }

    /// The number of occupied rows.
    pub fn len(&self) -> usize { self.count }

    /// Whether no rows are occupied.
    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// The maximum number of rows.
    pub fn capacity(&self) -> usize { self.capacity }

    /// Whether all rows are occupied.
    pub fn is_full(&self) -> bool { self.count == self.capacity }

    /// The shared values of this chunk, in canonical type order of the shared columns.
    pub fn shared_values(&self) -> &[SharedHandle] { &self.shared }

    /// The allocation sequence number.
    pub fn sequence(&self) -> u64 { self.sequence }

    /// The occupied rows of the entity column.
    pub(crate) fn entities(&self, entity_offset: usize) -> &[Entity] {
        // SAFETY: the entity column is 4-aligned, holds `capacity` slots,
        // and the first `count` are initialized.
        unsafe {
            std::slice::from_raw_parts(
                self.block.as_ptr().add(entity_offset).cast::<Entity>(),
                self.count,
            )
        }
    }

    pub(crate) fn write_entity(&mut self, entity_offset: usize, row: usize, entity: Entity) {
        assert!(row < self.capacity, "row {row} out of capacity {}", self.capacity);
        // SAFETY: bounds checked above; the entity column is 4-aligned.
        unsafe {
            self.block
                .as_mut_ptr()
                .add(entity_offset + row * mem::size_of::<Entity>())
                .cast::<Entity>()
                .write(entity)
        }
    }

    pub(crate) fn read_handle(&self, offset: usize, row: usize) -> u32 {
        assert!(row < self.capacity, "row {row} out of capacity {}", self.capacity);
        // SAFETY: handle columns are 4-aligned and initialized for all occupied rows.
        unsafe { self.block.as_ptr().add(offset + row * mem::size_of::<u32>()).cast::<u32>().read() }
    }

    pub(crate) fn write_handle(&mut self, offset: usize, row: usize, handle: u32) {
        assert!(row < self.capacity, "row {row} out of capacity {}", self.capacity);
        // SAFETY: bounds checked above; handle columns are 4-aligned.
        unsafe {
            self.block
                .as_mut_ptr()
                .add(offset + row * mem::size_of::<u32>())
                .cast::<u32>()
                .write(handle)
        }
    }
}
