use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archetype::ArchetypeId;
use crate::chunk::{Block, BlockAllocator, ChunkId};
use crate::tracer::Tracer;
use crate::types::TypeIndex;
use crate::Entity;

/// A structural event observed by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ArchetypeCreated(ArchetypeId),
    ChunkAllocated(ArchetypeId, ChunkId),
    ChunkReleased(ArchetypeId, ChunkId),
    Created(ArchetypeId, usize),
    Destroyed(ArchetypeId, usize),
    Moved(Entity, ArchetypeId, ArchetypeId),
    Migrated(usize),
    DependencyCompleted(TypeIndex),
    BeginExclusive,
    EndExclusive,
}

/// Records every event in order.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    /// Takes the events recorded so far.
    pub fn take(&self) -> Vec<Event> { std::mem::take(&mut *self.events.lock()) }

    fn push(&self, event: Event) { self.events.lock().push(event) }
}

impl Tracer for Recorder {
    fn archetype_created(&self, archetype: ArchetypeId, _types: &[TypeIndex]) {
        self.push(Event::ArchetypeCreated(archetype));
    }

    fn chunk_allocated(&self, archetype: ArchetypeId, chunk: ChunkId) {
        self.push(Event::ChunkAllocated(archetype, chunk));
    }

    fn chunk_released(&self, archetype: ArchetypeId, chunk: ChunkId) {
        self.push(Event::ChunkReleased(archetype, chunk));
    }

    fn entities_created(&self, archetype: ArchetypeId, count: usize) {
        self.push(Event::Created(archetype, count));
    }

    fn entities_destroyed(&self, archetype: ArchetypeId, count: usize) {
        self.push(Event::Destroyed(archetype, count));
    }

    fn entity_moved(&self, entity: Entity, from: ArchetypeId, to: ArchetypeId) {
        self.push(Event::Moved(entity, from, to));
    }

    fn entities_migrated(&self, count: usize) { self.push(Event::Migrated(count)) }

    fn dependency_completed(&self, ty: TypeIndex) { self.push(Event::DependencyCompleted(ty)) }

    fn begin_exclusive_transaction(&self) { self.push(Event::BeginExclusive) }

    fn end_exclusive_transaction(&self) { self.push(Event::EndExclusive) }
}

/// Counts the blocks handed out and returned.
#[derive(Debug, Default, Clone)]
pub struct CountingAllocator {
    pub allocated: Arc<AtomicUsize>,
    pub released:  Arc<AtomicUsize>,
}

impl CountingAllocator {
    /// The number of blocks currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.allocated.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

impl BlockAllocator for CountingAllocator {
    fn allocate(&mut self) -> Box<Block> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        Block::new_boxed()
    }

    fn release(&mut self, block: Box<Block>) {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(block);
    }
}
