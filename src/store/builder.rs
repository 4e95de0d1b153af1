use std::sync::Arc;

use super::Store;
use crate::archetype::ArchetypeManager;
use crate::chunk::{BlockAllocator, HeapAllocator};
use crate::dependency::{DependencyTracker, DEFAULT_READ_FENCE_CAPACITY};
use crate::entity::EntityTable;
use crate::tracer::{self, Tracer};
use crate::types::Registry;

/// Configures a [`Store`].
pub struct Builder {
    registry:            Arc<Registry>,
    allocator:           Box<dyn BlockAllocator>,
    tracer:              Arc<dyn Tracer>,
    entity_capacity:     usize,
    read_fence_capacity: usize,
    system_version:      u32,
}

impl Builder {
    /// Starts configuring a store over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            allocator: Box::new(HeapAllocator),
            tracer: Arc::new(tracer::Noop),
            entity_capacity: 0,
            read_fence_capacity: DEFAULT_READ_FENCE_CAPACITY,
            system_version: 1,
        }
    }

    /// Supplies chunk blocks from `allocator` instead of the global heap.
    pub fn allocator(mut self, allocator: impl BlockAllocator + 'static) -> Self {
        self.allocator = Box::new(allocator);
        self
    }

    /// Receives structural events.
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Reserves entity table slots up front.
    pub fn entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    /// The number of read fences kept per type before they are combined.
    ///
    /// # Panics
    /// Panics in [`build`](Self::build) if the capacity is zero.
    pub fn read_fence_capacity(mut self, capacity: usize) -> Self {
        self.read_fence_capacity = capacity;
        self
    }

    /// The initial system version.
    pub fn system_version(mut self, version: u32) -> Self {
        self.system_version = version;
        self
    }

    /// Creates the store.
    pub fn build(self) -> Store {
        let num_types = self.registry.len();
        log::debug!("building store over {num_types} types");
        let manager = ArchetypeManager::new(self.registry, self.allocator, Arc::clone(&self.tracer));
        let deps =
            DependencyTracker::new(num_types, self.read_fence_capacity, Arc::clone(&self.tracer));
        Store {
            manager,
            entities: EntityTable::with_capacity(self.entity_capacity),
            queries: Vec::new(),
            deps,
            system_version: self.system_version,
            tracer: self.tracer,
        }
    }
}
