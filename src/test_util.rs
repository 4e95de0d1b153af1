//! Fixtures shared by unit tests and benchmarks.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Once;

use crate::types::{Registry, TypeIndex};
use crate::Store;

mod components;
pub use components::*;

mod overlap;
pub use overlap::Overlap;

mod recorder;
pub use recorder::{CountingAllocator, Event, Recorder};

pub(crate) fn init() {
    static SET_LOGGER_ONCE: Once = Once::new();
    SET_LOGGER_ONCE.call_once(env_logger::init);
}

/// Builds a dedicated pool, so that blocking tests do not depend on the machine's core count.
pub fn thread_pool(threads: usize) -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new().num_threads(threads).build().expect("failed to build thread pool")
}

/// Builds a registry containing every test component.
pub fn registry() -> Arc<Registry> {
    let mut builder = Registry::builder();
    builder.plain::<Position>();
    builder.plain::<Velocity>();
    builder.plain::<Health>();
    builder.plain::<Matrix>();
    builder.plain::<Target>().entity_refs(&[std::mem::offset_of!(Target, entity)]);
    builder.plain::<Tracked>().cleanup();
    builder.plain::<Blob<0>>();
    builder.plain::<Blob<1>>();
    builder.tag::<Enemy>();
    builder.tag::<Spawned>().cleanup();
    builder.shared::<MeshKey>();
    builder.shared::<Team>();
    builder.buffer::<Waypoint>().entity_refs(&[std::mem::offset_of!(Waypoint, target)]);
    builder.managed::<Name>();
    Arc::new(builder.build().expect("test registry is valid"))
}

/// Type indices of the test components.
#[derive(Debug, Clone, Copy)]
pub struct Types {
    pub position:  TypeIndex,
    pub velocity:  TypeIndex,
    pub health:    TypeIndex,
    pub matrix:    TypeIndex,
    pub target:    TypeIndex,
    pub tracked:   TypeIndex,
    pub blob0:     TypeIndex,
    pub blob1:     TypeIndex,
    pub enemy:     TypeIndex,
    pub spawned:   TypeIndex,
    pub mesh:      TypeIndex,
    pub team:      TypeIndex,
    pub waypoints: TypeIndex,
    pub name:      TypeIndex,
    pub disabled:  TypeIndex,
    pub prefab:    TypeIndex,
}

impl Types {
    pub fn of(registry: &Registry) -> Self {
        let index = |result: crate::Result<TypeIndex>| result.expect("registered in test registry");
        Self {
            position:  index(registry.index_of::<Position>()),
            velocity:  index(registry.index_of::<Velocity>()),
            health:    index(registry.index_of::<Health>()),
            matrix:    index(registry.index_of::<Matrix>()),
            target:    index(registry.index_of::<Target>()),
            tracked:   index(registry.index_of::<Tracked>()),
            blob0:     index(registry.index_of::<Blob<0>>()),
            blob1:     index(registry.index_of::<Blob<1>>()),
            enemy:     index(registry.index_of::<Enemy>()),
            spawned:   index(registry.index_of::<Spawned>()),
            mesh:      index(registry.index_of::<MeshKey>()),
            team:      index(registry.index_of::<Team>()),
            waypoints: index(registry.index_of::<Waypoint>()),
            name:      index(registry.index_of::<Name>()),
            disabled:  registry.disabled(),
            prefab:    registry.prefab(),
        }
    }
}

/// Creates an empty store over the test registry.
pub fn store() -> (Store, Types) {
    let registry = registry();
    let types = Types::of(&registry);
    (Store::new(registry), types)
}
