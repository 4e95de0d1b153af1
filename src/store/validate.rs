use std::collections::HashMap;

use xias::Xias;

use super::Store;
use crate::chunk::List;
use crate::shared::SharedHandle;

impl Store {
    /// Checks the internal consistency of the store.
    ///
    /// # Panics
    /// Panics with a description of the first violated invariant.
    pub fn validate(&self) {
        let manager = &self.manager;
        let mut holders: HashMap<SharedHandle, u32> = HashMap::new();
        let mut rows = 0;

        for arch in &manager.archetypes {
            let mut count = 0;
            for id in arch.chunks(&manager.chunks) {
                let chunk = manager.chunk(id);
                assert_eq!(chunk.archetype, Some(arch.id), "{id:?} is listed under another archetype");
                assert!(chunk.count > 0, "{id:?} is empty but still attached");
                assert!(chunk.count <= chunk.capacity, "{id:?} exceeds its capacity");
                assert_eq!(chunk.capacity, arch.chunk_capacity);
                assert_eq!(chunk.shared.len(), arch.num_shared);
                assert_eq!(chunk.change_versions.len(), arch.types.len());

                let free = match arch.num_shared {
                    0 => arch.lists[List::Free as usize]
                        .iter(&manager.chunks, List::Free)
                        .any(|free| free == id),
                    _ => arch.shared_free.get(&chunk.shared).map_or(false, |set| set.contains(&id)),
                };
                assert_eq!(free, !chunk.is_full(), "{id:?} free-row membership is stale");

                for (row, &entity) in chunk.entities(arch.entity_offset()).iter().enumerate() {
                    let location = self
                        .entities
                        .location(entity)
                        .unwrap_or_else(|| panic!("{entity:?} in {id:?} is not live"));
                    assert_eq!(location.archetype, arch.id, "{entity:?} has a stale archetype");
                    assert_eq!(location.chunk, id, "{entity:?} has a stale chunk");
                    assert_eq!(location.row.small_int::<usize>(), row, "{entity:?} has a stale row");
                }

                for &handle in chunk.shared.iter() {
                    if handle != SharedHandle::DEFAULT {
                        *holders.entry(handle).or_default() += 1;
                    }
                }
                count += chunk.count;
            }
            assert_eq!(count, arch.entity_count, "{:?} entity count drifted", arch.id);
            rows += count;
        }
        assert_eq!(rows, self.entities.len(), "entity table and chunks disagree");

        for query in &self.queries {
            for &(_, handle) in &query.shared {
                if handle != SharedHandle::DEFAULT {
                    *holders.entry(handle).or_default() += 1;
                }
            }
        }
        for (handle, refcount) in manager.shared.iter() {
            let held = holders.get(&handle).copied().unwrap_or(0);
            assert_eq!(refcount, held, "{handle:?} has {refcount} references but {held} holders");
        }

        for chunk in &manager.chunks {
            if chunk.archetype.is_none() {
                assert_eq!(chunk.count, 0, "pooled chunk has rows");
            }
        }
    }
}
