use xias::Xias;

use super::Entity;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    source_generation: u32,
    target:            Entity,
}

/// Maps entities of a source store to their copies in a target store.
///
/// Indexed by the source slot; an entry only applies to the generation it was recorded for,
/// so stale or unmigrated references resolve to [`Entity::NULL`].
#[derive(Debug, Default, Clone)]
pub struct EntityRemap {
    entries: Vec<Entry>,
    len:     usize,
}

impl EntityRemap {
    /// Creates an empty remap table.
    pub fn new() -> Self { Self::default() }

    /// Records that `source` now lives as `target`.
    pub(crate) fn insert(&mut self, source: Entity, target: Entity) {
        let index = source.index.small_int::<usize>();
        if self.entries.len() <= index {
            self.entries.resize(index + 1, Entry::default());
        }

        let entry = self.entries.get_mut(index).expect("just resized");
        if entry.source_generation == 0 {
            self.len += 1;
        }
        *entry = Entry { source_generation: source.generation, target };
    }

    /// Resolves a reference to a source entity.
    pub fn remap(&self, source: Entity) -> Entity {
        match self.entries.get(source.index.small_int::<usize>()) {
            Some(entry) if entry.source_generation == source.generation && !source.is_null() => {
                entry.target
            }
            _ => Entity::NULL,
        }
    }

    /// The number of recorded entities.
    pub fn len(&self) -> usize { self.len }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Iterates over `(source, target)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Entity)> + '_ {
        self.entries.iter().enumerate().filter(|(_, entry)| entry.source_generation != 0).map(
            |(index, entry)| {
                (Entity { index: index.small_int(), generation: entry.source_generation }, entry.target)
            },
        )
    }
}
