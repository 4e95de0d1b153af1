use xias::Xias;

use super::Entity;
use crate::archetype::ArchetypeId;
use crate::chunk::ChunkId;

/// Terminates the free list.
const NO_FREE: u32 = u32::MAX;

const MIN_CAPACITY: usize = 16;

/// The physical location of a live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// The archetype of the entity.
    pub archetype: ArchetypeId,
    /// The chunk storing the entity.
    pub chunk:     ChunkId,
    /// The row in the chunk.
    pub row:       u32,
}

#[derive(Debug, Clone, Copy)]
struct Row {
    generation: u32,
    archetype:  Option<ArchetypeId>,
    /// `None` marks a free slot.
    chunk:      Option<ChunkId>,
    /// The in-chunk row for live slots, the next free slot otherwise.
    row:        u32,
}

/// Maps entity slots to their generation and location.
///
/// Free slots form a singly-linked list threaded through the row field.
#[derive(Debug)]
pub struct EntityTable {
    rows:      Vec<Row>,
    free_head: u32,
    live:      usize,
}

impl Default for EntityTable {
    fn default() -> Self { Self::with_capacity(MIN_CAPACITY) }
}

impl EntityTable {
    /// Creates a table with room for `capacity` entities before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut table = Self { rows: Vec::new(), free_head: NO_FREE, live: 0 };
        table.grow(capacity.max(1));
        table
    }

    /// Doubles the capacity (or more, if `min_extra` requires),
    /// threading the new tail onto the free list.
    fn grow(&mut self, min_extra: usize) {
        let old = self.rows.len();
        let new = (old * 2).max(old + min_extra).max(MIN_CAPACITY);
        assert!(new < NO_FREE.small_int(), "entity table exhausted the u32 index space");

        self.rows.reserve_exact(new - old);
        for index in old..new {
            let next = if index + 1 < new { (index + 1).small_int() } else { self.free_head };
            self.rows.push(Row { generation: 1, archetype: None, chunk: None, row: next });
        }
        self.free_head = old.small_int();
        log::trace!("entity table grew from {old} to {new}");
    }

    /// The number of live entities.
    pub fn len(&self) -> usize { self.live }

    /// Whether there are no live entities.
    pub fn is_empty(&self) -> bool { self.live == 0 }

    /// The number of slots allocated.
    pub fn capacity(&self) -> usize { self.rows.len() }

    /// Allocates `count` entities stored at consecutive rows from `base_row` of `chunk`.
    pub(crate) fn allocate(
        &mut self,
        archetype: ArchetypeId,
        chunk: ChunkId,
        base_row: usize,
        count: usize,
        out: &mut Vec<Entity>,
    ) {
        out.reserve(count);
        for offset in 0..count {
            if self.free_head == NO_FREE {
                self.grow(count - offset);
            }

            let index = self.free_head;
            let row = &mut self.rows[index.small_int::<usize>()];
            self.free_head = row.row;

            row.archetype = Some(archetype);
            row.chunk = Some(chunk);
            row.row = (base_row + offset).small_int();
            out.push(Entity { index, generation: row.generation });
        }
        self.live += count;
    }

    /// Frees a live entity, bumping its generation.
    ///
    /// # Panics
    /// Panics if the entity does not exist.
    pub(crate) fn free(&mut self, entity: Entity) {
        assert!(self.exists(entity), "cannot free nonexistent entity {entity:?}");

        let row = &mut self.rows[entity.index.small_int::<usize>()];
        row.generation = match row.generation.wrapping_add(1) {
            0 => 1,
            generation => generation,
        };
        row.archetype = None;
        row.chunk = None;
        row.row = self.free_head;
        self.free_head = entity.index;
        self.live -= 1;
    }

    /// Frees every entity in `entities`.
    pub(crate) fn free_all(&mut self, entities: &[Entity]) {
        for &entity in entities {
            self.free(entity);
        }
    }

    /// Whether `entity` is live with a matching generation.
    pub fn exists(&self, entity: Entity) -> bool {
        match self.rows.get(entity.index.small_int::<usize>()) {
            Some(row) => row.chunk.is_some() && row.generation == entity.generation,
            None => false,
        }
    }

    /// Locates a live entity.
    pub fn location(&self, entity: Entity) -> Option<Location> {
        let row = self.rows.get(entity.index.small_int::<usize>())?;
        if row.generation != entity.generation {
            return None;
        }
        Some(Location { archetype: row.archetype?, chunk: row.chunk?, row: row.row })
    }

    /// Moves a live entity.
    pub(crate) fn set_location(&mut self, entity: Entity, location: Location) {
        let row = self.rows.get_mut(entity.index.small_int::<usize>()).expect("entity is live");
        debug_assert_eq!(row.generation, entity.generation);
        row.archetype = Some(location.archetype);
        row.chunk = Some(location.chunk);
        row.row = location.row;
    }

    /// Updates the row of a live entity that stays in the same chunk.
    pub(crate) fn set_row(&mut self, entity: Entity, new_row: usize) {
        let row = self.rows.get_mut(entity.index.small_int::<usize>()).expect("entity is live");
        debug_assert_eq!(row.generation, entity.generation);
        row.row = new_row.small_int();
    }

    /// Iterates over all live entities and their locations.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Location)> + '_ {
        self.rows.iter().enumerate().filter_map(|(index, row)| {
            let entity = Entity { index: index.small_int(), generation: row.generation };
            Some((entity, Location { archetype: row.archetype?, chunk: row.chunk?, row: row.row }))
        })
    }
}
