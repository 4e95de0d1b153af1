use super::{Entity, EntityRemap, EntityTable, Location};
use crate::archetype::ArchetypeId;
use crate::chunk::ChunkId;
use crate::test_util;

const ARCH: ArchetypeId = ArchetypeId(3);
const CHUNK: ChunkId = ChunkId(7);

fn allocate(table: &mut EntityTable, base_row: usize, count: usize) -> Vec<Entity> {
    let mut out = Vec::new();
    table.allocate(ARCH, CHUNK, base_row, count, &mut out);
    out
}

#[test]
fn test_allocate_consecutive_rows() {
    test_util::init();

    let mut table = EntityTable::with_capacity(4);
    let entities = allocate(&mut table, 5, 3);
    log::trace!("allocated {entities:?}");

    assert_eq!(table.len(), 3);
    for (offset, &entity) in entities.iter().enumerate() {
        assert!(table.exists(entity));
        assert_eq!(entity.generation(), 1);
        assert_eq!(
            table.location(entity),
            Some(Location { archetype: ARCH, chunk: CHUNK, row: 5 + offset as u32 })
        );
    }
}

#[test]
fn test_null_never_exists() {
    let mut table = EntityTable::default();
    let entities = allocate(&mut table, 0, 1);
    assert_eq!(entities[0].index(), 0, "slot 0 is handed out first");
    assert!(!table.exists(Entity::NULL));
    assert_eq!(table.location(Entity::NULL), None);
}

#[test]
fn test_free_bumps_generation() {
    let mut table = EntityTable::with_capacity(4);
    let entities = allocate(&mut table, 0, 2);

    table.free(entities[0]);
    assert!(!table.exists(entities[0]));
    assert!(table.exists(entities[1]));
    assert_eq!(table.len(), 1);

    let reused = allocate(&mut table, 9, 1);
    assert_eq!(reused[0].index(), entities[0].index(), "freed slot is reused first");
    assert_eq!(reused[0].generation(), entities[0].generation() + 1);
    assert!(!table.exists(entities[0]), "stale handle stays dead after reuse");
    assert!(table.exists(reused[0]));
}

#[test]
fn test_growth_doubles_and_rethreads() {
    let mut table = EntityTable::with_capacity(16);
    assert_eq!(table.capacity(), 16);

    let first = allocate(&mut table, 0, 16);
    assert_eq!(table.capacity(), 16);
    let second = allocate(&mut table, 16, 1);
    assert_eq!(table.capacity(), 32);
    assert_eq!(second[0].index(), 16);

    let rest = allocate(&mut table, 17, 40);
    assert!(table.capacity() >= 57);
    assert_eq!(table.len(), 57);

    let mut indices: Vec<u32> =
        first.iter().chain(&second).chain(&rest).map(|entity| entity.index()).collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), 57, "no slot is handed out twice");
}

#[test]
#[should_panic = "cannot free nonexistent entity"]
fn test_double_free_panics() {
    let mut table = EntityTable::default();
    let entities = allocate(&mut table, 0, 1);
    table.free(entities[0]);
    table.free(entities[0]);
}

#[test]
fn test_iter_live() {
    let mut table = EntityTable::default();
    let entities = allocate(&mut table, 0, 4);
    table.free_all(&entities[1..3]);

    let live: Vec<Entity> = table.iter().map(|(entity, _)| entity).collect();
    assert_eq!(live, vec![entities[0], entities[3]]);
}

#[test]
fn test_remap_stale_to_null() {
    let mut table = EntityTable::default();
    let sources = allocate(&mut table, 0, 3);
    let targets = [
        Entity { index: 40, generation: 2 },
        Entity { index: 41, generation: 1 },
        Entity { index: 42, generation: 5 },
    ];

    let mut remap = EntityRemap::new();
    for (&source, &target) in sources.iter().zip(&targets) {
        remap.insert(source, target);
    }
    assert_eq!(remap.len(), 3);

    assert_eq!(remap.remap(sources[1]), targets[1]);
    let stale = Entity { generation: sources[1].generation() + 1, ..sources[1] };
    assert_eq!(remap.remap(stale), Entity::NULL);
    assert_eq!(remap.remap(Entity { index: 999, generation: 1 }), Entity::NULL);
    assert_eq!(remap.remap(Entity::NULL), Entity::NULL);

    let pairs: Vec<_> = remap.iter().collect();
    assert_eq!(pairs, sources.iter().copied().zip(targets).collect::<Vec<_>>());
}
