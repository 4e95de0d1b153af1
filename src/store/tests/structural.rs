use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{location, position};
use crate::chunk::ChunkId;
use crate::query::QueryDesc;
use crate::test_util::{
    self, CountingAllocator, Event, MeshKey, Name, Position, Recorder, Tracked, Velocity, Waypoint,
};
use crate::types::TypeIndex;
use crate::{Entity, Error, Store};

#[test]
fn test_create_entities_in_one_chunk() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let entities = store.create_entities(&[types.position], 3).expect("valid types");
    let arch = store.find_archetype(&[types.position]).expect("valid types").expect("created");
    assert_eq!(store.archetype(arch).expect("live archetype").entity_count(), 3);

    let chunk = location(&store, entities[0]).chunk;
    for (row, &entity) in entities.iter().enumerate() {
        assert_eq!(location(&store, entity).chunk, chunk);
        assert_eq!(location(&store, entity).row, row as u32);
    }
    assert_eq!(store.chunk(chunk).expect("chunk in use").len(), 3);
    store.validate();
}

#[test]
fn test_remove_fills_hole_with_last_row() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let entities = store.create_entities(&[types.position], 3).expect("valid types");
    for (i, &entity) in entities.iter().enumerate() {
        store.set(entity, position(i as f32)).expect("entity has position");
    }
    let chunk = location(&store, entities[0]).chunk;

    store.remove_component(entities[0], types.position).expect("entity is live");

    let bare = store.find_archetype(&[]).expect("valid types").expect("created by removal");
    assert_eq!(store.archetype_of(entities[0]), Ok(bare));
    assert_eq!(store.chunk(chunk).expect("chunk in use").len(), 2);
    assert_eq!(location(&store, entities[2]).row, 0, "the last row moved into the hole");
    assert_eq!(store.get::<Position>(entities[2]), Ok(&position(2.)));
    assert_eq!(store.get::<Position>(entities[1]), Ok(&position(1.)));
    store.validate();
}

#[test]
fn test_add_component_keeps_values() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let entity = store.create_entity(&[types.position]).expect("valid types");
    store.set(entity, position(4.)).expect("entity has position");
    store.add_component(entity, types.velocity).expect("entity is live");

    assert_eq!(store.has_component(entity, types.velocity), Ok(true));
    assert_eq!(store.get::<Position>(entity), Ok(&position(4.)));
    assert_eq!(store.get::<Velocity>(entity), Ok(&Velocity::default()));

    let arch = store.archetype_of(entity).expect("entity is live");
    store.add_component(entity, types.velocity).expect("adding twice is allowed");
    assert_eq!(store.archetype_of(entity), Ok(arch));
    store.validate();
}

#[test]
fn test_add_and_remove_several() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let entity = store.create_entity(&[types.position]).expect("valid types");
    let types_to_add = [types.health, types.enemy, types.health];
    store.add_components(entity, &types_to_add).expect("entity is live");
    let expected =
        store.find_archetype(&[types.enemy, types.position, types.health]).expect("valid types");
    assert_eq!(Some(store.archetype_of(entity).expect("entity is live")), expected);

    store.remove_components(entity, &[types.position, types.enemy, types.velocity]).expect("live");
    let expected = store.find_archetype(&[types.health]).expect("valid types");
    assert_eq!(Some(store.archetype_of(entity).expect("entity is live")), expected);
    store.validate();
}

#[test]
fn test_edges_are_cached() {
    let (mut store, types) = test_util::store();
    let entity = store.create_entity(&[types.position]).expect("valid types");
    let source = store.archetype_of(entity).expect("entity is live");

    store.add_component(entity, types.health).expect("entity is live");
    let target = store.archetype_of(entity).expect("entity is live");
    let source_arch = store.archetype(source).expect("live archetype");
    assert_eq!(source_arch.add_edges.get(&types.health), Some(&target));
    let target_arch = store.archetype(target).expect("live archetype");
    assert_eq!(target_arch.remove_edges.get(&types.health), Some(&source));

    store.remove_component(entity, types.health).expect("entity is live");
    assert_eq!(store.archetype_of(entity), Ok(source));
}

#[test]
fn test_entity_component_is_reserved() {
    let (mut store, types) = test_util::store();
    let entity = store.create_entity(&[types.position]).expect("valid types");

    assert_eq!(store.add_component(entity, TypeIndex::ENTITY), Err(Error::EntityComponent));
    assert_eq!(store.remove_component(entity, TypeIndex::ENTITY), Err(Error::EntityComponent));
    assert_eq!(store.set(entity, Entity::NULL), Err(Error::EntityComponent));
}

#[test]
fn test_create_rejects_duplicates() {
    let (mut store, types) = test_util::store();
    assert_eq!(
        store.create_entity(&[types.position, types.velocity, types.position]),
        Err(Error::DuplicateType(types.position))
    );
    assert_eq!(
        store.get_or_create_archetype(&[TypeIndex::ENTITY, TypeIndex::ENTITY, types.position]),
        Err(Error::DuplicateType(TypeIndex::ENTITY))
    );
    assert_eq!(store.entity_count(), 0);
    assert_eq!(store.archetypes().count(), 0);
}

#[test]
fn test_create_rejects_oversized_rows() {
    let (mut store, types) = test_util::store();
    assert!(matches!(
        store.create_entity(&[types.blob0, types.blob1]),
        Err(Error::ArchetypeTooLarge { .. })
    ));
    assert_eq!(store.entity_count(), 0);
}

#[test]
fn test_archetype_determinism() {
    let (mut store, types) = test_util::store();
    let a = store.get_or_create_archetype(&[types.velocity, types.position]).expect("valid types");
    let b = store.get_or_create_archetype(&[types.position, types.velocity]).expect("valid types");
    let c = store
        .get_or_create_archetype(&[types.velocity, TypeIndex::ENTITY, types.position])
        .expect("valid types");
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(store.archetypes().count(), 1);
}

#[test]
fn test_destroy_stale_entity() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let entity = store.create_entity(&[types.position]).expect("valid types");
    store.destroy_entity(entity).expect("entity is live");
    assert!(!store.exists(entity));
    assert_eq!(store.destroy_entity(entity), Err(Error::EntityNotFound(entity)));
    assert_eq!(store.get::<Position>(entity), Err(Error::EntityNotFound(entity)));

    let recycled = store.create_entity(&[types.position]).expect("valid types");
    assert_eq!(recycled.index(), entity.index());
    assert_ne!(recycled.generation(), entity.generation());
    assert!(!store.exists(entity));
    assert!(store.exists(recycled));
    store.validate();
}

#[test]
fn test_destroy_entities_checks_all_first() {
    let (mut store, types) = test_util::store();
    let entities = store.create_entities(&[types.position], 2).expect("valid types");
    store.destroy_entity(entities[1]).expect("entity is live");

    assert_eq!(store.destroy_entities(&entities), Err(Error::EntityNotFound(entities[1])));
    assert!(store.exists(entities[0]));

    store.destroy_entities(&[entities[0], entities[0]]).expect("duplicates are tolerated");
    assert_eq!(store.entity_count(), 0);
    store.validate();
}

#[test]
fn test_cleanup_residue() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let entity = store.create_entity(&[types.position, types.tracked]).expect("valid types");
    store.set(entity, Tracked(7)).expect("entity has tracked");
    store.destroy_entity(entity).expect("entity is live");

    assert!(store.exists(entity), "cleanup components keep the entity alive");
    let arch = store.archetype_of(entity).expect("entity is live");
    assert!(store.archetype(arch).expect("live archetype").is_cleanup_residue());
    assert_eq!(store.has_component(entity, types.position), Ok(false));
    assert_eq!(store.get::<Tracked>(entity), Ok(&Tracked(7)));

    store.destroy_entity(entity).expect("destroying a residue is a no-op");
    assert!(store.exists(entity));

    store.remove_component(entity, types.tracked).expect("entity is live");
    assert!(!store.exists(entity));
    assert_eq!(store.entity_count(), 0);
    store.validate();
}

#[test]
fn test_cleanup_tag_residue() {
    let (mut store, types) = test_util::store();

    let entity = store.create_entity(&[types.enemy, types.spawned]).expect("valid types");
    store.destroy_entity(entity).expect("entity is live");
    assert_eq!(store.has_component(entity, types.spawned), Ok(true));
    assert_eq!(store.has_component(entity, types.enemy), Ok(false));

    store.remove_components(entity, &[types.spawned]).expect("entity is live");
    assert!(!store.exists(entity));
    store.validate();
}

#[test]
fn test_instantiate() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let prefab = store
        .create_entity(&[types.position, types.prefab, types.tracked, types.waypoints, types.name])
        .expect("valid types");
    store.set(prefab, position(3.)).expect("prefab has position");
    store.buffer_mut::<Waypoint>(prefab).expect("prefab has waypoints").push(Waypoint {
        cost:   5,
        target: prefab,
    });
    *store.managed_mut::<Name>(prefab).expect("prefab has name") = Name("orc".into());

    let copies = store.instantiate(prefab, 3).expect("prefab is live");
    assert_eq!(copies.len(), 3);
    for &copy in &copies {
        assert_eq!(store.has_component(copy, types.prefab), Ok(false));
        assert_eq!(store.has_component(copy, types.tracked), Ok(false));
        assert_eq!(store.get::<Position>(copy), Ok(&position(3.)));
        assert_eq!(store.buffer::<Waypoint>(copy).expect("copy has waypoints").len(), 1);
        assert_eq!(store.managed::<Name>(copy), Ok(Some(&Name("orc".into()))));
    }

    store.buffer_mut::<Waypoint>(copies[0]).expect("copy has waypoints").clear();
    assert_eq!(store.buffer::<Waypoint>(prefab).expect("prefab has waypoints").len(), 1);
    assert_eq!(store.buffer::<Waypoint>(copies[1]).expect("copy has waypoints").len(), 1);
    store.validate();
}

#[test]
fn test_instantiate_spans_chunks() {
    let (mut store, types) = test_util::store();
    let prefab = store.create_entity(&[types.position, types.prefab]).expect("valid types");
    store.set(prefab, position(1.)).expect("prefab has position");

    let copies = store.instantiate(prefab, 2500).expect("prefab is live");
    let arch = store.archetype_of(copies[0]).expect("copy is live");
    let arch = store.archetype(arch).expect("live archetype");
    assert_eq!(arch.entity_count(), 2500);
    assert_eq!(arch.chunk_count(), 3);
    assert!(copies.iter().all(|&copy| store.get::<Position>(copy) == Ok(&position(1.))));
    store.validate();
}

#[test]
fn test_set_shared_regroups_chunks() {
    test_util::init();
    let (mut store, types) = test_util::store();

    let entities = store.create_entities(&[types.position, types.mesh], 2).expect("valid types");
    let (a, b) = (entities[0], entities[1]);

    store.set_shared(a, MeshKey(1)).expect("entity has mesh");
    assert_ne!(location(&store, a).chunk, location(&store, b).chunk);
    assert_eq!(store.get_shared::<MeshKey>(a), Ok(&MeshKey(1)));
    assert_eq!(store.get_shared::<MeshKey>(b), Ok(&MeshKey::default()));

    let chunk = location(&store, a).chunk;
    let handle = store.chunk(chunk).expect("chunk in use").shared_values()[0];
    assert_eq!(store.shared_values().refcount(handle), 1);

    store.set_shared(b, MeshKey(1)).expect("entity has mesh");
    assert_eq!(location(&store, b).chunk, chunk);
    assert_eq!(store.shared_values().refcount(handle), 1, "one chunk holds the value");
    assert_eq!(store.empty_chunk_count(), 1, "the default chunk was released");

    store.set_shared(a, MeshKey(2)).expect("entity has mesh");
    store.set_shared(b, MeshKey(2)).expect("entity has mesh");
    assert_eq!(store.shared_values().len(), 1, "the first value was released");
    store.validate();
}

#[test]
fn test_set_shared_requires_component() {
    let (mut store, types) = test_util::store();
    let entity = store.create_entity(&[types.position]).expect("valid types");
    assert!(matches!(
        store.set_shared(entity, MeshKey(1)),
        Err(Error::MissingComponent { entity: e, .. }) if e == entity
    ));
    assert_eq!(store.shared_values().len(), 0);
}

#[test]
fn test_destroy_query() {
    let (mut store, types) = test_util::store();
    store.create_entities(&[types.position], 5).expect("valid types");
    let tracked = store.create_entities(&[types.position, types.tracked], 3).expect("valid types");
    let other = store.create_entity(&[types.velocity]).expect("valid types");

    let query = store
        .create_query(&QueryDesc::new().all(&[types.position]))
        .expect("valid query");
    store.destroy_query(query).expect("valid query");

    assert_eq!(store.query_entity_count(query), Ok(0));
    assert_eq!(store.entity_count(), 4, "residues and unmatched entities survive");
    assert!(tracked.iter().all(|&entity| store.exists(entity)));
    assert!(store.exists(other));
    store.validate();
}

#[test]
fn test_query_wide_changes() {
    let (mut store, types) = test_util::store();
    store.create_entities(&[types.position], 4).expect("valid types");
    store.create_entities(&[types.position, types.velocity], 2).expect("valid types");

    let query = store
        .create_query(&QueryDesc::new().all(&[types.position]).none(&[types.enemy]))
        .expect("valid query");
    store.add_component_to_query(query, types.enemy).expect("valid query");
    assert_eq!(store.query_entity_count(query), Ok(0));

    let enemies = store
        .create_query(&QueryDesc::new().all(&[types.enemy]))
        .expect("valid query");
    assert_eq!(store.query_entity_count(enemies), Ok(6));

    store.remove_component_from_query(enemies, types.enemy).expect("valid query");
    assert_eq!(store.query_entity_count(query), Ok(6));
    store.validate();
}

#[test]
fn test_structural_events() {
    let registry = test_util::registry();
    let types = test_util::Types::of(&registry);
    let recorder = Arc::new(Recorder::default());
    let mut store = Store::builder(registry).tracer(recorder.clone()).build();

    let entity = store.create_entity(&[types.position]).expect("valid types");
    let arch = store.archetype_of(entity).expect("entity is live");
    assert_eq!(
        recorder.take(),
        vec![
            Event::ArchetypeCreated(arch),
            Event::ChunkAllocated(arch, ChunkId(0)),
            Event::Created(arch, 1),
        ]
    );

    store.add_component(entity, types.enemy).expect("entity is live");
    let moved = store.archetype_of(entity).expect("entity is live");
    assert_eq!(
        recorder.take(),
        vec![
            Event::ArchetypeCreated(moved),
            Event::ChunkAllocated(moved, ChunkId(1)),
            Event::ChunkReleased(arch, ChunkId(0)),
            Event::Moved(entity, arch, moved),
        ]
    );

    store.destroy_entity(entity).expect("entity is live");
    assert_eq!(
        recorder.take(),
        vec![Event::ChunkReleased(moved, ChunkId(1)), Event::Destroyed(moved, 1)]
    );
}

#[test]
fn test_blocks_return_to_allocator() {
    let registry = test_util::registry();
    let types = test_util::Types::of(&registry);
    let allocator = CountingAllocator::default();
    let mut store = Store::builder(registry).allocator(allocator.clone()).build();

    let entities = store.create_entities(&[types.position], 2000).expect("valid types");
    assert_eq!(allocator.outstanding(), 2);

    store.destroy_entities(&entities).expect("entities are live");
    assert_eq!(store.empty_chunk_count(), 2);
    assert_eq!(allocator.outstanding(), 2, "empty chunks are pooled");

    store.create_entities(&[types.velocity], 10).expect("valid types");
    assert_eq!(allocator.outstanding(), 2, "pooled blocks are reused");
    assert_eq!(store.empty_chunk_count(), 1);

    drop(store);
    assert_eq!(allocator.outstanding(), 0);
}

/// Applies random structural changes and checks every invariant after each step.
#[test]
fn test_random_structural_changes() {
    test_util::init();
    let (mut store, types) = test_util::store();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let optional = [types.velocity, types.health, types.enemy, types.mesh, types.waypoints];
    let mut live: Vec<Entity> = Vec::new();

    for step in 0..400 {
        match rng.gen_range(0..6) {
            0 | 1 => {
                let ty = optional[rng.gen_range(0..optional.len())];
                let count = rng.gen_range(1..40);
                live.extend(store.create_entities(&[types.position, ty], count).expect("valid"));
            }
            2 if !live.is_empty() => {
                let entity = live.swap_remove(rng.gen_range(0..live.len()));
                store.destroy_entity(entity).expect("entity is live");
            }
            3 if !live.is_empty() => {
                let entity = live[rng.gen_range(0..live.len())];
                let ty = optional[rng.gen_range(0..optional.len())];
                store.add_component(entity, ty).expect("entity is live");
            }
            4 if !live.is_empty() => {
                let entity = live[rng.gen_range(0..live.len())];
                let ty = optional[rng.gen_range(0..optional.len())];
                store.remove_component(entity, ty).expect("entity is live");
            }
            5 if !live.is_empty() => {
                let entity = live[rng.gen_range(0..live.len())];
                if store.has_component(entity, types.mesh) == Ok(true) {
                    store.set_shared(entity, MeshKey(rng.gen_range(0..3))).expect("has mesh");
                }
            }
            _ => {}
        }

        if step % 20 == 0 {
            store.validate();
        }
    }

    store.validate();
    assert_eq!(store.entity_count(), live.len());
    assert!(live.iter().all(|&entity| store.exists(entity)));
}
