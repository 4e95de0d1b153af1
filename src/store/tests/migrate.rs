use super::{position, store_pair};
use crate::query::QueryDesc;
use crate::test_util::{self, MeshKey, Name, Position, Target, Waypoint};
use crate::{Entity, Error, Store};

/// Creates a hunter targeting a waypoint-following scout, and returns both.
fn populate(store: &mut Store, types: &test_util::Types) -> (Entity, Entity) {
    let hunter =
        store.create_entity(&[types.position, types.target, types.mesh]).expect("valid types");
    let scout =
        store.create_entity(&[types.position, types.waypoints, types.name]).expect("valid types");

    store.set(hunter, position(1.)).expect("hunter has position");
    store.set(hunter, Target { range: 5., entity: scout }).expect("hunter has target");
    store.set_shared(hunter, MeshKey(3)).expect("hunter has mesh");
    store.set(scout, position(2.)).expect("scout has position");
    let waypoints = store.buffer_mut::<Waypoint>(scout).expect("scout has waypoints");
    waypoints.push(Waypoint { cost: 7, target: hunter });
    store.managed_mut::<Name>(scout).expect("scout has name").0.push_str("scout");
    (hunter, scout)
}

fn assert_population(store: &Store, hunter: Entity, scout: Entity) {
    assert_eq!(store.get::<Position>(hunter), Ok(&position(1.)));
    assert_eq!(store.get::<Target>(hunter), Ok(&Target { range: 5., entity: scout }));
    assert_eq!(store.get_shared::<MeshKey>(hunter), Ok(&MeshKey(3)));
    assert_eq!(store.get::<Position>(scout), Ok(&position(2.)));
    assert_eq!(store.buffer::<Waypoint>(scout), Ok(&[Waypoint { cost: 7, target: hunter }][..]));
    assert_eq!(store.managed::<Name>(scout), Ok(Some(&Name("scout".into()))));
}

#[test]
fn test_move_round_trip() {
    test_util::init();
    let (mut first, mut second, types) = store_pair();
    let (hunter, scout) = populate(&mut first, &types);

    let remap = second.move_entities_from(&mut first).expect("same registry");
    assert_eq!(remap.len(), 2);
    assert_eq!(first.entity_count(), 0);
    assert!(!first.exists(hunter));
    assert!(first.shared_values().is_empty(), "the source released its shared values");
    assert_eq!(first.manager.objects.len(), 0);

    let (hunter2, scout2) = (remap.remap(hunter), remap.remap(scout));
    assert!(second.exists(hunter2) && second.exists(scout2));
    assert_population(&second, hunter2, scout2);
    assert_eq!(second.manager.objects.len(), 2);
    second.validate();
    first.validate();

    let back = first.move_entities_from(&mut second).expect("same registry");
    let (hunter3, scout3) = (back.remap(hunter2), back.remap(scout2));
    assert_population(&first, hunter3, scout3);
    assert_eq!(second.entity_count(), 0);
    assert!(second.shared_values().is_empty());
    first.validate();
    second.validate();
}

#[test]
fn test_move_into_populated_store() {
    let (mut first, mut second, types) = store_pair();
    let (hunter, scout) = populate(&mut first, &types);
    let resident = second.create_entities(&[types.position], 4).expect("valid types");

    let remap = second.move_entities_from(&mut first).expect("same registry");
    assert_eq!(second.entity_count(), 6);
    for &entity in &resident {
        assert_eq!(second.get::<Position>(entity), Ok(&Position::default()));
    }
    assert_population(&second, remap.remap(hunter), remap.remap(scout));
    second.validate();
}

#[test]
fn test_registry_mismatch() {
    let (mut first, types) = test_util::store();
    let (mut second, _) = test_util::store();
    let entity = first.create_entity(&[types.position]).expect("valid types");

    assert_eq!(second.move_entities_from(&mut first).map(|_| ()), Err(Error::RegistryMismatch));
    assert_eq!(
        second.copy_entities_from(&first, &[entity]).map(|_| ()),
        Err(Error::RegistryMismatch)
    );
    assert!(first.exists(entity));
    assert_eq!(second.entity_count(), 0);
}

#[test]
fn test_move_query() {
    test_util::init();
    let (mut first, mut second, types) = store_pair();
    let friends = first.create_entities(&[types.position], 3).expect("valid types");
    let enemies = first.create_entities(&[types.position, types.enemy], 2).expect("valid types");
    let query = first.create_query(&QueryDesc::new().all(&[types.enemy])).expect("valid query");

    let remap = second.move_query_from(&mut first, query).expect("same registry");
    assert_eq!(remap.len(), 2);
    assert_eq!(first.entity_count(), 3);
    assert!(friends.iter().all(|&entity| first.exists(entity)));
    assert!(enemies.iter().all(|&entity| !first.exists(entity)));
    assert!(enemies
        .iter()
        .all(|&entity| second.has_component(remap.remap(entity), types.enemy) == Ok(true)));
    assert_eq!(first.query_entity_count(query), Ok(0));
    first.validate();
    second.validate();
}

#[test]
fn test_copy_entities() {
    test_util::init();
    let (mut first, mut second, types) = store_pair();
    let (hunter, scout) = populate(&mut first, &types);

    let remap = second.copy_entities_from(&first, &[hunter, scout]).expect("same registry");
    assert_population(&second, remap.remap(hunter), remap.remap(scout));
    assert_population(&first, hunter, scout);
    assert_eq!(first.entity_count(), 2);
    first.validate();
    second.validate();
}

#[test]
fn test_copy_nulls_outside_references() {
    test_util::init();
    let (mut first, mut second, types) = store_pair();
    let (hunter, scout) = populate(&mut first, &types);

    let remap = second.copy_entities_from(&first, &[hunter, hunter]).expect("same registry");
    assert_eq!(remap.len(), 1, "duplicates are copied once");
    assert_eq!(second.entity_count(), 1);

    let copy = remap.remap(hunter);
    assert_eq!(second.get::<Target>(copy), Ok(&Target { range: 5., entity: Entity::NULL }));
    assert_eq!(first.get::<Target>(hunter), Ok(&Target { range: 5., entity: scout }));
    assert_eq!(second.get_shared::<MeshKey>(copy), Ok(&MeshKey(3)));
    assert_eq!(first.shared_values().len(), 1);
    assert_eq!(second.shared_values().len(), 1);
}

#[test]
fn test_copy_missing_entity() {
    let (mut first, mut second, types) = store_pair();
    let entity = first.create_entity(&[types.position]).expect("valid types");
    first.destroy_entity(entity).expect("entity is live");

    assert_eq!(
        second.copy_entities_from(&first, &[entity]).map(|_| ()),
        Err(Error::EntityNotFound(entity))
    );
    assert_eq!(second.entity_count(), 0);
}
