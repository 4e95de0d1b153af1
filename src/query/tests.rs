use std::sync::Arc;

use super::{did_change, Query, QueryDesc};
use crate::archetype::{ArchetypeId, ArchetypeManager};
use crate::chunk::HeapAllocator;
use crate::test_util::{self, Types};
use crate::tracer::Noop;
use crate::types::TypeIndex;
use crate::Error;

fn manager() -> (ArchetypeManager, Types) {
    let registry = test_util::registry();
    let types = Types::of(&registry);
    (ArchetypeManager::new(registry, Box::new(HeapAllocator), Arc::new(Noop)), types)
}

fn archetype(manager: &mut ArchetypeManager, types: &[TypeIndex]) -> ArchetypeId {
    let sorted = manager.registry.canonicalize(types).expect("valid type list");
    manager.get_or_create(&sorted).expect("valid archetype").0
}

fn matches(manager: &ArchetypeManager, desc: &QueryDesc, id: ArchetypeId) -> bool {
    let query = Query::new(desc, &manager.registry).expect("valid query");
    query.matches(manager.get(id))
}

#[test]
fn test_all_any_none() {
    let (mut manager, types) = manager();
    let moving = archetype(&mut manager, &[types.position, types.velocity]);
    let still = archetype(&mut manager, &[types.position]);
    let enemy = archetype(&mut manager, &[types.position, types.velocity, types.enemy]);

    let desc = QueryDesc::new().all(&[types.position, types.velocity]);
    assert!(matches(&manager, &desc, moving));
    assert!(!matches(&manager, &desc, still));
    assert!(matches(&manager, &desc, enemy));

    let desc = QueryDesc::new().all(&[types.position]).none(&[types.enemy]);
    assert!(matches(&manager, &desc, moving));
    assert!(matches(&manager, &desc, still));
    assert!(!matches(&manager, &desc, enemy));

    let desc = QueryDesc::new().any(&[types.velocity, types.health]);
    assert!(matches(&manager, &desc, moving));
    assert!(!matches(&manager, &desc, still));
}

#[test]
fn test_empty_query_matches_everything_enabled() {
    let (mut manager, types) = manager();
    let plain = archetype(&mut manager, &[types.health]);
    let bare = archetype(&mut manager, &[]);
    let desc = QueryDesc::new();
    assert!(matches(&manager, &desc, plain));
    assert!(matches(&manager, &desc, bare));
}

#[test]
fn test_disabled_and_prefab_are_hidden() {
    let (mut manager, types) = manager();
    let disabled = archetype(&mut manager, &[types.position, types.disabled]);
    let prefab = archetype(&mut manager, &[types.position, types.prefab]);

    let desc = QueryDesc::new().all(&[types.position]);
    assert!(!matches(&manager, &desc, disabled));
    assert!(!matches(&manager, &desc, prefab));

    let desc = QueryDesc::new().all(&[types.position]).include_disabled();
    assert!(matches(&manager, &desc, disabled));
    assert!(!matches(&manager, &desc, prefab));

    let desc = QueryDesc::new().all(&[types.position]).include_prefab();
    assert!(!matches(&manager, &desc, disabled));
    assert!(matches(&manager, &desc, prefab));
}

#[test]
fn test_naming_a_tag_includes_it() {
    let (mut manager, types) = manager();
    let disabled = archetype(&mut manager, &[types.position, types.disabled]);
    let prefab = archetype(&mut manager, &[types.position, types.prefab]);

    let desc = QueryDesc::new().all(&[types.disabled]);
    assert!(matches(&manager, &desc, disabled));

    let desc = QueryDesc::new().any(&[types.prefab, types.health]);
    assert!(matches(&manager, &desc, prefab));

    let desc = QueryDesc::new().none(&[types.disabled]);
    assert!(!matches(&manager, &desc, disabled), "excluding a tag does not include it");
}

#[test]
fn test_unknown_type() {
    let (manager, _) = manager();
    let bogus = TypeIndex(manager.registry.len() as u32);
    assert_eq!(
        Query::new(&QueryDesc::new().all(&[bogus]), &manager.registry).map(|_| ()),
        Err(Error::InvalidTypeIndex(bogus))
    );
}

#[test]
fn test_requires() {
    let (manager, types) = manager();
    let desc = QueryDesc::new().all(&[types.position, types.mesh]).any(&[types.velocity]);
    let query = Query::new(&desc, &manager.registry).expect("valid query");
    assert!(query.requires(types.position));
    assert!(query.requires(types.mesh));
    assert!(!query.requires(types.velocity));

    let mut required: Vec<TypeIndex> = query.required().collect();
    required.sort_unstable();
    let mut expected = vec![types.position, types.mesh];
    expected.sort_unstable();
    assert_eq!(required, expected);
}

#[test]
fn test_did_change() {
    assert!(did_change(5, 4));
    assert!(!did_change(4, 4));
    assert!(!did_change(3, 4));
    assert!(did_change(0, 4), "unknown versions always count as changed");
    assert!(did_change(3, 0), "version 0 matches everything");
}

#[test]
fn test_did_change_wraps() {
    assert!(did_change(2, u32::MAX - 1));
    assert!(!did_change(u32::MAX - 1, 2));
}
