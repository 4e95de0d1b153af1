use std::sync::Arc;

use super::{ArchetypeId, ArchetypeManager};
use crate::chunk::{HeapAllocator, CHUNK_BUFFER_SIZE};
use crate::shared::SharedHandle;
use crate::test_util::{self, MeshKey, Types};
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

#[test]
fn test_capacity_from_row_size() {
    let (mut manager, types) = manager();
    let id = archetype(&mut manager, &[types.position, types.velocity]);
    assert_eq!(manager.get(id).chunk_capacity(), CHUNK_BUFFER_SIZE / 24);

    let tags = archetype(&mut manager, &[types.enemy, types.mesh]);
    assert_eq!(manager.get(tags).chunk_capacity(), CHUNK_BUFFER_SIZE / 8);
}

#[test]
fn test_oversized_rows() {
    let (mut manager, types) = manager();
    let id = archetype(&mut manager, &[types.blob0]);
    assert_eq!(manager.get(id).chunk_capacity(), 1);

    let sorted = manager.registry.canonicalize(&[types.blob0, types.blob1]).expect("valid list");
    assert_eq!(
        manager.get_or_create(&sorted).map(|_| ()),
        Err(Error::ArchetypeTooLarge { size: 8 + 9000 + 9000 })
    );
}

#[test]
fn test_columns_are_aligned_and_disjoint() {
    let (mut manager, types) = manager();
    let id = archetype(&mut manager, &[types.health, types.matrix, types.position, types.name]);
    let arch = manager.get(id);
    let registry = &manager.registry;

    let first = arch.memory_order()[0];
    assert_eq!(arch.types()[first], types.matrix, "the most aligned column is placed first");

    let mut ranges = Vec::new();
    for column in arch.columns.iter() {
        assert_eq!(column.offset % registry.info(column.ty).column_align(), 0);
        let range = column.range(0, arch.chunk_capacity());
        assert!(range.end <= CHUNK_BUFFER_SIZE);
        if !range.is_empty() {
            ranges.push(range);
        }
    }
    ranges.sort_by_key(|range| range.start);
    assert!(ranges.windows(2).all(|pair| pair[0].end <= pair[1].start), "columns overlap");
}

#[test]
fn test_memory_order_ties_keep_type_order() {
    let (mut manager, types) = manager();
    let id = archetype(&mut manager, &[types.position, types.velocity, types.health]);
    let arch = manager.get(id);
    let registry = &manager.registry;

    let key = |column: usize| registry.info(arch.types()[column]).memory_order;
    let keys: Vec<u64> = arch.memory_order().iter().map(|&column| key(column)).collect();
    assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
    for pair in arch.memory_order().windows(2) {
        if key(pair[0]) == key(pair[1]) {
            assert!(pair[0] < pair[1]);
        }
    }
}

#[test]
fn test_get_or_create_validation() {
    let (mut manager, types) = manager();
    let sorted = manager.registry.canonicalize(&[types.position, types.velocity]).expect("valid");

    assert_eq!(manager.get_or_create(&[]), Err(Error::EmptyArchetype));
    assert_eq!(manager.get_or_create(&sorted[1..]), Err(Error::EntityTypeNotFirst));
    assert_eq!(
        manager.get_or_create(&[TypeIndex::ENTITY, sorted[1], sorted[1]]),
        Err(Error::DuplicateType(sorted[1]))
    );
    assert_eq!(
        manager.get_or_create(&[TypeIndex::ENTITY, sorted[2], sorted[1]]),
        Err(Error::UnsortedTypes)
    );
    let unknown = TypeIndex(manager.registry.len() as u32);
    assert_eq!(
        manager.get_or_create(&[TypeIndex::ENTITY, unknown]),
        Err(Error::InvalidTypeIndex(unknown))
    );
    assert!(manager.archetypes.is_empty(), "failed calls create nothing");

    let (id, created) = manager.get_or_create(&sorted).expect("valid");
    assert!(created);
    assert_eq!(manager.get_or_create(&sorted), Ok((id, false)));
}

#[test]
fn test_flags_follow_types() {
    let (mut manager, types) = manager();
    let disabled = archetype(&mut manager, &[types.position, types.disabled]);
    let prefab = archetype(&mut manager, &[types.position, types.prefab]);
    let cleanup = archetype(&mut manager, &[types.tracked]);
    let counts = archetype(&mut manager, &[types.mesh, types.team, types.waypoints, types.name]);

    assert!(manager.get(disabled).is_disabled());
    assert!(manager.get(prefab).is_prefab());
    assert!(manager.get(cleanup).has_cleanup);
    assert!(!manager.get(cleanup).is_cleanup_residue());

    let arch = manager.get(counts);
    assert_eq!((arch.shared_count(), arch.buffer_count(), arch.managed_count()), (2, 1, 1));
    assert_eq!(arch.shared_types().count(), 2);
    assert!(arch.has(types.mesh));
    assert!(!arch.has(types.position));
}

#[test]
fn test_chunk_acquisition_and_row_counts() {
    let (mut manager, types) = manager();
    let id = archetype(&mut manager, &[types.health]);
    let capacity = manager.get(id).chunk_capacity();

    let first = manager.get_chunk_with_free_row(id, &[], 1);
    assert_eq!(manager.get_chunk_with_free_row(id, &[], 1), first, "the free list is reused");
    assert_eq!(manager.allocate_rows(first, capacity + 5), (0, capacity));
    assert!(manager.chunk(first).is_full());

    let second = manager.get_chunk_with_free_row(id, &[], 1);
    assert_ne!(second, first);
    assert_eq!(manager.allocate_rows(second, 3), (0, 3));
    assert_eq!(manager.get(id).entity_count(), capacity + 3);
    assert_eq!(manager.get(id).chunk_count(), 2);

    manager.set_chunk_row_count(first, capacity - 1);
    assert_eq!(manager.get_chunk_with_free_row(id, &[], 1), second, "the oldest free chunk first");

    manager.set_chunk_row_count(second, 0);
    assert_eq!(manager.empty_chunks(), 1);
    assert_eq!(manager.get(id).chunk_count(), 1);
    assert_eq!(manager.chunk(second).archetype(), None);
    assert_eq!(manager.get_chunk_with_free_row(id, &[], 1), first);

    manager.set_chunk_row_count(first, capacity);
    let reused = manager.get_chunk_with_free_row(id, &[], 2);
    assert_eq!(reused, second, "pooled blocks are reused");
    assert_eq!(manager.empty_chunks(), 0);
    assert!(manager.chunk(reused).sequence() > manager.chunk(first).sequence());
}

#[test]
fn test_shared_chunks_are_keyed_by_values() {
    let (mut manager, types) = manager();
    let id = archetype(&mut manager, &[types.health, types.mesh]);

    let mesh = manager.shared.insert(types.mesh, Box::new(MeshKey(7)));
    assert_ne!(mesh, SharedHandle::DEFAULT);
    assert_eq!(manager.shared.refcount(mesh), 1);

    let keyed = manager.get_chunk_with_free_row(id, &[mesh], 1);
    assert_eq!(manager.shared.refcount(mesh), 2, "the chunk holds a reference");
    let default = manager.get_chunk_with_free_row(id, &[SharedHandle::DEFAULT], 1);
    assert_ne!(keyed, default);
    assert_eq!(manager.get_chunk_with_free_row(id, &[mesh], 1), keyed);

    let arch = manager.get(id);
    assert!(arch.shared_free[&[mesh][..]].contains(&keyed));
    assert!(arch.lists[crate::chunk::List::Free as usize].first().is_none());

    manager.allocate_rows(keyed, 1);
    manager.set_chunk_row_count(keyed, 0);
    assert_eq!(manager.shared.refcount(mesh), 1, "releasing the chunk drops its reference");
    assert!(!manager.get(id).shared_free.contains_key(&[mesh][..]));
}
