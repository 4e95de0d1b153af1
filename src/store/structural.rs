//! Structural changes: everything that changes which archetype an entity belongs to.
//!
//! Each change allocates a row in the destination chunk, converts the source row into it,
//! then swap-removes the source row so that every chunk stays packed.

use std::any;

use xias::Xias;

use super::Store;
use crate::archetype::ArchetypeId;
use crate::entity::Location;
use crate::query::QueryId;
use crate::shared::{SharedHandle, SharedValue};
use crate::types::{Category, TypeIndex};
use crate::{Entity, Error, Result};

impl Store {
    /// Creates an entity with the given types, in any order.
    /// Plain components start at their default values.
    pub fn create_entity(&mut self, types: &[TypeIndex]) -> Result<Entity> {
        self.ensure_not_exclusive()?;
        let mut out = Vec::with_capacity(1);
        self.create_in(types, 1, &mut out)?;
        Ok(out[0])
    }

    /// Creates `count` entities with the given types, in any order.
    pub fn create_entities(&mut self, types: &[TypeIndex], count: usize) -> Result<Vec<Entity>> {
        self.ensure_not_exclusive()?;
        let mut out = Vec::with_capacity(count);
        self.create_in(types, count, &mut out)?;
        Ok(out)
    }

    pub(crate) fn create_in(
        &mut self,
        types: &[TypeIndex],
        count: usize,
        out: &mut Vec<Entity>,
    ) -> Result<()> {
        let sorted = self.registry().canonicalize(types)?;
        let arch = self.archetype_for(&sorted)?;
        let shared = vec![SharedHandle::DEFAULT; self.manager.get(arch).shared_count()];
        self.complete_archetype(arch);

        let version = self.system_version;
        let entity_offset = self.manager.get(arch).entity_offset();
        let mut remaining = count;
        while remaining > 0 {
            let chunk = self.manager.get_chunk_with_free_row(arch, &shared, version);
            let (base, allocated) = self.manager.allocate_rows(chunk, remaining);
            let start = out.len();
            self.entities.allocate(arch, chunk, base, allocated, out);
            self.manager.init_rows(chunk, base..base + allocated, version);

            let chunk = &mut self.manager.chunks[chunk.get()];
            for (row, &entity) in (base..).zip(&out[start..]) {
                chunk.write_entity(entity_offset, row, entity);
            }
            remaining -= allocated;
        }

        log::trace!("created {count} entities in {arch:?}");
        self.tracer.entities_created(arch, count);
        Ok(())
    }

    /// Destroys an entity.
    ///
    /// An entity with cleanup components is moved to a cleanup residue instead,
    /// keeping only those components until they are all removed.
    /// Destroying a residue again does nothing.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        self.ensure_not_exclusive()?;
        let location = self.location(entity)?;
        self.destroy_at(entity, location)
    }

    /// Destroys all given entities.
    ///
    /// Fails without destroying anything if any of them does not exist.
    pub fn destroy_entities(&mut self, entities: &[Entity]) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.destroy_all(entities)
    }

    pub(crate) fn destroy_all(&mut self, entities: &[Entity]) -> Result<()> {
        if let Some(&missing) = entities.iter().find(|&&entity| !self.entities.exists(entity)) {
            return Err(Error::EntityNotFound(missing));
        }

        for &entity in entities {
            // duplicates are already gone
            if let Some(location) = self.entities.location(entity) {
                self.destroy_at(entity, location)?;
            }
        }
        Ok(())
    }

    fn destroy_at(&mut self, entity: Entity, location: Location) -> Result<()> {
        let arch = self.manager.get(location.archetype);
        if arch.residue && arch.has_cleanup {
            return Ok(());
        }

        if arch.has_cleanup {
            let residue = self.cleanup_form(location.archetype)?;
            self.move_entity(entity, location, residue);
            log::trace!("{entity:?} is kept as a cleanup residue");
            return Ok(());
        }

        self.complete_archetype(location.archetype);
        self.free_entity(entity, location);
        self.tracer.entities_destroyed(location.archetype, 1);
        Ok(())
    }

    /// Destroys every entity selected by a query, honoring its filters.
    pub fn destroy_query(&mut self, query: QueryId) -> Result<()> {
        self.ensure_not_exclusive()?;
        let chunks = self.query_chunks(query)?;

        for chunk in chunks {
            let arch = self.manager.chunk_archetype(chunk);
            let (id, entity_offset) = (arch.id, arch.entity_offset());
            let entities = self.manager.chunk(chunk).entities(entity_offset).to_vec();

            if arch.has_cleanup {
                for entity in entities {
                    if let Some(location) = self.entities.location(entity) {
                        self.destroy_at(entity, location)?;
                    }
                }
                continue;
            }

            self.complete_archetype(id);
            self.manager.clear_managed_slots(chunk, 0..entities.len());
            self.entities.free_all(&entities);
            self.manager.set_chunk_row_count(chunk, 0);
            self.tracer.entities_destroyed(id, entities.len());
        }
        Ok(())
    }

    /// Drops the row of an entity and frees its identifier.
    fn free_entity(&mut self, entity: Entity, location: Location) {
        let row = location.row.small_int::<usize>();
        self.manager.clear_managed_slots(location.chunk, row..row + 1);
        self.remove_row(location);
        self.entities.free(entity);
    }

    /// Swap-removes a row, patching the entity that moved into it.
    fn remove_row(&mut self, location: Location) {
        let row = location.row.small_int();
        if let Some(moved) = self.manager.remove_row(location.chunk, row) {
            self.entities.set_row(moved, row);
        }
    }

    /// The shared values an entity would have in `target`.
    /// Types absent from the current archetype get the default value.
    fn shared_for(&self, location: Location, target: ArchetypeId) -> Vec<SharedHandle> {
        let source = self.manager.get(location.archetype);
        let handles = &self.manager.chunk(location.chunk).shared;
        self.manager
            .get(target)
            .shared_types()
            .map(|ty| source.shared_slot(ty).map_or(SharedHandle::DEFAULT, |slot| handles[slot]))
            .collect()
    }

    /// Moves an entity into another archetype, keeping the values of common columns.
    fn move_entity(&mut self, entity: Entity, location: Location, target: ArchetypeId) -> Location {
        if target == location.archetype {
            return location;
        }
        self.complete_archetype(location.archetype);
        self.complete_archetype(target);

        let shared = self.shared_for(location, target);
        let version = self.system_version;
        let chunk = self.manager.get_chunk_with_free_row(target, &shared, version);
        let (row, _) = self.manager.allocate_rows(chunk, 1);
        self.manager.convert_row(location.chunk, location.row.small_int(), chunk, row, version);
        self.remove_row(location);

        let moved = Location { archetype: target, chunk, row: row.small_int() };
        self.entities.set_location(entity, moved);
        log::trace!("moved {entity:?} from {:?} to {target:?}", location.archetype);
        self.tracer.entity_moved(entity, location.archetype, target);
        moved
    }

    /// Moves an entity to a chunk of the same archetype with other shared values.
    fn move_within(&mut self, entity: Entity, location: Location, shared: &[SharedHandle]) {
        let version = self.system_version;
        let chunk = self.manager.get_chunk_with_free_row(location.archetype, shared, version);
        let (row, _) = self.manager.allocate_rows(chunk, 1);
        self.manager.copy_row(location.chunk, location.row.small_int(), chunk, row, version);
        self.remove_row(location);
        self.entities.set_location(entity, Location { chunk, row: row.small_int(), ..location });
    }

    fn add_edge(&mut self, source: ArchetypeId, ty: TypeIndex) -> Result<ArchetypeId> {
        let arch = self.manager.get(source);
        if let Some(&target) = arch.add_edges.get(&ty) {
            return Ok(target);
        }

        let mut types = arch.types.to_vec();
        match types.binary_search(&ty) {
            Ok(_) => return Ok(source),
            Err(position) => types.insert(position, ty),
        }
        let target = self.archetype_for(&types)?;
        self.manager.get_mut(source).add_edges.insert(ty, target);
        self.manager.get_mut(target).remove_edges.insert(ty, source);
        Ok(target)
    }

    fn remove_edge(&mut self, source: ArchetypeId, ty: TypeIndex) -> Result<ArchetypeId> {
        let arch = self.manager.get(source);
        if let Some(&target) = arch.remove_edges.get(&ty) {
            return Ok(target);
        }

        let mut types = arch.types.to_vec();
        match types.binary_search(&ty) {
            Ok(position) => types.remove(position),
            Err(_) => return Ok(source),
        };
        let target = self.archetype_for(&types)?;
        self.manager.get_mut(source).remove_edges.insert(ty, target);
        self.manager.get_mut(target).add_edges.insert(ty, source);
        Ok(target)
    }

    /// The residue archetype keeping only the cleanup components of `id`.
    fn cleanup_form(&mut self, id: ArchetypeId) -> Result<ArchetypeId> {
        if let Some(form) = self.manager.get(id).cleanup_form {
            return Ok(form);
        }

        let registry = &self.manager.registry;
        let mut types: Vec<TypeIndex> = self
            .manager
            .get(id)
            .types
            .iter()
            .copied()
            .filter(|&ty| ty == TypeIndex::ENTITY || registry.info(ty).is_cleanup())
            .collect();
        types.push(registry.cleanup_entity());
        types.sort_unstable();

        let form = self.archetype_for(&types)?;
        self.manager.get_mut(id).cleanup_form = Some(form);
        Ok(form)
    }

    /// The archetype of instances of `id`: without the prefab tag and cleanup components.
    fn instantiable_form(&mut self, id: ArchetypeId) -> Result<ArchetypeId> {
        if let Some(form) = self.manager.get(id).instantiable {
            return Ok(form);
        }

        let registry = &self.manager.registry;
        let types: Vec<TypeIndex> = self
            .manager
            .get(id)
            .types
            .iter()
            .copied()
            .filter(|&ty| {
                ty != registry.prefab()
                    && ty != registry.cleanup_entity()
                    && !registry.info(ty).is_cleanup()
            })
            .collect();

        let form = self.archetype_for(&types)?;
        self.manager.get_mut(id).instantiable = Some(form);
        Ok(form)
    }

    fn check_addable(&self, types: &[TypeIndex]) -> Result<()> {
        for &ty in types {
            if ty == TypeIndex::ENTITY {
                return Err(Error::EntityComponent);
            }
            self.registry().get(ty)?;
        }
        Ok(())
    }

    /// Adds a component with its default value. Adding a present component does nothing.
    pub fn add_component(&mut self, entity: Entity, ty: TypeIndex) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.check_addable(&[ty])?;
        let location = self.location(entity)?;
        let target = self.add_edge(location.archetype, ty)?;
        self.move_entity(entity, location, target);
        Ok(())
    }

    /// Adds several components at once, moving the entity only once.
    pub fn add_components(&mut self, entity: Entity, types: &[TypeIndex]) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.check_addable(types)?;
        let location = self.location(entity)?;

        let mut union = self.manager.get(location.archetype).types.to_vec();
        union.extend_from_slice(types);
        union.sort_unstable();
        union.dedup();

        let target = self.archetype_for(&union)?;
        self.move_entity(entity, location, target);
        Ok(())
    }

    /// Removes a component. Removing an absent component does nothing.
    ///
    /// Removing the last cleanup component of a cleanup residue finally destroys the entity.
    pub fn remove_component(&mut self, entity: Entity, ty: TypeIndex) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.check_addable(&[ty])?;
        let location = self.location(entity)?;
        let target = self.remove_edge(location.archetype, ty)?;
        self.move_or_finish(entity, location, target);
        Ok(())
    }

    /// Removes several components at once, moving the entity only once.
    pub fn remove_components(&mut self, entity: Entity, types: &[TypeIndex]) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.check_addable(types)?;
        let location = self.location(entity)?;

        let mut remaining = self.manager.get(location.archetype).types.to_vec();
        remaining.retain(|ty| !types.contains(ty));

        let target = self.archetype_for(&remaining)?;
        self.move_or_finish(entity, location, target);
        Ok(())
    }

    fn move_or_finish(&mut self, entity: Entity, location: Location, target: ArchetypeId) {
        let arch = self.manager.get(target);
        if arch.residue && !arch.has_cleanup {
            self.complete_archetype(location.archetype);
            self.free_entity(entity, location);
            log::trace!("{entity:?} lost its last cleanup component");
            self.tracer.entities_destroyed(location.archetype, 1);
        } else {
            self.move_entity(entity, location, target);
        }
    }

    /// Adds a component to every entity selected by a query.
    pub fn add_component_to_query(&mut self, query: QueryId, ty: TypeIndex) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.check_addable(&[ty])?;
        for entity in self.query_entities(query)? {
            let location = self.location(entity)?;
            let target = self.add_edge(location.archetype, ty)?;
            self.move_entity(entity, location, target);
        }
        Ok(())
    }

    /// Removes a component from every entity selected by a query.
    pub fn remove_component_from_query(&mut self, query: QueryId, ty: TypeIndex) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.check_addable(&[ty])?;
        for entity in self.query_entities(query)? {
            let location = self.location(entity)?;
            let target = self.remove_edge(location.archetype, ty)?;
            self.move_or_finish(entity, location, target);
        }
        Ok(())
    }

    /// Sets the shared component `T` of an entity,
    /// moving it to a chunk holding the new value.
    pub fn set_shared<T: SharedValue>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.ensure_not_exclusive()?;
        let ty = self.registry().typed::<T>(Category::Shared)?;
        let location = self.location(entity)?;
        let slot = self
            .manager
            .get(location.archetype)
            .shared_slot(ty)
            .ok_or(Error::MissingComponent { entity, name: any::type_name::<T>() })?;

        let handle = self.manager.shared.insert(ty, Box::new(value));
        let mut shared = self.manager.chunk(location.chunk).shared.to_vec();
        if shared[slot] != handle {
            shared[slot] = handle;
            self.complete_archetype(location.archetype);
            self.move_within(entity, location, &shared);
        }
        self.manager.shared.remove_reference(handle, 1);
        Ok(())
    }

    /// Creates `count` copies of an entity.
    ///
    /// The copies drop the [`Prefab`](crate::types::Prefab) tag and all cleanup components.
    /// Buffers and managed values are cloned.
    pub fn instantiate(&mut self, prefab: Entity, count: usize) -> Result<Vec<Entity>> {
        self.ensure_not_exclusive()?;
        let location = self.location(prefab)?;
        let target = self.instantiable_form(location.archetype)?;
        let shared = self.shared_for(location, target);
        self.complete_archetype(location.archetype);
        self.complete_archetype(target);

        let version = self.system_version;
        let entity_offset = self.manager.get(target).entity_offset();
        let mut out = Vec::with_capacity(count);
        let mut remaining = count;
        while remaining > 0 {
            let chunk = self.manager.get_chunk_with_free_row(target, &shared, version);
            let (base, allocated) = self.manager.allocate_rows(chunk, remaining);
            let start = out.len();
            self.entities.allocate(target, chunk, base, allocated, &mut out);
            self.manager.replicate_row(
                location.chunk,
                location.row.small_int(),
                chunk,
                base,
                allocated,
                version,
            );

            let chunk = &mut self.manager.chunks[chunk.get()];
            for (row, &entity) in (base..).zip(&out[start..]) {
                chunk.write_entity(entity_offset, row, entity);
            }
            remaining -= allocated;
        }

        log::trace!("instantiated {prefab:?} {count} times");
        self.tracer.entities_created(target, count);
        Ok(out)
    }
}
