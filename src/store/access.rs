//! Per-entity component access.

use std::any;

use xias::Xias;

use super::Store;
use crate::archetype::{ArchetypeId, ArchetypeManager};
use crate::entity::Location;
use crate::shared::SharedValue;
use crate::types::{Category, TypeIndex};
use crate::{Entity, Error, Result};

/// The position of one component value.
struct Slot {
    ty:       TypeIndex,
    location: Location,
    column:   usize,
}

impl Store {
    /// Whether `entity` is alive.
    pub fn exists(&self, entity: Entity) -> bool { self.entities.exists(entity) }

    /// The archetype of a live entity.
    pub fn archetype_of(&self, entity: Entity) -> Result<ArchetypeId> {
        Ok(self.location(entity)?.archetype)
    }

    /// Whether a live entity has the component `ty`.
    pub fn has_component(&self, entity: Entity, ty: TypeIndex) -> Result<bool> {
        let location = self.location(entity)?;
        Ok(self.manager.get(location.archetype).has(ty))
    }

    fn slot<T: 'static>(&self, entity: Entity, category: Category) -> Result<Slot> {
        let ty = self.registry().typed::<T>(category)?;
        let location = self.location(entity)?;
        let column = self
            .manager
            .get(location.archetype)
            .column_index(ty)
            .ok_or(Error::MissingComponent { entity, name: any::type_name::<T>() })?;
        Ok(Slot { ty, location, column })
    }

    /// Reads a plain component, waiting for scheduled writers of `T` first.
    pub fn get<T: 'static>(&self, entity: Entity) -> Result<&T> {
        let slot = self.slot::<T>(entity, Category::Plain)?;
        self.deps.wait_for_write(slot.ty);

        let column = &self.manager.get(slot.location.archetype).columns[slot.column];
        let offset = column.range(slot.location.row.small_int(), 1).start;
        let chunk = self.manager.chunk(slot.location.chunk);
        // SAFETY: the slot is aligned for `T` and initialized.
        Ok(unsafe { &*chunk.block.as_ptr().add(offset).cast::<T>() })
    }

    /// Writes a plain component in place, completing scheduled readers and writers of `T` first.
    ///
    /// Stamps the change version of the column.
    pub fn get_mut<T: 'static>(&mut self, entity: Entity) -> Result<&mut T> {
        self.ensure_not_exclusive()?;
        self.write_slot(entity)
    }

    pub(crate) fn write_slot<T: 'static>(&mut self, entity: Entity) -> Result<&mut T> {
        let slot = self.slot::<T>(entity, Category::Plain)?;
        if slot.ty == TypeIndex::ENTITY {
            return Err(Error::EntityComponent);
        }
        self.deps.complete_read_and_write_dependency(slot.ty);

        let column = &self.manager.get(slot.location.archetype).columns[slot.column];
        let offset = column.range(slot.location.row.small_int(), 1).start;
        let version = self.system_version;
        let chunk = &mut self.manager.chunks[slot.location.chunk.get()];
        chunk.change_versions[slot.column] = version;
        // SAFETY: the slot is aligned for `T` and initialized.
        Ok(unsafe { &mut *chunk.block.as_mut_ptr().add(offset).cast::<T>() })
    }

    /// Overwrites a plain component.
    pub fn set<T: 'static>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.ensure_not_exclusive()?;
        self.write(entity, value)
    }

    pub(crate) fn write<T: 'static>(&mut self, entity: Entity, value: T) -> Result<()> {
        *self.write_slot::<T>(entity)? = value;
        Ok(())
    }

    /// Reads the shared component `T` of an entity.
    pub fn get_shared<T: SharedValue>(&self, entity: Entity) -> Result<&T> {
        let ty = self.registry().typed::<T>(Category::Shared)?;
        let location = self.location(entity)?;
        let slot = self
            .manager
            .get(location.archetype)
            .shared_slot(ty)
            .ok_or(Error::MissingComponent { entity, name: any::type_name::<T>() })?;

        let handle = self.manager.chunk(location.chunk).shared[slot];
        let value = self.manager.shared.get(ty, handle).as_any();
        Ok(value.downcast_ref::<T>().expect("shared type matches its registration"))
    }

    /// Reads the buffer component of element type `T`.
    pub fn buffer<T: 'static>(&self, entity: Entity) -> Result<&[T]> {
        let slot = self.slot::<T>(entity, Category::Buffer)?;
        self.deps.wait_for_write(slot.ty);

        let offset = self.manager.get(slot.location.archetype).columns[slot.column].offset;
        let handle =
            self.manager.chunk(slot.location.chunk).read_handle(offset, slot.location.row.small_int());
        Ok(self.manager.objects.buffer(handle))
    }

    /// Mutably borrows the buffer component of element type `T`.
    pub fn buffer_mut<T: Copy + Send + Sync + 'static>(
        &mut self,
        entity: Entity,
    ) -> Result<&mut Vec<T>> {
        self.ensure_not_exclusive()?;
        let slot = self.slot::<T>(entity, Category::Buffer)?;
        self.deps.complete_read_and_write_dependency(slot.ty);

        let version = self.system_version;
        let ArchetypeManager { archetypes, chunks, objects, .. } = &mut self.manager;
        let offset = archetypes[slot.location.archetype.get()].columns[slot.column].offset;
        let chunk = &mut chunks[slot.location.chunk.get()];
        let row = slot.location.row.small_int();

        let mut handle = chunk.read_handle(offset, row);
        let buffer = objects.buffer_mut::<T>(&mut handle);
        chunk.write_handle(offset, row, handle);
        chunk.change_versions[slot.column] = version;
        Ok(buffer)
    }

    /// Reads the managed component `T`, if it was ever set.
    pub fn managed<T: 'static>(&self, entity: Entity) -> Result<Option<&T>> {
        let slot = self.slot::<T>(entity, Category::Managed)?;
        self.deps.wait_for_write(slot.ty);

        let offset = self.manager.get(slot.location.archetype).columns[slot.column].offset;
        let handle =
            self.manager.chunk(slot.location.chunk).read_handle(offset, slot.location.row.small_int());
        Ok(self.manager.objects.managed(handle))
    }

    /// Mutably borrows the managed component `T`, initializing it to the default if unset.
    pub fn managed_mut<T: Clone + Default + Send + Sync + 'static>(
        &mut self,
        entity: Entity,
    ) -> Result<&mut T> {
        self.ensure_not_exclusive()?;
        let slot = self.slot::<T>(entity, Category::Managed)?;
        self.deps.complete_read_and_write_dependency(slot.ty);

        let version = self.system_version;
        let ArchetypeManager { archetypes, chunks, objects, .. } = &mut self.manager;
        let offset = archetypes[slot.location.archetype.get()].columns[slot.column].offset;
        let chunk = &mut chunks[slot.location.chunk.get()];
        let row = slot.location.row.small_int();

        let mut handle = chunk.read_handle(offset, row);
        let value = objects.managed_mut::<T>(&mut handle);
        chunk.write_handle(offset, row, handle);
        chunk.change_versions[slot.column] = version;
        Ok(value)
    }
}
