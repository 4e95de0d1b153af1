//! Moving and copying entities between stores over the same registry.
//!
//! Whole chunks are moved by exchanging their blocks,
//! so row data is never copied byte by byte.
//! Moved entities get fresh identifiers in the destination,
//! and every embedded entity reference is rewritten through the resulting [`EntityRemap`].

use std::mem;
use std::sync::Arc;

use xias::Xias;

use super::Store;
use crate::chunk::ChunkId;
use crate::entity::{EntityRemap, Location};
use crate::query::QueryId;
use crate::shared::SharedHandle;
use crate::{Entity, Error, Result};

impl Store {
    /// Moves every entity of `source` into this store, leaving `source` empty.
    pub fn move_entities_from(&mut self, source: &mut Store) -> Result<EntityRemap> {
        self.ensure_not_exclusive()?;
        self.move_all_from(source)
    }

    pub(crate) fn move_all_from(&mut self, source: &mut Store) -> Result<EntityRemap> {
        source.ensure_not_exclusive()?;
        self.check_registry(source)?;
        let chunks: Vec<ChunkId> = source
            .manager
            .archetypes
            .iter()
            .flat_map(|arch| arch.chunks(&source.manager.chunks))
            .collect();
        Ok(self.move_chunks_from(source, chunks))
    }

    /// Moves the entities selected by a query of `source` into this store.
    pub fn move_query_from(&mut self, source: &mut Store, query: QueryId) -> Result<EntityRemap> {
        self.ensure_not_exclusive()?;
        source.ensure_not_exclusive()?;
        self.check_registry(source)?;
        let chunks = source.query_chunks(query)?;
        Ok(self.move_chunks_from(source, chunks))
    }

    fn check_registry(&self, source: &Store) -> Result<()> {
        match Arc::ptr_eq(self.registry(), source.registry()) {
            true => Ok(()),
            false => Err(Error::RegistryMismatch),
        }
    }

    fn move_chunks_from(&mut self, source: &mut Store, chunks: Vec<ChunkId>) -> EntityRemap {
        source.deps.complete_all();
        self.deps.complete_all();

        let handles = chunks.iter().flat_map(|&id| source.manager.chunk(id).shared.iter().copied());
        let shared_map = source.manager.shared.migrate(handles, &mut self.manager.shared);

        let version = self.system_version;
        let mut remap = EntityRemap::new();
        let mut moved = Vec::with_capacity(chunks.len());
        for src in chunks {
            let types = source.manager.chunk_archetype(src).types.clone();
            let count = source.manager.chunk(src).count;
            let target =
                self.archetype_for(&types).expect("types are valid in the shared registry");
            let shared: Vec<SharedHandle> =
                source.manager.chunk(src).shared.iter().map(|handle| shared_map[handle]).collect();

            let dst = self.manager.new_chunk(target, &shared, version);
            mem::swap(
                &mut self.manager.chunks[dst.get()].block,
                &mut source.manager.chunks[src.get()].block,
            );
            self.manager.set_chunk_row_count(dst, count);
            self.manager.import_objects(&mut source.manager.objects, dst);

            let entity_offset = self.manager.get(target).entity_offset();
            let old = self.manager.chunk(dst).entities(entity_offset).to_vec();
            let mut new = Vec::with_capacity(count);
            self.entities.allocate(target, dst, 0, count, &mut new);

            let chunk = &mut self.manager.chunks[dst.get()];
            for (row, (&old, &new)) in old.iter().zip(&new).enumerate() {
                remap.insert(old, new);
                chunk.write_entity(entity_offset, row, new);
            }

            source.entities.free_all(&old);
            source.manager.set_chunk_row_count(src, 0);
            moved.push((dst, count));
        }

        for (chunk, count) in moved {
            self.manager.remap_entities(chunk, 0..count, &remap);
        }
        self.manager.shared.release_migrated(&shared_map);

        log::debug!("moved {} entities between stores", remap.len());
        self.tracer.entities_migrated(remap.len());
        remap
    }

    /// Copies the given entities of `source` into this store.
    ///
    /// References between copied entities are rewritten to the copies;
    /// references to entities outside the set become [`Entity::NULL`].
    pub fn copy_entities_from(&mut self, source: &Store, entities: &[Entity]) -> Result<EntityRemap> {
        self.ensure_not_exclusive()?;
        self.check_registry(source)?;
        let locations: Vec<Location> =
            entities.iter().map(|&entity| source.location(entity)).collect::<Result<_>>()?;

        for location in &locations {
            for &ty in source.manager.get(location.archetype).types.iter() {
                source.deps.wait_for_write(ty);
            }
        }

        let handles = locations
            .iter()
            .flat_map(|location| source.manager.chunk(location.chunk).shared.iter().copied());
        let shared_map = source.manager.shared.migrate(handles, &mut self.manager.shared);

        let version = self.system_version;
        let mut remap = EntityRemap::new();
        let mut copied = Vec::with_capacity(entities.len());
        for (&entity, location) in entities.iter().zip(&locations) {
            if !remap.remap(entity).is_null() {
                continue;
            }

            let types = source.manager.get(location.archetype).types.clone();
            let target = self.archetype_for(&types)?;
            self.complete_archetype(target);
            let shared: Vec<SharedHandle> = source
                .manager
                .chunk(location.chunk)
                .shared
                .iter()
                .map(|handle| shared_map[handle])
                .collect();

            let chunk = self.manager.get_chunk_with_free_row(target, &shared, version);
            let (row, _) = self.manager.allocate_rows(chunk, 1);
            self.manager.import_row(
                &source.manager,
                location.chunk,
                location.row.small_int(),
                chunk,
                row,
                version,
            );

            let mut new = Vec::with_capacity(1);
            self.entities.allocate(target, chunk, row, 1, &mut new);
            let entity_offset = self.manager.get(target).entity_offset();
            self.manager.chunks[chunk.get()].write_entity(entity_offset, row, new[0]);
            remap.insert(entity, new[0]);
            copied.push((chunk, row));
        }

        for (chunk, row) in copied {
            self.manager.remap_entities(chunk, row..row + 1, &remap);
        }
        self.manager.shared.release_migrated(&shared_map);

        log::debug!("copied {} entities between stores", remap.len());
        self.tracer.entities_migrated(remap.len());
        Ok(remap)
    }
}
