//! Creating, filtering and iterating live queries.

use std::{any, mem};

use rayon::prelude::*;
use xias::Xias;

use super::Store;
use crate::archetype::{ArchetypeId, ArchetypeManager};
use crate::chunk::ChunkId;
use crate::query::{ChunkIter, ChunkViewMut, Query, QueryDesc, QueryId, MAX_FILTER_TYPES};
use crate::shared::SharedValue;
use crate::types::{Category, TypeIndex};
use crate::{Entity, Error, Result};

impl Store {
    /// Compiles a query and binds it to every matching archetype, now and in the future.
    pub fn create_query(&mut self, desc: &QueryDesc) -> Result<QueryId> {
        self.ensure_not_exclusive()?;
        let mut query = Query::new(desc, self.registry())?;
        let matched: Vec<ArchetypeId> = self
            .manager
            .archetypes
            .iter()
            .filter(|arch| query.matches(arch))
            .map(|arch| arch.id)
            .collect();
        query.matched = matched;

        let id = QueryId(self.queries.len().small_int());
        log::debug!("created query {id:?} matching {} archetypes", query.matched.len());
        self.queries.push(query);
        Ok(id)
    }

    pub(crate) fn query(&self, id: QueryId) -> Result<&Query> {
        self.queries.get(id.get()).ok_or(Error::InvalidQuery(id.0))
    }

    fn query_mut(&mut self, id: QueryId) -> Result<&mut Query> {
        self.queries.get_mut(id.get()).ok_or(Error::InvalidQuery(id.0))
    }

    /// The archetypes bound to a query, newest first.
    pub fn query_archetypes(&self, id: QueryId) -> Result<Vec<ArchetypeId>> {
        Ok(self.query(id)?.matched.iter().rev().copied().collect())
    }

    /// The number of entities selected by a query, honoring its filters.
    pub fn query_entity_count(&self, id: QueryId) -> Result<usize> {
        Ok(self.query(id)?.entity_count(&self.manager))
    }

    /// The chunks selected by a query, in iteration order.
    pub fn query_chunks(&self, id: QueryId) -> Result<Vec<ChunkId>> {
        Ok(self.query(id)?.chunks(&self.manager).collect())
    }

    /// The entities selected by a query, in iteration order.
    pub fn query_entities(&self, id: QueryId) -> Result<Vec<Entity>> {
        let query = self.query(id)?;
        let mut entities = Vec::with_capacity(query.entity_count(&self.manager));
        for chunk in query.chunks(&self.manager) {
            let offset = self.manager.chunk_archetype(chunk).entity_offset();
            entities.extend_from_slice(self.manager.chunk(chunk).entities(offset));
        }
        Ok(entities)
    }

    /// Iterates over the chunks selected by a query.
    pub fn iter_chunks(&self, id: QueryId) -> Result<ChunkIter<'_>> {
        let chunks = self.query_chunks(id)?;
        Ok(ChunkIter::new(&self.manager, chunks))
    }

    /// Collects the selected chunks and completes outstanding work on their archetypes.
    fn prepare_write(&mut self, id: QueryId) -> Result<Vec<ChunkId>> {
        let query = self.query(id)?;
        let chunks: Vec<ChunkId> = query.chunks(&self.manager).collect();
        let matched = query.matched.clone();
        for arch in matched {
            self.complete_archetype(arch);
        }
        Ok(chunks)
    }

    /// Calls `f` with write access to each chunk selected by a query, in iteration order.
    pub fn for_each_chunk_mut(
        &mut self,
        id: QueryId,
        mut f: impl FnMut(ChunkViewMut<'_>),
    ) -> Result<()> {
        self.ensure_not_exclusive()?;
        let chunks = self.prepare_write(id)?;
        let version = self.system_version;
        let ArchetypeManager { archetypes, chunks: arena, registry, shared, .. } = &mut self.manager;
        let (archetypes, registry, shared) = (&*archetypes, &**registry, &*shared);

        let mut base_index = 0;
        for chunk_id in chunks {
            let chunk = &mut arena[chunk_id.get()];
            let len = chunk.count;
            let archetype = &archetypes[chunk.archetype.expect("selected chunk is in use").get()];
            f(ChunkViewMut::new(chunk_id, chunk, archetype, registry, shared, base_index, version));
            base_index += len;
        }
        Ok(())
    }

    /// Calls `f` with write access to each chunk selected by a query, in parallel.
    ///
    /// Chunks are disjoint, so each call owns its chunk exclusively.
    pub fn par_for_each_chunk_mut<F>(&mut self, id: QueryId, f: F) -> Result<()>
    where
        F: Fn(ChunkViewMut<'_>) + Send + Sync,
    {
        self.ensure_not_exclusive()?;
        let chunks = self.prepare_write(id)?;
        let mut bases = vec![None; self.manager.chunks.len()];
        let mut base_index = 0;
        for &chunk in &chunks {
            bases[chunk.get()] = Some(base_index);
            base_index += self.manager.chunk(chunk).len();
        }

        let version = self.system_version;
        let ArchetypeManager { archetypes, chunks: arena, registry, shared, .. } = &mut self.manager;
        let (archetypes, registry, shared) = (&*archetypes, &**registry, &*shared);

        arena.par_iter_mut().zip(bases.par_iter()).enumerate().for_each(|(index, (chunk, base))| {
            if let Some(base_index) = *base {
                let archetype = &archetypes[chunk.archetype.expect("selected chunk is in use").get()];
                let id = ChunkId(index.small_int());
                f(ChunkViewMut::new(id, chunk, archetype, registry, shared, base_index, version));
            }
        });
        Ok(())
    }

    /// Restricts a query to chunks whose shared component `T` equals `value`.
    ///
    /// `T` must be required by the query.
    /// Setting a filter for a type already filtered replaces its value.
    pub fn set_shared_filter<T: SharedValue>(&mut self, id: QueryId, value: T) -> Result<()> {
        self.ensure_not_exclusive()?;
        let ty = self.registry().typed::<T>(Category::Shared)?;
        let query = self.queries.get_mut(id.get()).ok_or(Error::InvalidQuery(id.0))?;
        if !query.requires(ty) {
            return Err(Error::FilterNotInQuery(any::type_name::<T>()));
        }

        let existing = query.shared.iter().position(|&(filter, _)| filter == ty);
        if existing.is_none() && query.shared.len() >= MAX_FILTER_TYPES {
            return Err(Error::TooManyFilters("shared"));
        }

        let handle = self.manager.shared.insert(ty, Box::new(value));
        match existing {
            Some(index) => {
                let old = mem::replace(&mut query.shared[index].1, handle);
                self.manager.shared.remove_reference(old, 1);
            }
            None => query.shared.push((ty, handle)),
        }
        Ok(())
    }

    /// Restricts a query to chunks where any of `types` was written after version `since`.
    ///
    /// Every type must be required by the query. Replaces any previous changed filter.
    pub fn set_changed_filter(&mut self, id: QueryId, types: &[TypeIndex], since: u32) -> Result<()> {
        self.ensure_not_exclusive()?;
        if types.len() > MAX_FILTER_TYPES {
            return Err(Error::TooManyFilters("changed"));
        }
        let query = self.query(id)?;
        if let Some(&missing) = types.iter().find(|&&ty| !query.requires(ty)) {
            return Err(Error::FilterNotInQuery(self.registry().get(missing)?.name()));
        }

        let query = self.query_mut(id)?;
        query.changed = types.to_vec();
        query.since = since;
        Ok(())
    }

    /// Removes all filters of a query, releasing the shared values they held.
    pub fn reset_filter(&mut self, id: QueryId) -> Result<()> {
        self.ensure_not_exclusive()?;
        let query = self.queries.get_mut(id.get()).ok_or(Error::InvalidQuery(id.0))?;
        for (_, handle) in query.shared.drain(..) {
            self.manager.shared.remove_reference(handle, 1);
        }
        query.changed.clear();
        query.since = 0;
        Ok(())
    }
}
