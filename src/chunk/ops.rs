//! Row movement between chunks.
//!
//! Every structural change is expressed with these operations:
//! allocate a row in the destination, fill it from the source row,
//! then swap-remove the source row.

use std::ops::Range;

use itertools::{EitherOrBoth, Itertools};

use super::objects::ObjectTable;
use super::{Chunk, ChunkId};
use crate::archetype::{ArchetypeManager, Column, ColumnKind};
use crate::entity::EntityRemap;
use crate::types::{Category, Registry};
use crate::Entity;

fn pair_mut<T>(slice: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b, "cannot borrow the same element twice");
    if a < b {
        let (left, right) = slice.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = slice.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

/// Copies `src_range` bytes of one chunk to `dst_start` of another (or the same) chunk.
fn copy_bytes(
    chunks: &mut [Chunk],
    src: ChunkId,
    src_range: Range<usize>,
    dst: ChunkId,
    dst_start: usize,
) {
    if src == dst {
        chunks[src.get()].block.bytes_mut().copy_within(src_range, dst_start);
    } else {
        let (from, to) = pair_mut(chunks, src.get(), dst.get());
        let len = src_range.len();
        to.block.bytes_mut()[dst_start..dst_start + len]
            .copy_from_slice(&from.block.bytes()[src_range]);
    }
}

/// Initializes a slot of a column that has no source value.
fn init_slot(chunk: &mut Chunk, registry: &Registry, column: &Column, row: usize) {
    match column.kind {
        ColumnKind::Inline => {
            let write = registry.info(column.ty).write_default.expect("plain types have defaults");
            let start = column.range(row, 1).start;
            assert!(row < chunk.capacity);
            // SAFETY: the slot lies within the column and is aligned for the column type.
            unsafe { write(chunk.block.as_mut_ptr().add(start)) }
        }
        ColumnKind::Handle => chunk.write_handle(column.offset, row, 0),
        ColumnKind::Tag | ColumnKind::Shared(_) => {}
    }
}

fn clear_slot(chunk: &mut Chunk, objects: &mut ObjectTable, column: &Column, row: usize) {
    if column.kind == ColumnKind::Handle {
        objects.remove(chunk.read_handle(column.offset, row));
        chunk.write_handle(column.offset, row, 0);
    }
}

impl ArchetypeManager {
    /// Copies a row between two chunks of the same archetype.
    ///
    /// Object handles move with the row; the source slot no longer owns them.
    pub(crate) fn copy_row(
        &mut self,
        src: ChunkId,
        src_row: usize,
        dst: ChunkId,
        dst_row: usize,
        version: u32,
    ) {
        let Self { archetypes, chunks, .. } = self;
        let archetype = chunks[src.get()].archetype.expect("source chunk is in use");
        debug_assert_eq!(chunks[dst.get()].archetype, Some(archetype));

        for column in archetypes[archetype.get()].columns.iter().filter(|column| column.stride > 0) {
            copy_bytes(chunks, src, column.range(src_row, 1), dst, column.range(dst_row, 1).start);
        }
        chunks[dst.get()].change_versions.fill(version);
    }

    /// Moves a row into a chunk of a different archetype.
    ///
    /// Both type lists are walked as a sorted merge:
    /// shared columns are copied, dropped columns release their objects,
    /// and new columns are initialized to their defaults.
    pub(crate) fn convert_row(
        &mut self,
        src: ChunkId,
        src_row: usize,
        dst: ChunkId,
        dst_row: usize,
        version: u32,
    ) {
        let Self { archetypes, chunks, objects, registry, .. } = self;
        let src_arch = &archetypes[chunks[src.get()].archetype.expect("source chunk is in use").get()];
        let dst_arch =
            &archetypes[chunks[dst.get()].archetype.expect("destination chunk is in use").get()];

        let merged =
            src_arch.columns.iter().merge_join_by(dst_arch.columns.iter(), |a, b| a.ty.cmp(&b.ty));
        for pair in merged {
            match pair {
                EitherOrBoth::Both(from, to) => {
                    if to.stride > 0 {
                        copy_bytes(chunks, src, from.range(src_row, 1), dst, to.range(dst_row, 1).start);
                    }
                }
                EitherOrBoth::Left(from) => {
                    clear_slot(&mut chunks[src.get()], objects, from, src_row);
                }
                EitherOrBoth::Right(to) => init_slot(&mut chunks[dst.get()], registry, to, dst_row),
            }
        }
        chunks[dst.get()].change_versions.fill(version);
    }

    /// Fans one row out to `count` consecutive rows of another chunk, cloning objects.
    ///
    /// Columns absent from the source are initialized to defaults;
    /// columns absent from the destination are ignored.
    pub(crate) fn replicate_row(
        &mut self,
        src: ChunkId,
        src_row: usize,
        dst: ChunkId,
        dst_base: usize,
        count: usize,
        version: u32,
    ) {
        let Self { archetypes, chunks, objects, registry, .. } = self;
        let src_arch = &archetypes[chunks[src.get()].archetype.expect("source chunk is in use").get()];
        let dst_arch =
            &archetypes[chunks[dst.get()].archetype.expect("destination chunk is in use").get()];

        let merged =
            src_arch.columns.iter().merge_join_by(dst_arch.columns.iter(), |a, b| a.ty.cmp(&b.ty));
        for pair in merged {
            match pair {
                EitherOrBoth::Both(from, to) => match to.kind {
                    ColumnKind::Inline => {
                        for row in dst_base..dst_base + count {
                            copy_bytes(chunks, src, from.range(src_row, 1), dst, to.range(row, 1).start);
                        }
                    }
                    ColumnKind::Handle => {
                        let handle = chunks[src.get()].read_handle(from.offset, src_row);
                        for row in dst_base..dst_base + count {
                            let copy = objects.clone_handle(handle);
                            chunks[dst.get()].write_handle(to.offset, row, copy);
                        }
                    }
                    ColumnKind::Tag | ColumnKind::Shared(_) => {}
                },
                EitherOrBoth::Left(_) => {}
                EitherOrBoth::Right(to) => {
                    for row in dst_base..dst_base + count {
                        init_slot(&mut chunks[dst.get()], registry, to, row);
                    }
                }
            }
        }
        chunks[dst.get()].change_versions.fill(version);
    }

    /// Initializes every column of freshly allocated rows to defaults.
    pub(crate) fn init_rows(&mut self, id: ChunkId, rows: Range<usize>, version: u32) {
        let Self { archetypes, chunks, registry, .. } = self;
        let chunk = &mut chunks[id.get()];
        let arch = &archetypes[chunk.archetype.expect("chunk is in use").get()];

        for column in arch.columns.iter().skip(1) {
            for row in rows.clone() {
                init_slot(chunk, registry, column, row);
            }
        }
        chunk.change_versions.fill(version);
    }

    /// Drops the side-table objects of the given rows.
    pub(crate) fn clear_managed_slots(&mut self, id: ChunkId, rows: Range<usize>) {
        let Self { archetypes, chunks, objects, .. } = self;
        let chunk = &mut chunks[id.get()];
        let arch = &archetypes[chunk.archetype.expect("chunk is in use").get()];
        if arch.num_buffers + arch.num_managed == 0 {
            return;
        }

        for column in arch.columns.iter() {
            for row in rows.clone() {
                clear_slot(chunk, objects, column, row);
            }
        }
    }

    /// Rewrites the embedded entity references of `rows` through `remap`.
    ///
    /// The entity column itself is left untouched.
    pub(crate) fn remap_entities(&mut self, id: ChunkId, rows: Range<usize>, remap: &EntityRemap) {
        let Self { archetypes, chunks, objects, registry, .. } = self;
        let chunk = &mut chunks[id.get()];
        let arch = &archetypes[chunk.archetype.expect("chunk is in use").get()];
        assert!(rows.end <= chunk.count, "rows {rows:?} out of {} occupied rows", chunk.count);

        let mut dangling = 0;
        let mut resolve = |entity: Entity| {
            let target = remap.remap(entity);
            if target.is_null() && !entity.is_null() {
                dangling += 1;
            }
            target
        };

        for column in arch.columns.iter().skip(1) {
            let info = registry.info(column.ty);
            if info.entity_offsets.is_empty() {
                continue;
            }

            match (column.kind, info.category) {
                (ColumnKind::Inline, _) => {
                    for row in rows.clone() {
                        let base = column.range(row, 1).start;
                        for &offset in info.entity_offsets.iter() {
                            // SAFETY: the offset was validated against the type size at
                            // registration, and the row is occupied.
                            unsafe {
                                let ptr = chunk.block.as_mut_ptr().add(base + offset).cast::<Entity>();
                                ptr.write_unaligned(resolve(ptr.read_unaligned()));
                            }
                        }
                    }
                }
                (ColumnKind::Handle, Category::Buffer) => {
                    for row in rows.clone() {
                        let handle = chunk.read_handle(column.offset, row);
                        if let Some(object) = objects.get_mut(handle) {
                            object.visit_entities(&info.entity_offsets, &mut |entity| {
                                *entity = resolve(*entity);
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        if dangling > 0 {
            log::warn!("{dangling} entity references in {id:?} point outside the remap and became null");
        }
    }

    /// Copies one row of a chunk owned by another store into a row of this store.
    ///
    /// Both chunks must have the same type list. Objects are cloned into this store.
    pub(crate) fn import_row(
        &mut self,
        source: &ArchetypeManager,
        src: ChunkId,
        src_row: usize,
        dst: ChunkId,
        dst_row: usize,
        version: u32,
    ) {
        let Self { archetypes, chunks, objects, .. } = self;
        let from = &source.chunks[src.get()];
        let to = &mut chunks[dst.get()];
        let arch = &archetypes[to.archetype.expect("destination chunk is in use").get()];
        debug_assert_eq!(*source.chunk_archetype(src).types, *arch.types);

        for column in arch.columns.iter() {
            match column.kind {
                ColumnKind::Inline => {
                    let len = column.stride;
                    let (from_start, to_start) =
                        (column.range(src_row, 1).start, column.range(dst_row, 1).start);
                    to.block.bytes_mut()[to_start..to_start + len]
                        .copy_from_slice(&from.block.bytes()[from_start..from_start + len]);
                }
                ColumnKind::Handle => {
                    let copy = match source.objects.get(from.read_handle(column.offset, src_row)) {
                        Some(object) => objects.insert(object.clone_object()),
                        None => 0,
                    };
                    to.write_handle(column.offset, dst_row, copy);
                }
                ColumnKind::Tag | ColumnKind::Shared(_) => {}
            }
        }
        to.change_versions.fill(version);
    }

    /// Moves the side-table objects of a chunk just taken over from another store.
    pub(crate) fn import_objects(&mut self, source: &mut ObjectTable, id: ChunkId) {
        let Self { archetypes, chunks, objects, .. } = self;
        let chunk = &mut chunks[id.get()];
        let arch = &archetypes[chunk.archetype.expect("chunk is in use").get()];
        if arch.num_buffers + arch.num_managed == 0 {
            return;
        }

        for column in arch.columns.iter().filter(|column| column.kind == ColumnKind::Handle) {
            for row in 0..chunk.count {
                let handle = match source.take(chunk.read_handle(column.offset, row)) {
                    Some(object) => objects.insert(object),
                    None => 0,
                };
                chunk.write_handle(column.offset, row, handle);
            }
        }
    }
}
