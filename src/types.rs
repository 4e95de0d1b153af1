//! The component type registry.
//!
//! Every component type used by a [`Store`](crate::Store) is registered once through a
//! [`Builder`], which freezes into an immutable [`Registry`] shared by all stores built from it.
//! Type indices are assigned in canonical order,
//! so a sorted list of [`TypeIndex`] values is also a canonically sorted type list.

use std::any::{self, TypeId};
use std::collections::HashMap;
use std::hash::Hash;
use std::{fmt, mem};

use xias::Xias;

use crate::chunk::MAX_ALIGN;
use crate::shared::SharedValue;
use crate::{Entity, Error, Result};


/// Identifies a registered component type.
///
/// Comparing two indices compares the canonical ordering of their types.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeIndex(pub(crate) u32);

impl TypeIndex {
    /// The implicit entity column, always first in every archetype.
    pub const ENTITY: Self = Self(0);

    /// The position of this type in its registry.
    pub fn get(self) -> usize { self.0.small_int() }
}

impl fmt::Debug for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "TypeIndex({})", self.0) }
}

/// How values of a component type are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Inline bytes in the chunk column.
    Plain,
    /// Zero-sized marker; only affects archetype membership.
    Tag,
    /// One deduplicated value per chunk, held by the shared-value store.
    Shared,
    /// A variable-length list of elements, stored in the object table.
    Buffer,
    /// An arbitrary owned object, stored in the object table.
    Managed,
}

/// Marks entities excluded from queries unless the query names this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Disabled;

/// Marks template entities excluded from queries unless the query names this type.
/// Instantiating a prefab drops this tag from the copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prefab;

/// Marks destroyed entities whose cleanup components are still attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupEntity;

/// Cached metadata of a registered type.
pub struct TypeInfo {
    pub(crate) name:           &'static str,
    pub(crate) type_id:        TypeId,
    pub(crate) size:           usize,
    pub(crate) align:          usize,
    pub(crate) category:       Category,
    /// Canonical ordering key; the entity type always has key 0.
    pub(crate) ordering_key:   u64,
    /// Physical column placement key, independent of the canonical order.
    pub(crate) memory_order:   u64,
    /// Byte offsets of embedded [`Entity`] fields within one value (or buffer element).
    pub(crate) entity_offsets: Box<[usize]>,
    /// Retained on the cleanup residue when the entity is destroyed.
    pub(crate) cleanup:        bool,
    pub(crate) write_default:  Option<unsafe fn(*mut u8)>,
    pub(crate) shared_default: Option<fn() -> Box<dyn SharedValue>>,
}

impl TypeInfo {
    /// The rust type name.
    pub fn name(&self) -> &'static str { self.name }

    /// The byte size of one value (of one element for buffers).
    pub fn size(&self) -> usize { self.size }

    /// The alignment of one value.
    pub fn align(&self) -> usize { self.align }

    /// The storage category.
    pub fn category(&self) -> Category { self.category }

    /// The canonical ordering key.
    pub fn ordering_key(&self) -> u64 { self.ordering_key }

    /// Whether values embed entity references.
    pub fn has_entity_refs(&self) -> bool { !self.entity_offsets.is_empty() }

    /// Whether the type survives entity destruction on a cleanup residue.
    pub fn is_cleanup(&self) -> bool { self.cleanup }

    /// Whether values can be copied as raw bytes.
    pub fn is_blittable(&self) -> bool {
        matches!(self.category, Category::Plain | Category::Tag | Category::Buffer)
    }

    /// Bytes occupied per row in a chunk column.
    pub(crate) fn stride(&self) -> usize {
        match self.category {
            Category::Plain => self.size,
            Category::Tag | Category::Shared => 0,
            Category::Buffer | Category::Managed => mem::size_of::<u32>(),
        }
    }

    /// Alignment of the chunk column.
    pub(crate) fn column_align(&self) -> usize {
        match self.category {
            Category::Plain => self.align,
            Category::Tag | Category::Shared => 1,
            Category::Buffer | Category::Managed => mem::align_of::<u32>(),
        }
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("category", &self.category)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

/// 64-bit FNV-1a over the type name, stable across runs and builds.
fn stable_hash(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

unsafe fn write_default<T: Default>(ptr: *mut u8) { ptr.cast::<T>().write(T::default()) }

fn shared_default<T: SharedValue + Default>() -> Box<dyn SharedValue> { Box::new(T::default()) }

/// Collects type registrations before freezing them into a [`Registry`].
pub struct Builder {
    pending: Vec<TypeInfo>,
    by_type: HashMap<TypeId, usize>,
    error:   Option<Error>,
}

impl Default for Builder {
    fn default() -> Self { Self::new() }
}

impl Builder {
    /// Creates a builder with the built-in types registered.
    pub fn new() -> Self {
        let mut builder = Self { pending: Vec::new(), by_type: HashMap::new(), error: None };
        builder.plain::<Entity>();
        builder.tag::<Disabled>();
        builder.tag::<Prefab>();
        builder.tag::<CleanupEntity>();
        builder
    }

    fn push<T: 'static>(
        &mut self,
        category: Category,
        size: usize,
        align: usize,
        write_default: Option<unsafe fn(*mut u8)>,
        shared_default: Option<fn() -> Box<dyn SharedValue>>,
    ) -> Options<'_> {
        let name = any::type_name::<T>();
        let type_id = TypeId::of::<T>();

        if self.by_type.contains_key(&type_id) {
            self.fail(Error::AlreadyRegistered(name));
            return Options { builder: self, slot: None };
        }
        if align > MAX_ALIGN {
            self.fail(Error::AlignmentTooLarge { name, align });
            return Options { builder: self, slot: None };
        }

        let ordering_key = if type_id == TypeId::of::<Entity>() { 0 } else { stable_hash(name) };

        let slot = self.pending.len();
        self.pending.push(TypeInfo {
            name,
            type_id,
            size,
            align,
            category,
            ordering_key,
            memory_order: 0,
            entity_offsets: Box::new([]),
            cleanup: false,
            write_default,
            shared_default,
        });
        self.by_type.insert(type_id, slot);
        Options { builder: self, slot: Some(slot) }
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Registers a plain component stored inline in chunk columns.
    pub fn plain<T: Copy + Default + Send + Sync + 'static>(&mut self) -> Options<'_> {
        self.push::<T>(
            Category::Plain,
            mem::size_of::<T>(),
            mem::align_of::<T>(),
            Some(write_default::<T>),
            None,
        )
    }

    /// Registers a zero-sized tag component.
    pub fn tag<T: Default + Send + Sync + 'static>(&mut self) -> Options<'_> {
        if mem::size_of::<T>() != 0 {
            self.fail(Error::WrongCategory {
                name:     any::type_name::<T>(),
                actual:   Category::Plain,
                expected: Category::Tag,
            });
            return Options { builder: self, slot: None };
        }
        self.push::<T>(Category::Tag, 0, 1, None, None)
    }

    /// Registers a shared component, deduplicated per chunk.
    pub fn shared<T: Clone + Eq + Hash + Default + Send + Sync + 'static>(
        &mut self,
    ) -> Options<'_> {
        self.push::<T>(
            Category::Shared,
            mem::size_of::<T>(),
            mem::align_of::<T>(),
            None,
            Some(shared_default::<T>),
        )
    }

    /// Registers a buffer component with elements of type `T`.
    pub fn buffer<T: Copy + Send + Sync + 'static>(&mut self) -> Options<'_> {
        self.push::<T>(Category::Buffer, mem::size_of::<T>(), mem::align_of::<T>(), None, None)
    }

    /// Registers a managed component holding an arbitrary owned value.
    pub fn managed<T: Clone + Default + Send + Sync + 'static>(&mut self) -> Options<'_> {
        self.push::<T>(Category::Managed, mem::size_of::<T>(), mem::align_of::<T>(), None, None)
    }

    /// Freezes the registrations.
    ///
    /// Types are sorted by their ordering key (ties keep registration order)
    /// and assigned indices in that order.
    pub fn build(self) -> Result<Registry> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut types = self.pending;
        types.sort_by_key(|info| info.ordering_key);
        for info in &mut types {
            let align_rank = u64::from(MAX_ALIGN.trailing_zeros() - info.column_align().trailing_zeros());
            info.memory_order = (align_rank << 56) | (info.ordering_key >> 8);
        }

        let by_type = types
            .iter()
            .enumerate()
            .map(|(index, info)| (info.type_id, TypeIndex(index.small_int())))
            .collect();
        let mut registry =
            Registry { types, by_type, disabled: TypeIndex(0), prefab: TypeIndex(0), cleanup_entity: TypeIndex(0) };
        registry.disabled = registry.index_of::<Disabled>()?;
        registry.prefab = registry.index_of::<Prefab>()?;
        registry.cleanup_entity = registry.index_of::<CleanupEntity>()?;

        log::debug!("registry built with {} types", registry.len());
        Ok(registry)
    }
}

/// Per-type options following a registration call.
pub struct Options<'t> {
    builder: &'t mut Builder,
    slot:    Option<usize>,
}

impl<'t> Options<'t> {
    /// Keeps the component on the cleanup residue when its entity is destroyed.
    pub fn cleanup(self) -> Self {
        if let Some(slot) = self.slot {
            self.builder.pending[slot].cleanup = true;
        }
        self
    }

    /// Declares the byte offsets of embedded [`Entity`] fields,
    /// typically obtained with [`std::mem::offset_of!`].
    /// For buffers, offsets are relative to each element.
    pub fn entity_refs(self, offsets: &[usize]) -> Self {
        if let Some(slot) = self.slot {
            let info = &mut self.builder.pending[slot];
            let bad = offsets.iter().copied().find(|&offset| {
                offset + mem::size_of::<Entity>() > info.size
                    || !matches!(info.category, Category::Plain | Category::Buffer)
            });
            match bad {
                Some(offset) => {
                    let error = Error::EntityOffsetOutOfBounds { name: info.name, offset };
                    self.builder.fail(error);
                }
                None => info.entity_offsets = offsets.into(),
            }
        }
        self
    }
}

/// The frozen set of component types.
#[derive(Debug)]
pub struct Registry {
    types:          Vec<TypeInfo>,
    by_type:        HashMap<TypeId, TypeIndex>,
    disabled:       TypeIndex,
    prefab:         TypeIndex,
    cleanup_entity: TypeIndex,
}

static_assertions::assert_impl_all!(Registry: Send, Sync);

impl Registry {
    /// Starts registering types.
    pub fn builder() -> Builder { Builder::new() }

    /// The number of registered types, including built-ins.
    pub fn len(&self) -> usize { self.types.len() }

    /// Always false; the built-in types are always registered.
    pub fn is_empty(&self) -> bool { self.types.is_empty() }

    /// Gets the metadata of a type.
    pub fn get(&self, ty: TypeIndex) -> Result<&TypeInfo> {
        self.types.get(ty.get()).ok_or(Error::InvalidTypeIndex(ty))
    }

    /// Gets the metadata of a type already validated by the caller.
    pub(crate) fn info(&self, ty: TypeIndex) -> &TypeInfo {
        self.types.get(ty.get()).expect("type index was validated")
    }

    /// Looks up the index of a rust type.
    pub fn index_of<T: 'static>(&self) -> Result<TypeIndex> {
        self.by_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| Error::UnknownType(any::type_name::<T>()))
    }

    /// Looks up the index of a rust type registered with the given category.
    pub(crate) fn typed<T: 'static>(&self, expected: Category) -> Result<TypeIndex> {
        let ty = self.index_of::<T>()?;
        let info = self.info(ty);
        if info.category != expected {
            return Err(Error::WrongCategory { name: info.name, actual: info.category, expected });
        }
        Ok(ty)
    }

    /// The [`Disabled`] tag.
    pub fn disabled(&self) -> TypeIndex { self.disabled }

    /// The [`Prefab`] tag.
    pub fn prefab(&self) -> TypeIndex { self.prefab }

    /// The [`CleanupEntity`] tag.
    pub fn cleanup_entity(&self) -> TypeIndex { self.cleanup_entity }

    /// Iterates over all types in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeIndex, &TypeInfo)> + '_ {
        self.types.iter().enumerate().map(|(index, info)| (TypeIndex(index.small_int()), info))
    }

    /// Sorts an arbitrary type list into canonical order,
    /// inserting the entity type if absent.
    ///
    /// Duplicate and unknown types are rejected.
    pub fn canonicalize(&self, types: &[TypeIndex]) -> Result<Vec<TypeIndex>> {
        let mut sorted = Vec::with_capacity(types.len() + 1);
        if !types.contains(&TypeIndex::ENTITY) {
            sorted.push(TypeIndex::ENTITY);
        }
        for &ty in types {
            self.get(ty)?;
            sorted.push(ty);
        }
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                return Err(Error::DuplicateType(pair[0]));
            }
        }
        Ok(sorted)
    }
}
