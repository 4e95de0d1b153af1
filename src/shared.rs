//! Deduplicated storage for shared component values.
//!
//! A shared value is stored once and referenced by [`SharedHandle`] from every chunk using it.
//! Handle 0 always denotes the default value of the component type
//! and is never reference-counted.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use xias::Xias;

use crate::types::{Category, Registry, TypeIndex};


/// A type-erased shared component value.
pub trait SharedValue: Any + Send + Sync {
    /// Compares with another value, which may be of a different type.
    fn eq_value(&self, other: &dyn SharedValue) -> bool;
    /// Hashes the value together with its type.
    fn hash_value(&self) -> u64;
    /// Clones into a new box.
    fn clone_value(&self) -> Box<dyn SharedValue>;
    /// Upcasts for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Clone + Eq + Hash + Send + Sync + 'static> SharedValue for T {
    fn eq_value(&self, other: &dyn SharedValue) -> bool {
        other.as_any().downcast_ref::<T>().map_or(false, |other| other == self)
    }

    fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<T>().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn clone_value(&self) -> Box<dyn SharedValue> { Box::new(self.clone()) }

    fn as_any(&self) -> &dyn Any { self }
}

/// Refers to a value in a [`SharedStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SharedHandle(pub(crate) u32);

impl SharedHandle {
    /// The default value of any shared type.
    pub const DEFAULT: Self = Self(0);

    /// The raw slot number.
    pub fn index(self) -> u32 { self.0 }

    fn slot(self) -> usize { self.0.small_int() }
}

const NO_FREE: u32 = u32::MAX;

struct Slot {
    value:     Option<Box<dyn SharedValue>>,
    ty:        TypeIndex,
    refcount:  u32,
    version:   u32,
    hash:      u64,
    next_free: u32,
}

/// Stores deduplicated shared values behind reference-counted handles.
pub struct SharedStore {
    slots:        Vec<Slot>,
    free_head:    u32,
    /// Maps value hashes to candidate slots.
    index:        HashMap<u64, Vec<u32>>,
    /// Default values indexed by type; `None` for non-shared types.
    defaults:     Vec<Option<Box<dyn SharedValue>>>,
    next_version: u32,
}

static_assertions::assert_impl_all!(SharedStore: Send, Sync);

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStore").field("live", &self.len()).finish_non_exhaustive()
    }
}

impl SharedStore {
    /// Creates an empty store holding the defaults of all shared types in `registry`.
    pub fn new(registry: &Registry) -> Self {
        let defaults = registry
            .iter()
            .map(|(_, info)| match info.category {
                Category::Shared => info.shared_default.map(|default| default()),
                _ => None,
            })
            .collect();
        let reserved = Slot {
            value:     None,
            ty:        TypeIndex::ENTITY,
            refcount:  0,
            version:   0,
            hash:      0,
            next_free: NO_FREE,
        };

        Self {
            slots: vec![reserved],
            free_head: NO_FREE,
            index: HashMap::new(),
            defaults,
            next_version: 1,
        }
    }

    fn default_of(&self, ty: TypeIndex) -> &dyn SharedValue {
        self.defaults
            .get(ty.get())
            .and_then(Option::as_deref)
            .unwrap_or_else(|| panic!("{ty:?} is not a shared type"))
    }

    /// Finds the handle of an existing value without referencing it.
    pub fn find(&self, ty: TypeIndex, value: &dyn SharedValue) -> Option<SharedHandle> {
        if self.default_of(ty).eq_value(value) {
            return Some(SharedHandle::DEFAULT);
        }

        let candidates = self.index.get(&value.hash_value())?;
        candidates
            .iter()
            .copied()
            .find(|&slot| {
                let slot = &self.slots[slot.small_int::<usize>()];
                slot.ty == ty && slot.value.as_deref().map_or(false, |stored| stored.eq_value(value))
            })
            .map(SharedHandle)
    }

    /// Inserts a value, returning a referenced handle.
    ///
    /// Returns [`SharedHandle::DEFAULT`] for the default value of the type,
    /// otherwise increments the reference count of an equal value or allocates a new slot.
    ///
    /// # Panics
    /// Panics if `ty` is not a shared type.
    pub fn insert(&mut self, ty: TypeIndex, value: Box<dyn SharedValue>) -> SharedHandle {
        if let Some(handle) = self.find(ty, &*value) {
            self.add_reference(handle, 1);
            return handle;
        }

        let hash = value.hash_value();
        let version = self.next_version;
        self.next_version = self.next_version.wrapping_add(1).max(1);

        let slot = Slot { value: Some(value), ty, refcount: 1, version, hash, next_free: NO_FREE };
        let index = if self.free_head == NO_FREE {
            let index = self.slots.len().small_int();
            self.slots.push(slot);
            index
        } else {
            let index = self.free_head;
            let target = &mut self.slots[index.small_int::<usize>()];
            self.free_head = target.next_free;
            *target = slot;
            index
        };

        self.index.entry(hash).or_default().push(index);
        log::trace!("allocated shared slot {index} for {ty:?}");
        SharedHandle(index)
    }

    /// Adds `count` references to a handle.
    pub fn add_reference(&mut self, handle: SharedHandle, count: u32) {
        if handle == SharedHandle::DEFAULT {
            return;
        }

        let slot = self.slots.get_mut(handle.slot()).expect("shared handle out of bounds");
        assert!(slot.value.is_some(), "cannot reference released shared handle {handle:?}");
        slot.refcount += count;
    }

    /// Removes `count` references from a handle, releasing its slot at zero.
    pub fn remove_reference(&mut self, handle: SharedHandle, count: u32) {
        if handle == SharedHandle::DEFAULT || count == 0 {
            return;
        }

        let slot = self.slots.get_mut(handle.slot()).expect("shared handle out of bounds");
        assert!(slot.value.is_some(), "cannot release released shared handle {handle:?}");
        assert!(
            slot.refcount >= count,
            "shared handle {handle:?} has {} references, cannot remove {count}",
            slot.refcount
        );
        slot.refcount -= count;
        if slot.refcount > 0 {
            return;
        }

        slot.value = None;
        slot.next_free = self.free_head;
        let hash = slot.hash;
        self.free_head = handle.0;

        if let Some(candidates) = self.index.get_mut(&hash) {
            candidates.retain(|&index| index != handle.0);
            if candidates.is_empty() {
                self.index.remove(&hash);
            }
        }
        log::trace!("released shared slot {}", handle.0);
    }

    /// Gets the value behind a handle, resolving the default handle through `ty`.
    pub fn get(&self, ty: TypeIndex, handle: SharedHandle) -> &dyn SharedValue {
        if handle == SharedHandle::DEFAULT {
            return self.default_of(ty);
        }
        self.slots
            .get(handle.slot())
            .and_then(|slot| slot.value.as_deref())
            .unwrap_or_else(|| panic!("shared handle {handle:?} is not live"))
    }

    /// The type stored behind a live handle.
    pub fn type_of(&self, handle: SharedHandle) -> Option<TypeIndex> {
        let slot = self.slots.get(handle.slot())?;
        slot.value.as_ref().map(|_| slot.ty)
    }

    /// The reference count of a handle; 0 for the default or a released handle.
    pub fn refcount(&self, handle: SharedHandle) -> u32 {
        self.slots.get(handle.slot()).map_or(0, |slot| slot.refcount)
    }

    /// The version assigned when the slot was last filled.
    pub fn version(&self, handle: SharedHandle) -> u32 {
        self.slots.get(handle.slot()).map_or(0, |slot| slot.version)
    }

    /// The number of live non-default values.
    pub fn len(&self) -> usize { self.slots.iter().filter(|slot| slot.value.is_some()).count() }

    /// Whether only the default handle is live.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Iterates over live handles and their reference counts.
    pub fn iter(&self) -> impl Iterator<Item = (SharedHandle, u32)> + '_ {
        self.slots.iter().enumerate().filter(|(_, slot)| slot.value.is_some()).map(
            |(index, slot)| (SharedHandle(index.small_int()), slot.refcount),
        )
    }

    /// Re-inserts the values behind `handles` into `dest`.
    ///
    /// The returned map holds one reference on each destination handle,
    /// which must be dropped with [`release_migrated`](Self::release_migrated)
    /// once the caller has taken its own references.
    pub fn migrate(
        &self,
        handles: impl IntoIterator<Item = SharedHandle>,
        dest: &mut SharedStore,
    ) -> HashMap<SharedHandle, SharedHandle> {
        let mut map = HashMap::new();
        map.insert(SharedHandle::DEFAULT, SharedHandle::DEFAULT);

        for handle in handles {
            if map.contains_key(&handle) {
                continue;
            }

            let slot = self.slots.get(handle.slot()).expect("shared handle out of bounds");
            let value = slot.value.as_deref().expect("migrated shared handle is live");
            let new = dest.insert(slot.ty, value.clone_value());
            map.insert(handle, new);
        }

        map
    }

    /// Drops the references held by a map returned from [`migrate`](Self::migrate).
    pub fn release_migrated(&mut self, map: &HashMap<SharedHandle, SharedHandle>) {
        for (&old, &new) in map {
            if old != SharedHandle::DEFAULT {
                self.remove_reference(new, 1);
            }
        }
    }
}
