//! Side table for buffer and managed component values.
//!
//! Chunk columns of these categories only hold a 4-byte handle into the table.
//! Handle 0 means "not allocated yet": an empty buffer or an unset managed value.

use std::any::Any;
use std::fmt;

use xias::Xias;

use crate::Entity;

const TYPE_MISMATCH: &str = "object type matches its registration";

/// A value owned by the object table.
pub(crate) trait Object: Any + Send + Sync {
    fn clone_object(&self) -> Box<dyn Object>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Visits every embedded entity, given the byte offsets of entity fields.
    fn visit_entities(&mut self, _offsets: &[usize], _visitor: &mut dyn FnMut(&mut Entity)) {}
}

/// Storage of a buffer component.
pub(crate) struct BufferObject<T>(pub(crate) Vec<T>);

impl<T: Copy + Send + Sync + 'static> Object for BufferObject<T> {
    fn clone_object(&self) -> Box<dyn Object> { Box::new(Self(self.0.clone())) }

    fn as_any(&self) -> &dyn Any { self }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn visit_entities(&mut self, offsets: &[usize], visitor: &mut dyn FnMut(&mut Entity)) {
        for element in &mut self.0 {
            let base = (element as *mut T).cast::<u8>();
            for &offset in offsets {
                // SAFETY: offsets were validated against `size_of::<T>()` at registration,
                // and point to `Entity` fields which may be unaligned in packed types.
                unsafe {
                    let ptr = base.add(offset).cast::<Entity>();
                    let mut entity = ptr.read_unaligned();
                    visitor(&mut entity);
                    ptr.write_unaligned(entity);
                }
            }
        }
    }
}

/// Storage of a managed component.
pub(crate) struct ManagedObject<T>(pub(crate) T);

impl<T: Clone + Send + Sync + 'static> Object for ManagedObject<T> {
    fn clone_object(&self) -> Box<dyn Object> { Box::new(Self(self.0.clone())) }

    fn as_any(&self) -> &dyn Any { self }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

/// A slab of objects addressed by `u32` handles.
#[derive(Default)]
pub(crate) struct ObjectTable {
    slots: Vec<Option<Box<dyn Object>>>,
    free:  Vec<u32>,
}

impl fmt::Debug for ObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTable").field("live", &self.len()).finish_non_exhaustive()
    }
}

impl ObjectTable {
    /// Stores an object, returning its nonzero handle.
    pub(crate) fn insert(&mut self, object: Box<dyn Object>) -> u32 {
        if self.slots.is_empty() {
            self.slots.push(None);
        }

        match self.free.pop() {
            Some(handle) => {
                let slot = &mut self.slots[handle.small_int::<usize>()];
                debug_assert!(slot.is_none());
                *slot = Some(object);
                handle
            }
            None => {
                let handle = self.slots.len().small_int();
                self.slots.push(Some(object));
                handle
            }
        }
    }

    /// Drops the object behind a handle. Handle 0 is ignored.
    pub(crate) fn remove(&mut self, handle: u32) {
        if let Some(object) = self.take(handle) {
            drop(object);
        }
    }

    /// Takes the object out of the table, freeing its handle.
    pub(crate) fn take(&mut self, handle: u32) -> Option<Box<dyn Object>> {
        if handle == 0 {
            return None;
        }

        let object = self.slots.get_mut(handle.small_int::<usize>())?.take();
        if object.is_some() {
            self.free.push(handle);
        }
        object
    }

    /// Duplicates the object behind a handle. Handle 0 duplicates to 0.
    pub(crate) fn clone_handle(&mut self, handle: u32) -> u32 {
        match self.get(handle) {
            Some(object) => {
                let copy = object.clone_object();
                self.insert(copy)
            }
            None => 0,
        }
    }

    pub(crate) fn get(&self, handle: u32) -> Option<&dyn Object> {
        if handle == 0 {
            return None;
        }
        self.slots.get(handle.small_int::<usize>())?.as_deref()
    }

    pub(crate) fn get_mut(&mut self, handle: u32) -> Option<&mut (dyn Object + 'static)> {
        if handle == 0 {
            return None;
        }
        self.slots.get_mut(handle.small_int::<usize>())?.as_deref_mut()
    }

    /// The elements of a buffer. Handle 0 is an empty buffer.
    pub(crate) fn buffer<T: 'static>(&self, handle: u32) -> &[T] {
        match self.get(handle) {
            Some(object) => &object.as_any().downcast_ref::<BufferObject<T>>().expect(TYPE_MISMATCH).0,
            None => &[],
        }
    }

    /// The elements of a buffer, allocating the buffer if `handle` is 0.
    pub(crate) fn buffer_mut<T: Copy + Send + Sync + 'static>(&mut self, handle: &mut u32) -> &mut Vec<T> {
        if *handle == 0 {
            *handle = self.insert(Box::new(BufferObject::<T>(Vec::new())));
        }
        let object = self.get_mut(*handle).expect("handle was just checked");
        &mut object.as_any_mut().downcast_mut::<BufferObject<T>>().expect(TYPE_MISMATCH).0
    }

    /// The value of a managed component, if it was ever set.
    pub(crate) fn managed<T: 'static>(&self, handle: u32) -> Option<&T> {
        let object = self.get(handle)?;
        Some(&object.as_any().downcast_ref::<ManagedObject<T>>().expect(TYPE_MISMATCH).0)
    }

    /// The value of a managed component, initializing it to the default if `handle` is 0.
    pub(crate) fn managed_mut<T: Clone + Default + Send + Sync + 'static>(
        &mut self,
        handle: &mut u32,
    ) -> &mut T {
        if *handle == 0 {
            *handle = self.insert(Box::new(ManagedObject(T::default())));
        }
        let object = self.get_mut(*handle).expect("handle was just checked");
        &mut object.as_any_mut().downcast_mut::<ManagedObject<T>>().expect(TYPE_MISMATCH).0
    }

    /// The number of live objects.
    pub(crate) fn len(&self) -> usize { self.slots.iter().filter(|slot| slot.is_some()).count() }
}

#[cfg(test)]
mod tests {
    use super::{BufferObject, ManagedObject, Object, ObjectTable};
    use crate::Entity;

    #[test]
    fn test_handles_start_at_one_and_recycle() {
        let mut table = ObjectTable::default();
        let a = table.insert(Box::new(ManagedObject(String::from("a"))));
        let b = table.insert(Box::new(ManagedObject(String::from("b"))));
        assert_eq!((a, b), (1, 2));

        table.remove(a);
        assert_eq!(table.len(), 1);
        let c = table.insert(Box::new(ManagedObject(String::from("c"))));
        assert_eq!(c, a);

        table.remove(0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_clone_handle_copies_value() {
        let mut table = ObjectTable::default();
        let a = table.insert(Box::new(BufferObject(vec![1_u32, 2, 3])));
        let b = table.clone_handle(a);
        assert_ne!(a, b);
        assert_eq!(table.clone_handle(0), 0);

        let copy = table.get_mut(b).expect("cloned").as_any_mut();
        copy.downcast_mut::<BufferObject<u32>>().expect("same type").0.push(4);

        let original = table.get(a).expect("live").as_any();
        assert_eq!(original.downcast_ref::<BufferObject<u32>>().expect("same type").0, [1, 2, 3]);
    }

    #[test]
    fn test_visit_buffer_entities() {
        #[derive(Clone, Copy)]
        #[repr(C)]
        struct Link {
            weight: u32,
            target: Entity,
        }

        let mut buffer = BufferObject(vec![
            Link { weight: 1, target: Entity { index: 4, generation: 1 } },
            Link { weight: 2, target: Entity { index: 5, generation: 1 } },
        ]);
        let offsets = [std::mem::offset_of!(Link, target)];
        Object::visit_entities(&mut buffer, &offsets, &mut |entity| entity.index += 10);

        assert_eq!(buffer.0[0].target.index(), 14);
        assert_eq!(buffer.0[1].target.index(), 15);
        assert_eq!(buffer.0[1].weight, 2);
    }
}
