use super::Store;
use crate::entity::EntityRemap;
use crate::types::TypeIndex;
use crate::{Entity, Result};

/// Exclusive access to a store for bulk loading.
///
/// While the transaction is open, no dependency can be registered
/// and the ordinary mutation methods of the store fail with
/// [`Error::InExclusiveTransaction`](crate::Error::InExclusiveTransaction).
/// Dropping the guard ends the transaction.
#[derive(Debug)]
pub struct ExclusiveTransaction<'t> {
    store: &'t mut Store,
}

impl<'t> ExclusiveTransaction<'t> {
    pub(super) fn new(store: &'t mut Store) -> Self { Self { store } }

    /// Read access to the store.
    pub fn store(&self) -> &Store { self.store }

    /// Creates `count` entities with the given types.
    pub fn create_entities(&mut self, types: &[TypeIndex], count: usize) -> Result<Vec<Entity>> {
        let mut out = Vec::with_capacity(count);
        self.store.create_in(types, count, &mut out)?;
        Ok(out)
    }

    /// Destroys all given entities.
    pub fn destroy_entities(&mut self, entities: &[Entity]) -> Result<()> {
        self.store.destroy_all(entities)
    }

    /// Moves every entity of `source` into the store.
    pub fn move_entities_from(&mut self, source: &mut Store) -> Result<EntityRemap> {
        self.store.move_all_from(source)
    }

    /// Overwrites a plain component.
    pub fn set<T: 'static>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.store.write(entity, value)
    }
}

impl Drop for ExclusiveTransaction<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.store.deps.end_exclusive_transaction() {
            log::error!("failed to end exclusive transaction: {err}");
        }
    }
}
