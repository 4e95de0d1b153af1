use std::sync::Arc;

use crate::entity::Location;
use crate::test_util::{self, Position, Types};
use crate::{Entity, Store};

mod migrate;
mod structural;

fn position(x: f32) -> Position { Position { x, y: -x } }

fn location(store: &Store, entity: Entity) -> Location {
    store.entities().location(entity).expect("entity is live")
}

/// Two empty stores over the same registry.
fn store_pair() -> (Store, Store, Types) {
    let registry = test_util::registry();
    let types = Types::of(&registry);
    (Store::new(Arc::clone(&registry)), Store::new(registry), types)
}
