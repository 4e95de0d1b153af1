use crate::Entity;

/// An 8-byte plain component.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// An 8-byte plain component.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

/// A 4-byte plain component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Health(pub u32);

/// A plain component with 32-byte alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C, align(32))]
pub struct Matrix(pub [f32; 8]);

/// A plain component referencing another entity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Target {
    pub range:  f32,
    pub entity: Entity,
}

/// A cleanup component, retained after its entity is destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tracked(pub u32);

/// A plain component too large to fit twice in one chunk.
#[derive(Clone, Copy)]
pub struct Blob<const N: usize>(pub [u8; 9000]);

impl<const N: usize> Default for Blob<N> {
    fn default() -> Self { Self([0; 9000]) }
}

/// A tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Enemy;

/// A cleanup tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Spawned;

/// A shared component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MeshKey(pub u32);

/// Another shared component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Team(pub String);

/// A buffer element referencing another entity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Waypoint {
    pub cost:   u32,
    pub target: Entity,
}

/// A managed component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Name(pub String);
