//! tilebonk: deterministic tile-aware 2D AABB physics
//!
//! A [`World`] owns a tree of entities. Each entity carries rectangles,
//! one-way lines or run-length-encoded tile grids; grids generate merged
//! collision bodies from their tiles as they are edited. Every step runs a
//! swept broadphase, resolves entities level by level with time of impact
//! and discrete overlap correction, and reports contacts, overlaps and
//! crushes to per-entity listeners.
//!
//! # Determinism
//!
//! Given the same sequence of calls, a world produces bit-identical
//! positions, contacts and events. Levels are visited in ascending order,
//! entities within a level in insertion order, and every pair list coming
//! out of the spatial index is sorted. Nothing in a step iterates a hash map.

pub mod api;
pub mod arena;
pub mod body;
pub mod entity;
pub mod grid;
pub mod layers;
pub mod narrowphase;
mod solver;
pub mod subgrid;
pub mod types;
pub mod vbh;
pub mod world;

pub use crate::api::*;
pub use crate::arena::{BodyId, EntityId};
pub use crate::body::{Body, BodyDesc, BodyKind, LineDesc, LineSide, Orientation, RectDesc, Shape};
pub use crate::entity::{Entity, EntityDesc};
pub use crate::grid::{GridDesc, TileArgs, TilePlacement, TileRect, TileRegion};
pub use crate::subgrid::{Tile, TileShape};
pub use crate::types::*;
pub use crate::world::{World, create_world};

/// Penetration below this depth is treated as touching.
pub const EPS: f64 = 0.001;

/// Upper bound on time of impact passes per entity and step. Each pass
/// settles at least one contact, so stacks deeper than this stop early and
/// finish the step where the last pass left them.
pub const MAX_CORRECTION_PASSES: usize = 10;

/// Errors returned by fallible world operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhysicsError {
    #[error("layer table is full ({limit} layers)")]
    LayerCapacity { limit: usize },

    #[error("rules involving the default layer cannot be changed")]
    DefaultLayerRule,

    #[error("entity {0:?} does not exist (destroyed or never created)")]
    StaleEntity(EntityId),

    #[error("body {0:?} does not exist (destroyed or never created)")]
    StaleBody(BodyId),

    #[error("body {body:?} is not a {expected} body")]
    WrongBodyKind { body: BodyId, expected: &'static str },

    #[error("body {0:?} is generated from tiles; edit the tiles instead")]
    GeneratedBody(BodyId),

    #[error("line side {side:?} does not fit a {orientation:?} line")]
    InvalidLineSide { side: LineSide, orientation: Orientation },

    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    ParentCycle { child: EntityId, parent: EntityId },

    #[error("tile ({x}, {y}) is outside the addressable grid range")]
    TileOutOfRange { x: i32, y: i32 },

    #[error("dimension {value} is out of range")]
    InvalidDimension { value: f64 },
}
