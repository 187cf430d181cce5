use glam::DVec2;

use crate::arena::{BodyId, EntityId};
use crate::body::Shape;
use crate::narrowphase::{Impact, RayHit, Resolution, SweptBody};
use crate::types::*;

/// Per-entity callbacks. Every method defaults to a no-op so listeners
/// implement only what they care about.
///
/// Callbacks run after the operation that produced them has finished, so the
/// world is consistent (contacts and overlaps already reflect the event).
pub trait EntityListener {
    fn contact_start(&mut self, _contact: &Contact) {}
    fn contact_end(&mut self, _contact: &Contact) {}
    fn overlap_start(&mut self, _body: BodyId, _other: BodyId) {}
    fn overlap_end(&mut self, _body: BodyId, _other: BodyId) {}
    fn crush_start(&mut self) {}
    fn crush_end(&mut self) {}
}

/// Spatial queries against the current state of the world.
pub trait SpatialQuery {
    // --- Queries -----------------------------------------------------------

    /// Closest enabled, non-sensor body hit by the ray `origin + t * dir`,
    /// `t` in `[0, 1]`.
    fn raycast(&self, origin: DVec2, dir: DVec2) -> Option<RaycastHit>;

    /// Every enabled body whose box intersects the rectangle with lower-left
    /// corner `(x, y)` and size `w x h`, sorted by owning entity then body.
    fn query_rect(&self, x: f64, y: f64, w: f64, h: f64) -> Vec<(EntityId, BodyId)>;

    /// Bodies containing the point.
    fn query_point(&self, x: f64, y: f64) -> Vec<(EntityId, BodyId)> {
        self.query_rect(x, y, 0.0, 0.0)
    }
}

/// Narrowphase primitives used by the solver.
pub trait NarrowphaseApi {
    // Sweeps ----------------------------------------------------------------

    /// Earliest impact of `a` against `b` within `remaining` time. `blocked`
    /// (indexed by [`Side`]) marks axes already resolved against `b`'s top
    /// entity.
    fn time_of_impact(a: &SweptBody, b: &SweptBody, remaining: f64, blocked: [bool; 4]) -> Option<Impact>;

    // Overlaps --------------------------------------------------------------

    /// Push `a` out of `b` along the shallowest free way out. `free` (indexed
    /// by the contact side `a` would end up with) marks sides without a
    /// contact; with none free the pair is stuck.
    fn solve_overlap(a_center: DVec2, a: &Shape, b_center: DVec2, b: &Shape, free: [bool; 4]) -> Resolution;

    /// Strict overlap deeper than `slack` on both axes.
    fn overlaps(a: &Aabb, b: &Aabb, slack: f64) -> bool;

    // Rays ------------------------------------------------------------------

    fn ray_aabb(origin: DVec2, dir: DVec2, aabb: &Aabb) -> Option<RayHit>;
}
