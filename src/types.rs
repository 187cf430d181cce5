use glam::DVec2;

use crate::arena::{BodyId, EntityId};

/// Axis-aligned box stored as min/max corners.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec2,
    pub max: DVec2,
}

impl Aabb {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    /// Box centred on `center` with full `width`/`height`.
    pub fn from_center(center: DVec2, width: f64, height: f64) -> Self {
        let half = DVec2::new(width * 0.5, height * 0.5);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> DVec2 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec2 {
        self.max - self.min
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Inclusive test: touching boxes intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        !(self.max.x < other.min.x
            || self.min.x > other.max.x
            || self.max.y < other.min.y
            || self.min.y > other.max.y)
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
    }

    pub fn contains_point(&self, p: DVec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn translate(&self, by: DVec2) -> Aabb {
        Aabb {
            min: self.min + by,
            max: self.max + by,
        }
    }

    /// Grow toward the direction of travel (`motion` is the full frame
    /// displacement) and by `margin` on every side.
    pub fn swept(&self, motion: DVec2, margin: f64) -> Aabb {
        let pad = DVec2::splat(margin);
        Aabb {
            min: self.min + motion.min(DVec2::ZERO) * 2.0 - pad,
            max: self.max + motion.max(DVec2::ZERO) * 2.0 + pad,
        }
    }

    /// Half perimeter; the insertion cost metric of the AABB tree.
    pub fn perimeter(&self) -> f64 {
        let s = self.size();
        s.x + s.y
    }
}

/// Side of an entity blocked by a contact. `Right` means the supporting
/// body lies to the right of the entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Right = 0,
    Left = 1,
    Up = 2,
    Down = 3,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Right, Side::Left, Side::Up, Side::Down];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Right => Side::Left,
            Side::Left => Side::Right,
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Side::Right | Side::Left)
    }
}

/// Index into the world's layer table (0 is `"default"`).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u8);

impl LayerId {
    pub const DEFAULT: LayerId = LayerId(0);
}

/// Collision rule between two layers, stored as two bits per layer pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LayerRule {
    Never = 0,
    /// Collide only when the two bodies carry different groups.
    UnequalGroup = 1,
    /// Collide only when the two bodies carry the same group.
    EqualGroup = 2,
    Always = 3,
}

impl LayerRule {
    pub fn from_bits(bits: u64) -> LayerRule {
        match bits & 0b11 {
            0 => LayerRule::Never,
            1 => LayerRule::UnequalGroup,
            2 => LayerRule::EqualGroup,
            _ => LayerRule::Always,
        }
    }

    pub fn bits(self) -> u64 {
        self as u64
    }

    pub fn allows(self, group_a: u32, group_b: u32) -> bool {
        match self {
            LayerRule::Never => false,
            LayerRule::UnequalGroup => group_a != group_b,
            LayerRule::EqualGroup => group_a == group_b,
            LayerRule::Always => true,
        }
    }
}

/// How a child entity is attached to its parent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParentType {
    /// Bodies become part of the parent's top entity and move rigidly with it.
    Static,
    /// Simulated on its own, inheriting the parent's velocity.
    Follow,
}

/// `body` (owned by the resting top entity) is blocked on `side` by `other_body`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub body: BodyId,
    pub other_body: BodyId,
    pub side: Side,
}

/// Event discriminator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    ContactStart(Contact),
    ContactEnd(Contact),
    OverlapStart { body: BodyId, other: BodyId },
    OverlapEnd { body: BodyId, other: BodyId },
    CrushStart,
    CrushEnd,
}

/// Event delivered to `entity`'s listener and queued for [`crate::World::drain_events`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub entity: EntityId,
    pub kind: EventKind,
}

/// World-level configuration.
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Use the binary AABB tree for the entity broadphase instead of the
    /// all-pairs list. Worth it past a few dozen moving entities.
    pub use_tree_index: bool,
    /// Padding added around swept boxes before pairing.
    pub broadphase_margin: f64,
    /// Maximum number of events held for `drain_events`; extra are dropped
    /// from the queue (listeners still see them).
    pub max_events: usize,
    /// Enable internal timing instrumentation.
    pub enable_timing: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            use_tree_index: false,
            broadphase_margin: 0.1,
            max_events: 4096,
            enable_timing: false,
        }
    }
}

/// Counters from the last `simulate` call.
#[derive(Copy, Clone, Debug, Default)]
pub struct WorldStats {
    pub entities: usize,
    pub top_entities: usize,
    pub bodies: usize,
    /// Entity pairs reported by the spatial index.
    pub candidate_pairs: usize,
    /// Body pairs that survived layer filtering.
    pub body_pairs: usize,
}

/// Timing breakdown for the last `simulate` call.
#[derive(Copy, Clone, Debug, Default)]
pub struct WorldTiming {
    pub simulate_ms: f64,
    pub broadphase_ms: f64,
    pub narrowphase_ms: f64,
    pub overlap_ms: f64,
    pub events_emitted: usize,
}

/// Closest body hit by a ray.
#[derive(Copy, Clone, Debug)]
pub struct RaycastHit {
    pub entity: EntityId,
    pub body: BodyId,
    /// Distance along the ray in units of the direction vector.
    pub toi: f64,
    pub point: DVec2,
    /// Face normal at the hit point; zero when the ray starts inside.
    pub normal: DVec2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_touching_intersects() {
        let a = Aabb::from_center(DVec2::ZERO, 2.0, 2.0);
        let b = Aabb::from_center(DVec2::new(2.0, 0.0), 2.0, 2.0);
        let c = Aabb::from_center(DVec2::new(2.5, 0.0), 2.0, 2.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains_point(DVec2::new(1.0, -1.0)));
        assert!(!c.contains_point(DVec2::ZERO));
    }

    #[test]
    fn test_swept_grows_toward_motion() {
        let a = Aabb::from_center(DVec2::ZERO, 1.0, 1.0);
        let s = a.swept(DVec2::new(1.0, -2.0), 0.0);
        assert_eq!(s.min, DVec2::new(-0.5, -4.5));
        assert_eq!(s.max, DVec2::new(2.5, 0.5));
    }

    #[test]
    fn test_layer_rule_groups() {
        assert!(LayerRule::Always.allows(1, 1));
        assert!(!LayerRule::Never.allows(1, 2));
        assert!(LayerRule::EqualGroup.allows(4, 4));
        assert!(!LayerRule::EqualGroup.allows(4, 5));
        assert!(LayerRule::UnequalGroup.allows(4, 5));
        assert!(!LayerRule::UnequalGroup.allows(4, 4));
        for r in [LayerRule::Never, LayerRule::UnequalGroup, LayerRule::EqualGroup, LayerRule::Always] {
            assert_eq!(LayerRule::from_bits(r.bits()), r);
        }
    }

    #[test]
    fn test_side_opposites() {
        for s in Side::ALL {
            assert_eq!(s.opposite().opposite(), s);
            assert_eq!(s.is_horizontal(), s.opposite().is_horizontal());
        }
    }
}
