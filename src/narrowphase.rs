use glam::DVec2;

use crate::api::NarrowphaseApi;
use crate::body::Shape;
use crate::types::{Aabb, Side};

/// Time-of-impact results earlier than this are treated as numerical noise
/// around an existing touch, not as a past collision.
pub const TOI_BACKTRACK: f64 = -0.0001;

/// Slack on the orthogonal axis: boxes that only share an edge do not block.
pub const EDGE_SLACK: f64 = 1e-6;

/// A body moving at constant velocity for the rest of the step.
#[derive(Copy, Clone, Debug)]
pub struct SweptBody {
    pub center: DVec2,
    pub velocity: DVec2,
    pub shape: Shape,
}

/// First impact of `a` against `b`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Impact {
    /// Time from the start of the sweep.
    pub time: f64,
    /// Centre of `a` at impact, flush against `b` on the impact axis.
    pub position: DVec2,
    /// Side of `a` that got blocked.
    pub side: Side,
}

/// Outcome of pushing an overlapping body out of another.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Moved flush to `position`; blocked on `side` afterwards.
    Push { side: Side, position: DVec2 },
    /// The shallowest way out is already blocked by a contact.
    Stuck,
}

/// Ray hit against a single box.
#[derive(Copy, Clone, Debug)]
pub struct RayHit {
    pub toi: f64,
    pub normal: DVec2,
    pub point: DVec2,
}

pub struct Narrowphase;

impl Narrowphase {
    fn axis_toi(
        p1: f64,
        p2: f64,
        v1: f64,
        v2: f64,
        extent: f64,
        faces: (bool, bool),
        blocked: (bool, bool),
    ) -> f64 {
        // faces/blocked: (a hits b on a's positive face, a hits b on a's negative face)
        if v1 == v2 {
            return f64::INFINITY;
        }
        if p1 < p2 {
            if v1 > v2 && faces.0 && !blocked.0 {
                return (p1 - p2 + extent) / (v2 - v1);
            }
        } else if v1 < v2 && faces.1 && !blocked.1 {
            return (p1 - p2 - extent) / (v2 - v1);
        }
        f64::INFINITY
    }

    fn spans_overlap(c1: f64, h1: f64, c2: f64, h2: f64) -> bool {
        c1 + h1 > c2 - h2 + EDGE_SLACK && c1 - h1 + EDGE_SLACK < c2 + h2
    }

    fn x_impact(a: &SweptBody, b: &SweptBody, t: f64) -> Option<Impact> {
        let ya = a.center.y + t * a.velocity.y;
        let yb = b.center.y + t * b.velocity.y;
        if !Self::spans_overlap(ya, a.shape.height * 0.5, yb, b.shape.height * 0.5) {
            return None;
        }
        let xb = b.center.x + t * b.velocity.x;
        let reach = (a.shape.width + b.shape.width) * 0.5;
        let (side, x) = if a.center.x < b.center.x {
            (Side::Right, xb - reach)
        } else {
            (Side::Left, xb + reach)
        };
        Some(Impact {
            time: t,
            position: DVec2::new(x, ya),
            side,
        })
    }

    fn y_impact(a: &SweptBody, b: &SweptBody, t: f64) -> Option<Impact> {
        let xa = a.center.x + t * a.velocity.x;
        let xb = b.center.x + t * b.velocity.x;
        if !Self::spans_overlap(xa, a.shape.width * 0.5, xb, b.shape.width * 0.5) {
            return None;
        }
        let yb = b.center.y + t * b.velocity.y;
        let reach = (a.shape.height + b.shape.height) * 0.5;
        let (side, y) = if a.center.y < b.center.y {
            (Side::Up, yb - reach)
        } else {
            (Side::Down, yb + reach)
        };
        Some(Impact {
            time: t,
            position: DVec2::new(xa, y),
            side,
        })
    }
}

impl NarrowphaseApi for Narrowphase {
    fn time_of_impact(
        a: &SweptBody,
        b: &SweptBody,
        remaining: f64,
        blocked: [bool; 4],
    ) -> Option<Impact> {
        let toix = Self::axis_toi(
            a.center.x,
            b.center.x,
            a.velocity.x,
            b.velocity.x,
            (a.shape.width + b.shape.width) * 0.5,
            (a.shape.right && b.shape.left, a.shape.left && b.shape.right),
            (blocked[Side::Right.index()], blocked[Side::Left.index()]),
        );
        let toiy = Self::axis_toi(
            a.center.y,
            b.center.y,
            a.velocity.y,
            b.velocity.y,
            (a.shape.height + b.shape.height) * 0.5,
            (a.shape.up && b.shape.down, a.shape.down && b.shape.up),
            (blocked[Side::Up.index()], blocked[Side::Down.index()]),
        );
        let valid = |t: f64| t < remaining && t > TOI_BACKTRACK;

        // The later axis entry is the face that actually touches first.
        if toix > toiy {
            if valid(toix) {
                if let Some(hit) = Self::x_impact(a, b, toix) {
                    return Some(hit);
                }
            }
            if valid(toiy) {
                return Self::y_impact(a, b, toiy);
            }
        } else {
            if valid(toiy) {
                if let Some(hit) = Self::y_impact(a, b, toiy) {
                    return Some(hit);
                }
            }
            if valid(toix) {
                return Self::x_impact(a, b, toix);
            }
        }
        None
    }

    fn solve_overlap(a_center: DVec2, a: &Shape, b_center: DVec2, b: &Shape, free: [bool; 4]) -> Resolution {
        let (ha, hb) = (a.half(), b.half());
        // Contact side after the push, depth, new centre. Order breaks ties;
        // the shallowest push whose way out is free wins.
        let candidates = [
            (Side::Down, (b_center.y + hb.y) - (a_center.y - ha.y), DVec2::new(a_center.x, b_center.y + hb.y + ha.y)),
            (Side::Up, (a_center.y + ha.y) - (b_center.y - hb.y), DVec2::new(a_center.x, b_center.y - hb.y - ha.y)),
            (Side::Right, (a_center.x + ha.x) - (b_center.x - hb.x), DVec2::new(b_center.x - hb.x - ha.x, a_center.y)),
            (Side::Left, (b_center.x + hb.x) - (a_center.x - ha.x), DVec2::new(b_center.x + hb.x + ha.x, a_center.y)),
        ];
        let mut best: Option<(Side, f64, DVec2)> = None;
        for c in candidates {
            if free[c.0.index()] && best.is_none_or(|b| c.1 < b.1) {
                best = Some(c);
            }
        }
        match best {
            Some((side, _, position)) => Resolution::Push { side, position },
            None => Resolution::Stuck,
        }
    }

    fn overlaps(a: &Aabb, b: &Aabb, slack: f64) -> bool {
        a.min.x + slack < b.max.x
            && a.max.x > b.min.x + slack
            && a.min.y + slack < b.max.y
            && a.max.y > b.min.y + slack
    }

    fn ray_aabb(origin: DVec2, dir: DVec2, aabb: &Aabb) -> Option<RayHit> {
        // Slab method with normal tracking; returns earliest t >= 0
        let mut tmin = f64::NEG_INFINITY;
        let mut tmax = f64::INFINITY;
        let mut n_enter = DVec2::ZERO;

        for axis in 0..2 {
            let (o, d, lo, hi) = (origin[axis], dir[axis], aabb.min[axis], aabb.max[axis]);
            if d.abs() < f64::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t1 = (lo - o) * inv;
            let mut t2 = (hi - o) * inv;
            let mut n = -1.0;
            if t1 > t2 {
                core::mem::swap(&mut t1, &mut t2);
                n = 1.0;
            }
            if t1 > tmin {
                tmin = t1;
                n_enter = DVec2::ZERO;
                n_enter[axis] = n;
            }
            tmax = tmax.min(t2);
            if tmin > tmax || tmax < 0.0 {
                return None;
            }
        }

        // Origin inside: immediate hit, no face normal
        let inside = tmin < 0.0;
        let toi = if inside { 0.0 } else { tmin };
        Some(RayHit {
            toi,
            normal: if inside { DVec2::ZERO } else { n_enter },
            point: origin + dir * toi,
        })
    }
}
