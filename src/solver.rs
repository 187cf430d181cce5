//! One simulation step: swept broadphase, per-entity resolution in level
//! order, then overlap tracking.

use std::collections::BTreeSet;
use std::time::Instant;

use glam::DVec2;

use crate::api::NarrowphaseApi;
use crate::arena::{BodyId, EntityId};
use crate::narrowphase::{Impact, Narrowphase, Resolution, SweptBody};
use crate::types::{Contact, EventKind, Side, WorldStats, WorldTiming};
use crate::vbh::Vbh;
use crate::world::World;
use crate::{EPS, MAX_CORRECTION_PASSES};

fn elapsed_ms(start: Option<Instant>) -> f64 {
    start.map(|t| t.elapsed().as_secs_f64() * 1000.0).unwrap_or(0.0)
}

fn stopwatch(enabled: bool) -> Option<Instant> {
    if enabled { Some(Instant::now()) } else { None }
}

impl World {
    /// Advance the world by `delta` seconds.
    ///
    /// Lower levels are resolved first; an entity collides only with bodies
    /// of strictly lower levels, seen at their already-resolved positions.
    /// Sensors and same-level pairs produce overlap events instead.
    pub fn simulate(&mut self, delta: f64) {
        if !delta.is_finite() || delta <= 0.0 {
            tracing::warn!(delta, "ignoring step with invalid delta");
            return;
        }
        let _span = tracing::trace_span!("simulate", delta).entered();
        let timed = self.cfg.enable_timing;
        let step = stopwatch(timed);
        self.time += delta;

        let t = stopwatch(timed);
        let candidates = self.broadphase(delta);
        let broadphase_ms = elapsed_ms(t);

        let t = stopwatch(timed);
        let mut resolved = BTreeSet::new();
        for id in self.top_entities() {
            self.resolve(id, delta, &resolved);
            resolved.insert(id);
        }
        let narrowphase_ms = elapsed_ms(t);

        let t = stopwatch(timed);
        self.update_overlaps(&candidates);
        let overlap_ms = elapsed_ms(t);

        let events_emitted = self.pending.len();
        self.flush_events();
        self.last_timing = timed.then(|| WorldTiming {
            simulate_ms: elapsed_ms(step),
            broadphase_ms,
            narrowphase_ms,
            overlap_ms,
            events_emitted,
        });
    }

    /// Global velocity of a top entity, following parents up the chain.
    fn motion(&self, id: EntityId) -> DVec2 {
        let mut v = DVec2::ZERO;
        let mut cur = self.entities.get(id.0);
        while let Some(e) = cur {
            v += e.velocity;
            cur = e
                .parent
                .and_then(|(p, _)| self.entities.get(p.0))
                .and_then(|p| self.entities.get(p.top.0));
        }
        v
    }

    fn simulated_velocity(&self, top: EntityId) -> DVec2 {
        self.entities.get(top.0).map_or(DVec2::ZERO, |e| e.simv)
    }

    /// Sweep every top entity through the index, then collect body pairs.
    /// Solid pairs across levels become potential contacts of the higher
    /// entity; the rest are returned as overlap candidates.
    fn broadphase(&mut self, delta: f64) -> Vec<(BodyId, BodyId)> {
        let margin = self.cfg.broadphase_margin;
        let tops = self.top_entities();
        for &id in &tops {
            match self.entities.get(id.0).and_then(|e| e.body_set.bounds()) {
                Some(bounds) => {
                    let swept = bounds
                        .translate(self.global_pos(id))
                        .swept(self.motion(id) * delta, margin);
                    self.index.upsert(id, swept);
                }
                None => {
                    self.index.remove(id);
                }
            }
        }

        let pairs = self.index.collisions();
        let mut candidates = Vec::new();
        let mut pot = Vec::new();
        let mut body_pairs = 0;
        for &(a, b) in &pairs {
            let (Some(ea), Some(eb)) = (self.entities.get(a.0), self.entities.get(b.0)) else {
                continue;
            };
            let shift = self.global_pos(a) - self.global_pos(b);
            let rel = (self.motion(a) - self.motion(b)) * delta;
            let found = ea
                .body_set
                .collide_vbh(&eb.body_set, |bb| bb.translate(shift).swept(rel, margin));
            for (x, y) in found {
                if !self.body_active(x) || !self.body_active(y) {
                    continue;
                }
                let (Some(fx), Some(fy)) = (self.body_filter(x), self.body_filter(y)) else {
                    continue;
                };
                if !self.layers.allows(fx.layer, fx.group, fy.layer, fy.group) {
                    continue;
                }
                body_pairs += 1;
                if fx.is_sensor || fy.is_sensor || ea.level == eb.level {
                    candidates.push((x, y));
                } else if ea.level > eb.level {
                    pot.push((a, x, y));
                } else {
                    pot.push((b, y, x));
                }
            }
        }
        for (top, own, other) in pot {
            if let Some(e) = self.entities.get_mut(top.0) {
                e.pot_contacts.push((own, other));
            }
        }

        self.stats = WorldStats {
            entities: self.entities.len(),
            top_entities: tops.len(),
            bodies: self.bodies.len(),
            candidate_pairs: pairs.len(),
            body_pairs,
        };
        tracing::trace!(entity_pairs = pairs.len(), body_pairs, "broadphase done");
        candidates
    }

    fn resolve(&mut self, id: EntityId, delta: f64, resolved: &BTreeSet<EntityId>) {
        let Some(e) = self.entities.get(id.0) else {
            return;
        };
        let velocity = e.velocity;
        let was_crushed = e.crushed;
        let parent = e.parent.map(|(p, _)| p);
        // Only a parent resolved earlier this step has carried us already.
        let parent_v = parent
            .and_then(|p| self.entities.get(p.0))
            .map(|p| p.top)
            .filter(|t| resolved.contains(t))
            .map_or(DVec2::ZERO, |t| self.simulated_velocity(t));
        let start = self.global_pos(id) - parent_v * delta;
        let mut pos = start;

        // Discrete overlap correction, starting with last step's stuck pairs
        let (invalid, pot) = match self.entities.get_mut(id.0) {
            Some(e) => (std::mem::take(&mut e.invalid_overlap), e.pot_contacts.clone()),
            None => return,
        };
        let mut stuck: Vec<(BodyId, BodyId)> = Vec::new();
        for pair in invalid {
            self.handle_overlap(id, pair, &mut pos, delta, &mut stuck);
        }
        for pair in pot {
            if stuck.iter().any(|s| s.0 == pair.0 || s.1 == pair.1) {
                continue;
            }
            self.handle_overlap(id, pair, &mut pos, delta, &mut stuck);
        }
        let crushed = !stuck.is_empty();
        if let Some(e) = self.entities.get_mut(id.0) {
            e.invalid_overlap = stuck;
            e.crushed = crushed;
        }
        if crushed != was_crushed {
            tracing::debug!(entity = ?id, crushed, "crush state changed");
            let kind = if crushed { EventKind::CrushStart } else { EventKind::CrushEnd };
            self.emit(id, kind);
        }

        // Continuous movement
        let mut vel = velocity + parent_v;
        let mut time = 0.0;
        for _ in 0..MAX_CORRECTION_PASSES {
            self.clamp_to_contacts(id, &mut vel);
            let done = match self.first_impact(id, pos, vel, time, delta) {
                Some((own, other, hit)) => {
                    pos = hit.position - self.body_offset(own);
                    time += hit.time;
                    self.set_contact(
                        id,
                        Contact {
                            body: own,
                            other_body: other,
                            side: hit.side,
                        },
                    );
                    false
                }
                None => {
                    pos += vel * (delta - time);
                    true
                }
            };
            self.slide_off(id, pos);
            if done {
                break;
            }
        }

        let parent_global = parent.map_or(DVec2::ZERO, |p| self.global_pos(p));
        if let Some(e) = self.entities.get_mut(id.0) {
            e.velocity = vel - parent_v;
            e.simv = (pos - start) / delta;
            e.position = pos - parent_global;
            e.pot_contacts.clear();
        }
    }

    /// Push the entity out of `other` if they overlap deeper than [`EPS`].
    /// Pairs with no free way out are collected in `stuck`.
    fn handle_overlap(
        &mut self,
        id: EntityId,
        (own, other): (BodyId, BodyId),
        pos: &mut DVec2,
        delta: f64,
        stuck: &mut Vec<(BodyId, BodyId)>,
    ) {
        let (Some(a), Some(b), Some(other_top)) =
            (self.body_shape(own), self.body_shape(other), self.body_top(other))
        else {
            return;
        };
        if !a.is_two_way() || !b.is_two_way() {
            return;
        }
        let a_center = *pos + self.body_offset(own);
        let b_center = self.global_pos(other_top) + self.body_offset(other)
            - self.simulated_velocity(other_top) * delta;
        if !Narrowphase::overlaps(&a.aabb_at(a_center), &b.aabb_at(b_center), EPS) {
            return;
        }
        let Some(lower) = self.entities.get(id.0).map(|e| e.lower) else {
            return;
        };
        let free = Side::ALL.map(|s| lower[s.opposite().index()].is_none());
        match Narrowphase::solve_overlap(a_center, &a, b_center, &b, free) {
            Resolution::Push { side, position } => {
                *pos = position - self.body_offset(own);
                self.set_contact(
                    id,
                    Contact {
                        body: own,
                        other_body: other,
                        side,
                    },
                );
            }
            Resolution::Stuck => stuck.push((own, other)),
        }
    }

    /// Hold velocity against supporting bodies; contacts moved away from end.
    fn clamp_to_contacts(&mut self, id: EntityId, vel: &mut DVec2) {
        for side in [Side::Left, Side::Right, Side::Down, Side::Up] {
            let Some(c) = self.entities.get(id.0).and_then(|e| e.lower[side.index()]) else {
                continue;
            };
            let support = self
                .body_top(c.other_body)
                .map_or(DVec2::ZERO, |t| self.simulated_velocity(t));
            let axis = if side.is_horizontal() { 0 } else { 1 };
            let away = match side {
                Side::Left | Side::Down => vel[axis] > support[axis],
                Side::Right | Side::Up => vel[axis] < support[axis],
            };
            if away {
                self.remove_contact(id, side);
            } else {
                vel[axis] = support[axis];
            }
        }
    }

    /// Earliest impact over the potential contacts. Impacts against a side
    /// whose opposite is already supported crush the entity instead.
    fn first_impact(
        &mut self,
        id: EntityId,
        pos: DVec2,
        vel: DVec2,
        time: f64,
        delta: f64,
    ) -> Option<(BodyId, BodyId, Impact)> {
        let (pot, lower) = {
            let e = self.entities.get(id.0)?;
            (e.pot_contacts.clone(), e.lower)
        };
        let mut best: Option<(BodyId, BodyId, Impact)> = None;
        let mut crushing = Vec::new();
        for (own, other) in pot {
            let (Some(a), Some(b), Some(other_top)) =
                (self.body_shape(own), self.body_shape(other), self.body_top(other))
            else {
                continue;
            };
            let other_v = self.simulated_velocity(other_top);
            let me = SweptBody {
                center: pos + self.body_offset(own),
                velocity: vel,
                shape: a,
            };
            let them = SweptBody {
                center: self.global_pos(other_top) + self.body_offset(other) + other_v * (time - delta),
                velocity: other_v,
                shape: b,
            };
            let blocked = Side::ALL.map(|s| {
                lower[s.index()].is_some_and(|c| self.body_top(c.other_body) == Some(other_top))
            });
            let Some(hit) = Narrowphase::time_of_impact(&me, &them, delta - time, blocked) else {
                continue;
            };
            if best.is_some_and(|(_, _, first)| hit.time >= first.time) {
                continue;
            }
            if lower[hit.side.opposite().index()].is_some() {
                if b.collides(hit.side) {
                    crushing.push((own, other));
                }
                continue;
            }
            best = Some((own, other, hit));
        }
        for pair in crushing {
            self.crush(id, pair);
        }
        best
    }

    fn crush(&mut self, id: EntityId, pair: (BodyId, BodyId)) {
        let Some(e) = self.entities.get_mut(id.0) else {
            return;
        };
        if !e.invalid_overlap.contains(&pair) {
            e.invalid_overlap.push(pair);
        }
        if !e.crushed {
            e.crushed = true;
            tracing::debug!(entity = ?id, "crushed");
            self.emit(id, EventKind::CrushStart);
        }
    }

    /// Drop contacts whose bodies no longer share an edge.
    fn slide_off(&mut self, id: EntityId, pos: DVec2) {
        for side in Side::ALL {
            let Some(c) = self.entities.get(id.0).and_then(|e| e.lower[side.index()]) else {
                continue;
            };
            let (Some(a), Some(b), Some(other_top)) = (
                self.body_shape(c.body),
                self.body_shape(c.other_body),
                self.body_top(c.other_body),
            ) else {
                self.remove_contact(id, side);
                continue;
            };
            let mine = pos + self.body_offset(c.body);
            let theirs = self.global_pos(other_top) + self.body_offset(c.other_body);
            let (gap, reach) = if side.is_horizontal() {
                ((mine.y - theirs.y).abs(), a.height + b.height)
            } else {
                ((mine.x - theirs.x).abs(), a.width + b.width)
            };
            if gap * 2.0 > reach {
                self.remove_contact(id, side);
            }
        }
    }

    fn still_overlapping(&self, a: BodyId, b: BodyId) -> bool {
        if !self.body_active(a) || !self.body_active(b) {
            return false;
        }
        match (self.body_global_box(a), self.body_global_box(b)) {
            (Some(x), Some(y)) => x.intersects(&y),
            _ => false,
        }
    }

    /// End overlaps that separated, then start new ones among `candidates`,
    /// all at end-of-step positions.
    fn update_overlaps(&mut self, candidates: &[(BodyId, BodyId)]) {
        let owners: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, e)| !e.overlaps.is_empty())
            .map(|(h, _)| EntityId(h))
            .collect();
        for owner in owners {
            let pairs = self
                .entities
                .get(owner.0)
                .map(|e| e.overlaps.clone())
                .unwrap_or_default();
            for (body, other) in pairs {
                if self.still_overlapping(body, other) {
                    continue;
                }
                if let Some(e) = self.entities.get_mut(owner.0) {
                    e.overlaps.retain(|&p| p != (body, other));
                }
                self.emit(owner, EventKind::OverlapEnd { body, other });
            }
        }

        for &(a, b) in candidates {
            let (Some(owner_a), Some(owner_b)) = (
                self.bodies.get(a.0).map(|x| x.entity()),
                self.bodies.get(b.0).map(|x| x.entity()),
            ) else {
                continue;
            };
            let known = self
                .entities
                .get(owner_a.0)
                .is_some_and(|e| e.overlaps.contains(&(a, b)));
            if known || !self.still_overlapping(a, b) {
                continue;
            }
            if let Some(e) = self.entities.get_mut(owner_a.0) {
                e.overlaps.push((a, b));
            }
            if let Some(e) = self.entities.get_mut(owner_b.0) {
                e.overlaps.push((b, a));
            }
            self.emit(owner_a, EventKind::OverlapStart { body: a, other: b });
            self.emit(owner_b, EventKind::OverlapStart { body: b, other: a });
        }
    }
}
