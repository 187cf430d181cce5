use std::collections::BTreeMap;

use glam::DVec2;

use crate::PhysicsError;
use crate::api::{EntityListener, NarrowphaseApi, SpatialQuery};
use crate::arena::{Arena, BodyId, EntityId};
use crate::body::{Body, BodyDesc, BodyKind, Filter, Line, LineDesc, LineSide, Rect, RectDesc, Shape};
use crate::entity::{Entity, EntityDesc};
use crate::grid::{Channel, Grid, GridDesc, PieceId, TileArgs, TileRect, TileRegion};
use crate::layers::LayerTable;
use crate::narrowphase::Narrowphase;
use crate::subgrid::{Tile, TileShape};
use crate::types::*;
use crate::vbh::{SpatialIndex, Vbh};

/// Owns every entity, body and tile grid, and steps them with
/// [`World::simulate`].
pub struct World {
    pub(crate) cfg: WorldConfig,
    pub(crate) time: f64,
    pub(crate) layers: LayerTable,
    pub(crate) entities: Arena<Entity>,
    pub(crate) bodies: Arena<Body>,
    /// Top entities per level, in insertion order.
    pub(crate) levels: BTreeMap<i32, Vec<EntityId>>,
    pub(crate) index: SpatialIndex<EntityId>,

    // Events produced by the running operation, dispatched on flush
    pub(crate) pending: Vec<Event>,
    events: Vec<Event>,

    pub(crate) stats: WorldStats,
    pub(crate) last_timing: Option<WorldTiming>,
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldConfig::default())
    }
}

/// World with default settings and the chosen broadphase.
pub fn create_world(use_spatial_index: bool) -> World {
    World::new(WorldConfig {
        use_tree_index: use_spatial_index,
        ..Default::default()
    })
}

fn check_dimension(value: f64) -> Result<f64, PhysicsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(PhysicsError::InvalidDimension { value })
    }
}

fn dispatch(listener: &mut dyn EntityListener, kind: &EventKind) {
    match kind {
        EventKind::ContactStart(c) => listener.contact_start(c),
        EventKind::ContactEnd(c) => listener.contact_end(c),
        EventKind::OverlapStart { body, other } => listener.overlap_start(*body, *other),
        EventKind::OverlapEnd { body, other } => listener.overlap_end(*body, *other),
        EventKind::CrushStart => listener.crush_start(),
        EventKind::CrushEnd => listener.crush_end(),
    }
}

impl World {
    pub fn new(cfg: WorldConfig) -> Self {
        let index = SpatialIndex::new(cfg.use_tree_index);
        Self {
            cfg,
            time: 0.0,
            layers: LayerTable::new(),
            entities: Arena::new(),
            bodies: Arena::new(),
            levels: BTreeMap::new(),
            index,
            pending: Vec::new(),
            events: Vec::new(),
            stats: WorldStats::default(),
            last_timing: None,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.cfg
    }

    /// Sum of every accepted `simulate` delta.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn stats(&self) -> WorldStats {
        self.stats
    }

    /// Timing of the last step, when enabled in the config.
    pub fn timing(&self) -> Option<WorldTiming> {
        self.last_timing
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0)
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(id.0)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub(crate) fn try_entity(&self, id: EntityId) -> Result<&Entity, PhysicsError> {
        self.entities.get(id.0).ok_or(PhysicsError::StaleEntity(id))
    }

    pub(crate) fn try_entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, PhysicsError> {
        self.entities.get_mut(id.0).ok_or(PhysicsError::StaleEntity(id))
    }

    pub(crate) fn try_body(&self, id: BodyId) -> Result<&Body, PhysicsError> {
        self.bodies.get(id.0).ok_or(PhysicsError::StaleBody(id))
    }

    pub(crate) fn try_body_mut(&mut self, id: BodyId) -> Result<&mut Body, PhysicsError> {
        self.bodies.get_mut(id.0).ok_or(PhysicsError::StaleBody(id))
    }

    // -----------------------------------------------------------------------
    // Geometry
    // -----------------------------------------------------------------------

    /// Global position: the sum of local positions up the parent chain.
    pub(crate) fn global_pos(&self, id: EntityId) -> DVec2 {
        let mut acc = DVec2::ZERO;
        let mut cur = self.entities.get(id.0);
        while let Some(e) = cur {
            acc += e.position;
            cur = e.parent.and_then(|(p, _)| self.entities.get(p.0));
        }
        acc
    }

    /// Offset of an entity's frame from its top entity's frame.
    fn offset_to_top(&self, id: EntityId) -> DVec2 {
        let mut acc = DVec2::ZERO;
        let mut cur = id;
        while let Some(e) = self.entities.get(cur.0) {
            if e.is_top() {
                break;
            }
            acc += e.position;
            match e.parent {
                Some((p, _)) => cur = p,
                None => break,
            }
        }
        acc
    }

    /// Body position relative to its top entity.
    pub(crate) fn body_offset(&self, id: BodyId) -> DVec2 {
        self.bodies
            .get(id.0)
            .map_or(DVec2::ZERO, |b| b.offset + self.offset_to_top(b.entity))
    }

    pub(crate) fn body_top(&self, id: BodyId) -> Option<EntityId> {
        let body = self.bodies.get(id.0)?;
        Some(self.entities.get(body.entity.0)?.top)
    }

    pub(crate) fn body_shape(&self, id: BodyId) -> Option<Shape> {
        self.bodies.get(id.0)?.shape()
    }

    pub(crate) fn body_filter(&self, id: BodyId) -> Option<Filter> {
        self.bodies.get(id.0)?.filter().copied()
    }

    /// Current global box of a small body.
    pub(crate) fn body_global_box(&self, id: BodyId) -> Option<Aabb> {
        let shape = self.body_shape(id)?;
        let top = self.body_top(id)?;
        Some(shape.aabb_at(self.global_pos(top) + self.body_offset(id)))
    }

    /// Enabled, and so is the grid that generated it.
    pub(crate) fn body_active(&self, id: BodyId) -> bool {
        let Some(body) = self.bodies.get(id.0) else {
            return false;
        };
        body.enabled
            && body
                .generated_by
                .is_none_or(|g| self.bodies.get(g.0).is_some_and(|g| g.enabled))
    }

    pub fn position(&self, id: EntityId) -> Result<DVec2, PhysicsError> {
        Ok(self.try_entity(id)?.position)
    }

    pub fn global_position(&self, id: EntityId) -> Result<DVec2, PhysicsError> {
        self.try_entity(id)?;
        Ok(self.global_pos(id))
    }

    pub fn velocity(&self, id: EntityId) -> Result<DVec2, PhysicsError> {
        Ok(self.try_entity(id)?.velocity)
    }

    pub fn local_to_global(&self, id: EntityId, point: DVec2) -> Result<DVec2, PhysicsError> {
        Ok(self.global_position(id)? + point)
    }

    pub fn global_to_local(&self, id: EntityId, point: DVec2) -> Result<DVec2, PhysicsError> {
        Ok(point - self.global_position(id)?)
    }

    /// Global position of a body's reference point (rect centre, line
    /// midpoint, grid origin).
    pub fn body_global_position(&self, id: BodyId) -> Result<DVec2, PhysicsError> {
        let body = self.try_body(id)?;
        Ok(self.global_pos(body.entity) + body.offset)
    }

    // -----------------------------------------------------------------------
    // Body sets
    // -----------------------------------------------------------------------

    pub(crate) fn sync_body(&mut self, id: BodyId) {
        let (Some(top), Some(shape)) = (self.body_top(id), self.body_shape(id)) else {
            return;
        };
        let aabb = shape.aabb_at(self.body_offset(id));
        if let Some(t) = self.entities.get_mut(top.0) {
            t.body_set.upsert(id, aabb);
        }
    }

    fn unsync_body(&mut self, id: BodyId) {
        if let Some(top) = self.body_top(id) {
            if let Some(t) = self.entities.get_mut(top.0) {
                t.body_set.remove(id);
            }
        }
    }

    /// Rects and lines of an entity, including pieces generated by its grids.
    fn small_bodies(&self, id: EntityId) -> Vec<BodyId> {
        let mut out = Vec::new();
        let Some(e) = self.entities.get(id.0) else {
            return out;
        };
        for &b in &e.bodies {
            match self.bodies.get(b.0).map(|body| &body.kind) {
                Some(BodyKind::Grid(grid)) => out.extend(grid.generated_bodies()),
                Some(_) => out.push(b),
                None => {}
            }
        }
        out
    }

    /// The entity and its descendants, parents before children.
    fn subtree(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(e) = stack.pop() {
            if let Some(ent) = self.entities.get(e.0) {
                out.push(e);
                stack.extend(ent.children.iter().rev().copied());
            }
        }
        out
    }

    fn subtree_bodies(&self, id: EntityId) -> Vec<BodyId> {
        self.subtree(id)
            .into_iter()
            .flat_map(|e| self.small_bodies(e))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub fn create_entity(&mut self, desc: EntityDesc) -> Result<EntityId, PhysicsError> {
        let EntityDesc {
            x,
            y,
            vx,
            vy,
            level,
            bodies,
        } = desc;
        let id = EntityId(self.entities.insert_with(|h| {
            Entity::new(EntityId(h), DVec2::new(x, y), DVec2::new(vx, vy), level)
        }));
        self.levels.entry(level).or_default().push(id);
        for body in bodies {
            if let Err(err) = self.add_body(id, body) {
                self.destroy_entity(id)?;
                return Err(err);
            }
        }
        tracing::trace!(entity = ?id, level, "entity created");
        Ok(id)
    }

    pub fn create_rect(&mut self, desc: EntityDesc, rect: RectDesc) -> Result<EntityId, PhysicsError> {
        self.create_entity(desc.with_body(rect))
    }

    pub fn create_line(&mut self, desc: EntityDesc, line: LineDesc) -> Result<EntityId, PhysicsError> {
        self.create_entity(desc.with_body(line))
    }

    pub fn create_grid(&mut self, desc: EntityDesc, grid: GridDesc) -> Result<EntityId, PhysicsError> {
        self.create_entity(desc.with_body(grid))
    }

    /// Destroy an entity and its bodies. Children stay where they are and
    /// become roots.
    pub fn destroy_entity(&mut self, id: EntityId) -> Result<(), PhysicsError> {
        let children = self.try_entity(id)?.children.clone();
        for child in children {
            self.reparent(child, None, None)?;
        }
        if self.try_entity(id)?.parent.is_some() {
            self.reparent(id, None, None)?;
        }
        let bodies = self.try_entity(id)?.bodies.clone();
        for b in bodies {
            self.destroy_body(b);
        }
        self.demote(id);
        // The entity's own listener still hears its teardown events
        self.flush_events();
        self.entities.remove(id.0);
        tracing::trace!(entity = ?id, "entity destroyed");
        Ok(())
    }

    pub fn set_velocity(&mut self, id: EntityId, vx: f64, vy: f64) -> Result<(), PhysicsError> {
        self.try_entity_mut(id)?.velocity = DVec2::new(vx, vy);
        Ok(())
    }

    pub fn set_level(&mut self, id: EntityId, level: i32) -> Result<(), PhysicsError> {
        let e = self.try_entity_mut(id)?;
        let old = e.level;
        e.level = level;
        if old != level && e.is_top() {
            self.unlist(id, old);
            self.levels.entry(level).or_default().push(id);
        }
        Ok(())
    }

    pub fn move_by(&mut self, id: EntityId, dx: f64, dy: f64) -> Result<(), PhysicsError> {
        self.try_entity_mut(id)?.position += DVec2::new(dx, dy);
        self.teleported(id);
        Ok(())
    }

    pub fn move_to_local(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), PhysicsError> {
        self.try_entity_mut(id)?.position = DVec2::new(x, y);
        self.teleported(id);
        Ok(())
    }

    pub fn move_to_global(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), PhysicsError> {
        let parent = self.try_entity(id)?.parent;
        let base = parent.map_or(DVec2::ZERO, |(p, _)| self.global_pos(p));
        self.try_entity_mut(id)?.position = DVec2::new(x, y) - base;
        self.teleported(id);
        Ok(())
    }

    /// Contacts of moved bodies no longer hold; static descendants' boxes
    /// move inside their top entity's body set.
    fn teleported(&mut self, id: EntityId) {
        for b in self.subtree_bodies(id) {
            self.clear_body_contacts(b);
            self.sync_body(b);
        }
        self.flush_events();
    }

    fn unlist(&mut self, id: EntityId, level: i32) {
        if let Some(list) = self.levels.get_mut(&level) {
            list.retain(|&e| e != id);
            if list.is_empty() {
                self.levels.remove(&level);
            }
        }
    }

    /// Drop top entity state when an entity stops being simulated.
    fn demote(&mut self, id: EntityId) {
        let Some(e) = self.entities.get_mut(id.0) else {
            return;
        };
        let level = e.level;
        e.pot_contacts.clear();
        e.invalid_overlap.clear();
        e.simv = DVec2::ZERO;
        let crushed = std::mem::take(&mut e.crushed);
        self.unlist(id, level);
        self.index.remove(id);
        if crushed {
            self.emit(id, EventKind::CrushEnd);
        }
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    /// Attach `child` under `parent` (or detach it with `None`), keeping its
    /// global position.
    pub fn set_parent(
        &mut self,
        child: EntityId,
        parent: Option<(EntityId, ParentType)>,
    ) -> Result<(), PhysicsError> {
        self.reparent(child, parent, None)?;
        self.flush_events();
        Ok(())
    }

    pub fn add_child(&mut self, parent: EntityId, child: EntityId, kind: ParentType) -> Result<(), PhysicsError> {
        self.set_parent(child, Some((parent, kind)))
    }

    /// Detach `child` from `parent` in place. Returns whether it was a child.
    pub fn remove_child(&mut self, parent: EntityId, child: EntityId) -> Result<bool, PhysicsError> {
        if self.try_entity(child)?.parent.map(|(p, _)| p) != Some(parent) {
            return Ok(false);
        }
        self.set_parent(child, None)?;
        Ok(true)
    }

    /// Create an entity whose description position is local to `parent`.
    pub fn create_child(
        &mut self,
        parent: EntityId,
        kind: ParentType,
        desc: EntityDesc,
    ) -> Result<EntityId, PhysicsError> {
        self.try_entity(parent)?;
        let local = DVec2::new(desc.x, desc.y);
        let id = self.create_entity(desc)?;
        self.reparent(id, Some((parent, kind)), Some(local))?;
        self.flush_events();
        Ok(id)
    }

    /// Destroy `child` if it belongs to `parent`. Returns whether it did.
    pub fn destroy_child(&mut self, parent: EntityId, child: EntityId) -> Result<bool, PhysicsError> {
        if self.try_entity(child)?.parent.map(|(p, _)| p) != Some(parent) {
            return Ok(false);
        }
        self.destroy_entity(child)?;
        Ok(true)
    }

    fn is_ancestor_or_self(&self, ancestor: EntityId, mut id: EntityId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.entities.get(id.0).and_then(|e| e.parent) {
                Some((p, _)) => id = p,
                None => return false,
            }
        }
    }

    fn reparent(
        &mut self,
        child: EntityId,
        parent: Option<(EntityId, ParentType)>,
        local: Option<DVec2>,
    ) -> Result<(), PhysicsError> {
        let (was_top, old_parent, level) = {
            let e = self.try_entity(child)?;
            (e.is_top(), e.parent, e.level)
        };
        if let Some((p, _)) = parent {
            self.try_entity(p)?;
            if self.is_ancestor_or_self(child, p) {
                return Err(PhysicsError::ParentCycle { child, parent: p });
            }
        }

        let global = self.global_pos(child);
        let moved = self.subtree_bodies(child);
        for &b in &moved {
            self.clear_body_contacts(b);
            self.unsync_body(b);
        }

        if let Some((op, _)) = old_parent {
            if let Some(op) = self.entities.get_mut(op.0) {
                op.children.retain(|&c| c != child);
            }
        }
        let base = match parent {
            Some((p, _)) => {
                if let Some(pe) = self.entities.get_mut(p.0) {
                    pe.children.push(child);
                }
                self.global_pos(p)
            }
            None => DVec2::ZERO,
        };
        let now_top = {
            let e = self.try_entity_mut(child)?;
            e.parent = parent;
            e.position = local.unwrap_or(global - base);
            e.is_top()
        };

        if was_top && !now_top {
            self.demote(child);
        } else if !was_top && now_top {
            self.levels.entry(level).or_default().push(child);
        }
        self.retop(child);
        for &b in &moved {
            self.sync_body(b);
        }
        tracing::trace!(entity = ?child, parent = ?parent, "entity reparented");
        Ok(())
    }

    /// Recompute cached top entities below (and including) `root`.
    fn retop(&mut self, root: EntityId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(e) = self.entities.get(id.0) else {
                continue;
            };
            let top = if e.is_top() {
                id
            } else {
                e.parent
                    .and_then(|(p, _)| self.entities.get(p.0))
                    .map_or(id, |p| p.top)
            };
            stack.extend(e.children.iter().copied());
            if let Some(e) = self.entities.get_mut(id.0) {
                e.top = top;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bodies
    // -----------------------------------------------------------------------

    pub fn add_body(&mut self, entity: EntityId, desc: BodyDesc) -> Result<BodyId, PhysicsError> {
        match desc {
            BodyDesc::Rect(d) => self.add_rect(entity, d),
            BodyDesc::Line(d) => self.add_line(entity, d),
            BodyDesc::Grid(d) => self.add_grid(entity, d),
        }
    }

    fn resolve_layer(&mut self, name: Option<&str>) -> Result<LayerId, PhysicsError> {
        match name {
            Some(name) => self.layers.add_layer(name),
            None => Ok(LayerId::DEFAULT),
        }
    }

    fn attach_body(&mut self, entity: EntityId, offset: DVec2, enabled: bool, kind: BodyKind) -> BodyId {
        let id = BodyId(self.bodies.insert(Body::new(entity, offset, enabled, kind)));
        if let Some(e) = self.entities.get_mut(entity.0) {
            e.bodies.push(id);
        }
        self.sync_body(id);
        id
    }

    pub fn add_rect(&mut self, entity: EntityId, desc: RectDesc) -> Result<BodyId, PhysicsError> {
        self.try_entity(entity)?;
        let width = check_dimension(desc.width)?;
        let height = check_dimension(desc.height)?;
        let layer = self.resolve_layer(desc.layer.as_deref())?;
        let kind = BodyKind::Rect(Rect {
            width,
            height,
            filter: Filter {
                layer,
                group: desc.group,
                is_sensor: desc.is_sensor,
            },
        });
        Ok(self.attach_body(entity, DVec2::new(desc.x, desc.y), desc.enabled, kind))
    }

    pub fn add_line(&mut self, entity: EntityId, desc: LineDesc) -> Result<BodyId, PhysicsError> {
        self.try_entity(entity)?;
        let size = check_dimension(desc.size)?;
        if !desc.side.fits(desc.orientation) {
            return Err(PhysicsError::InvalidLineSide {
                side: desc.side,
                orientation: desc.orientation,
            });
        }
        let layer = self.resolve_layer(desc.layer.as_deref())?;
        let kind = BodyKind::Line(Line {
            size,
            orientation: desc.orientation,
            side: desc.side,
            filter: Filter {
                layer,
                group: desc.group,
                is_sensor: desc.is_sensor,
            },
        });
        Ok(self.attach_body(entity, DVec2::new(desc.x, desc.y), desc.enabled, kind))
    }

    pub fn add_grid(&mut self, entity: EntityId, desc: GridDesc) -> Result<BodyId, PhysicsError> {
        self.try_entity(entity)?;
        let grid = Grid::from_desc(&desc)?;
        let id = self.attach_body(
            entity,
            DVec2::new(desc.x, desc.y),
            desc.enabled,
            BodyKind::Grid(Box::new(grid)),
        );
        self.apply_grid_delta(id);
        self.flush_events();
        Ok(id)
    }

    /// Remove a user body. Tile pieces go away by editing their tiles.
    pub fn remove_body(&mut self, id: BodyId) -> Result<(), PhysicsError> {
        if self.try_body(id)?.generated_by.is_some() {
            return Err(PhysicsError::GeneratedBody(id));
        }
        self.destroy_body(id);
        self.flush_events();
        Ok(())
    }

    fn destroy_body(&mut self, id: BodyId) {
        let Some(body) = self.bodies.get(id.0) else {
            return;
        };
        let entity = body.entity;
        let generated = body.generated_by.is_some();
        let pieces: Vec<BodyId> = body
            .as_grid()
            .map(|g| g.generated_bodies().collect())
            .unwrap_or_default();
        for piece in pieces {
            self.destroy_body(piece);
        }

        self.clear_body_contacts(id);
        self.end_body_overlaps(id);
        if let Some(top) = self.body_top(id) {
            if let Some(t) = self.entities.get_mut(top.0) {
                t.body_set.remove(id);
                t.pot_contacts.retain(|&(a, b)| a != id && b != id);
                t.invalid_overlap.retain(|&(a, b)| a != id && b != id);
            }
        }
        if !generated {
            if let Some(e) = self.entities.get_mut(entity.0) {
                e.bodies.retain(|&b| b != id);
            }
        }
        self.bodies.remove(id.0);
    }

    /// Bodies affected by an edit of `id`: the body itself, or a grid's pieces.
    fn edited_bodies(&self, id: BodyId) -> Vec<BodyId> {
        match self.bodies.get(id.0).and_then(Body::as_grid) {
            Some(grid) => grid.generated_bodies().collect(),
            None => vec![id],
        }
    }

    fn editable(&mut self, id: BodyId) -> Result<&mut Body, PhysicsError> {
        let body = self.try_body_mut(id)?;
        if body.generated_by.is_some() {
            return Err(PhysicsError::GeneratedBody(id));
        }
        Ok(body)
    }

    /// Geometry or filtering changed: contacts are re-derived next step.
    fn reshaped(&mut self, id: BodyId) {
        self.clear_body_contacts(id);
        self.sync_body(id);
        self.flush_events();
    }

    /// Disabling a body ends its contacts and overlaps immediately.
    pub fn set_body_enabled(&mut self, id: BodyId, enabled: bool) -> Result<(), PhysicsError> {
        let body = self.try_body_mut(id)?;
        if body.enabled == enabled {
            return Ok(());
        }
        body.enabled = enabled;
        if !enabled {
            for b in self.edited_bodies(id) {
                self.clear_body_contacts(b);
                self.end_body_overlaps(b);
            }
            self.flush_events();
        }
        Ok(())
    }

    /// Move a body relative to its entity; a grid carries its pieces along.
    pub fn set_body_offset(&mut self, id: BodyId, x: f64, y: f64) -> Result<(), PhysicsError> {
        let body = self.editable(id)?;
        let shift = DVec2::new(x, y) - body.offset;
        body.offset = DVec2::new(x, y);
        let is_grid = body.as_grid().is_some();
        let affected = self.edited_bodies(id);
        for &b in &affected {
            if is_grid {
                if let Some(piece) = self.bodies.get_mut(b.0) {
                    piece.offset += shift;
                }
            }
            self.clear_body_contacts(b);
            self.sync_body(b);
        }
        self.flush_events();
        Ok(())
    }

    pub fn set_rect_size(&mut self, id: BodyId, width: f64, height: f64) -> Result<(), PhysicsError> {
        let width = check_dimension(width)?;
        let height = check_dimension(height)?;
        let body = self.editable(id)?;
        let BodyKind::Rect(rect) = &mut body.kind else {
            return Err(PhysicsError::WrongBodyKind {
                body: id,
                expected: "rect",
            });
        };
        rect.width = width;
        rect.height = height;
        self.reshaped(id);
        Ok(())
    }

    pub fn set_line_size(&mut self, id: BodyId, size: f64) -> Result<(), PhysicsError> {
        let size = check_dimension(size)?;
        let body = self.editable(id)?;
        let BodyKind::Line(line) = &mut body.kind else {
            return Err(PhysicsError::WrongBodyKind {
                body: id,
                expected: "line",
            });
        };
        line.size = size;
        self.reshaped(id);
        Ok(())
    }

    /// Change which faces of a line block. The orientation itself is fixed.
    pub fn set_line_side(&mut self, id: BodyId, side: LineSide) -> Result<(), PhysicsError> {
        let body = self.editable(id)?;
        let BodyKind::Line(line) = &mut body.kind else {
            return Err(PhysicsError::WrongBodyKind {
                body: id,
                expected: "line",
            });
        };
        if !side.fits(line.orientation) {
            return Err(PhysicsError::InvalidLineSide {
                side,
                orientation: line.orientation,
            });
        }
        line.side = side;
        self.reshaped(id);
        Ok(())
    }

    fn edit_filter(&mut self, id: BodyId, f: impl FnOnce(&mut Filter)) -> Result<(), PhysicsError> {
        let body = self.editable(id)?;
        let kind = body.kind_name();
        let Some(filter) = body.filter_mut() else {
            return Err(PhysicsError::WrongBodyKind {
                body: id,
                expected: if kind == "grid" { "rect or line" } else { kind },
            });
        };
        f(filter);
        self.reshaped(id);
        Ok(())
    }

    /// Move a body to a named layer, registering the name if needed.
    pub fn set_body_layer(&mut self, id: BodyId, layer: &str) -> Result<(), PhysicsError> {
        self.try_body(id)?;
        let layer = self.layers.add_layer(layer)?;
        self.edit_filter(id, |f| f.layer = layer)
    }

    pub fn set_body_group(&mut self, id: BodyId, group: u32) -> Result<(), PhysicsError> {
        self.edit_filter(id, |f| f.group = group)
    }

    pub fn set_body_sensor(&mut self, id: BodyId, is_sensor: bool) -> Result<(), PhysicsError> {
        self.edit_filter(id, |f| f.is_sensor = is_sensor)
    }

    // -----------------------------------------------------------------------
    // Tiles
    // -----------------------------------------------------------------------

    pub fn grid(&self, id: BodyId) -> Result<&Grid, PhysicsError> {
        self.try_body(id)?.as_grid().ok_or(PhysicsError::WrongBodyKind {
            body: id,
            expected: "grid",
        })
    }

    fn grid_mut(&mut self, id: BodyId) -> Result<&mut Grid, PhysicsError> {
        match &mut self.try_body_mut(id)?.kind {
            BodyKind::Grid(grid) => Ok(&mut **grid),
            _ => Err(PhysicsError::WrongBodyKind {
                body: id,
                expected: "grid",
            }),
        }
    }

    /// Run a tile edit, then bring generated bodies in line with the pieces.
    fn edit_grid<R>(
        &mut self,
        id: BodyId,
        f: impl FnOnce(&mut Grid) -> Result<R, PhysicsError>,
    ) -> Result<R, PhysicsError> {
        let out = f(self.grid_mut(id)?);
        if let Err(err) = &out {
            tracing::warn!(error = %err, grid = ?id, "tile edit rejected");
        }
        self.apply_grid_delta(id);
        self.flush_events();
        out
    }

    pub fn get_tile(&self, id: BodyId, x: i32, y: i32) -> Result<Tile, PhysicsError> {
        Ok(self.grid(id)?.get_tile(x, y))
    }

    pub fn set_tile(&mut self, id: BodyId, x: i32, y: i32, tile: Tile) -> Result<(), PhysicsError> {
        self.edit_grid(id, |g| g.set_tile(x, y, tile))
    }

    pub fn set_tile_shape(&mut self, id: BodyId, x: i32, y: i32, shape: TileShape) -> Result<(), PhysicsError> {
        self.edit_grid(id, |g| g.set_tile_shape(x, y, shape))
    }

    pub fn clear_tile(&mut self, id: BodyId, x: i32, y: i32) -> Result<(), PhysicsError> {
        self.edit_grid(id, |g| {
            g.clear_tile(x, y);
            Ok(())
        })
    }

    pub fn set_tiles(&mut self, id: BodyId, tiles: &TileArgs) -> Result<(), PhysicsError> {
        self.edit_grid(id, |g| g.set_tiles(tiles))
    }

    pub fn clear_tiles(&mut self, id: BodyId, region: &TileRegion) -> Result<(), PhysicsError> {
        self.edit_grid(id, |g| {
            g.clear_tiles(region);
            Ok(())
        })
    }

    /// Rewrite the tiles of a rectangle; `f` returns `None` to keep a tile.
    pub fn for_tiles(
        &mut self,
        id: BodyId,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        f: impl FnMut(i32, i32, &Tile) -> Option<Tile>,
    ) -> Result<(), PhysicsError> {
        self.edit_grid(id, |g| g.for_tiles(TileRect::new(x, y, w, h), f))
    }

    /// Allocated tile range `(min_x, min_y, max_x, max_y)`, inclusive.
    pub fn grid_bounds(&self, id: BodyId) -> Result<(i32, i32, i32, i32), PhysicsError> {
        Ok(self.grid(id)?.bounds())
    }

    /// Solid body generated over a tile, if any.
    pub fn tile_body(&self, id: BodyId, x: i32, y: i32) -> Result<Option<BodyId>, PhysicsError> {
        let grid = self.grid(id)?;
        Ok(grid.piece_at(Channel::Solid, x, y).and_then(|p| grid.body_of(p)))
    }

    /// Create, resize and destroy generated bodies to match the grid's pieces.
    fn apply_grid_delta(&mut self, grid_body: BodyId) {
        let Some(body) = self.bodies.get_mut(grid_body.0) else {
            return;
        };
        let (entity, base) = (body.entity, body.offset);
        let BodyKind::Grid(grid) = &mut body.kind else {
            return;
        };
        let delta = grid.take_delta();
        if delta.is_empty() {
            return;
        }
        let removed: Vec<BodyId> = delta
            .removed
            .iter()
            .filter_map(|p| grid.bodies.remove(p))
            .collect();
        let resized: Vec<(BodyId, DVec2, BodyKind, bool)> = delta
            .resized
            .iter()
            .filter_map(|(p, piece, shrunk)| {
                let (offset, kind) = grid.piece_body(piece);
                grid.bodies.get(p).map(|&b| (b, base + offset, kind, *shrunk))
            })
            .collect();
        let added: Vec<(PieceId, DVec2, BodyKind)> = delta
            .added
            .iter()
            .map(|(p, piece)| {
                let (offset, kind) = grid.piece_body(piece);
                (*p, base + offset, kind)
            })
            .collect();

        for b in removed {
            self.destroy_body(b);
        }
        for (b, offset, kind, shrunk) in resized {
            if shrunk {
                self.clear_body_contacts(b);
            }
            if let Some(body) = self.bodies.get_mut(b.0) {
                body.offset = offset;
                body.kind = kind;
            }
            self.sync_body(b);
        }
        let mut created = Vec::with_capacity(added.len());
        for (piece, offset, kind) in added {
            let mut body = Body::new(entity, offset, true, kind);
            body.generated_by = Some(grid_body);
            let id = BodyId(self.bodies.insert(body));
            self.sync_body(id);
            created.push((piece, id));
        }
        if let Some(BodyKind::Grid(grid)) = self.bodies.get_mut(grid_body.0).map(|b| &mut b.kind) {
            grid.bodies.extend(created);
        }
    }

    // -----------------------------------------------------------------------
    // Layers
    // -----------------------------------------------------------------------

    pub fn add_layer(&mut self, name: &str) -> Result<LayerId, PhysicsError> {
        self.layers.add_layer(name)
    }

    pub fn layer_id(&self, name: &str) -> Option<LayerId> {
        self.layers.id(name)
    }

    pub fn layers(&self) -> &LayerTable {
        &self.layers
    }

    pub fn set_layer_rule(&mut self, a: &str, b: &str, rule: LayerRule) -> Result<(), PhysicsError> {
        self.layers.set_rule(a, b, rule)
    }

    pub fn get_layer_rule(&self, a: &str, b: &str) -> LayerRule {
        self.layers.rule(a, b)
    }

    // -----------------------------------------------------------------------
    // Contacts, overlaps and events
    // -----------------------------------------------------------------------

    pub fn set_listener(
        &mut self,
        id: EntityId,
        listener: impl EntityListener + 'static,
    ) -> Result<(), PhysicsError> {
        self.try_entity_mut(id)?.listener = Some(Box::new(listener));
        Ok(())
    }

    pub fn take_listener(&mut self, id: EntityId) -> Result<Option<Box<dyn EntityListener>>, PhysicsError> {
        Ok(self.try_entity_mut(id)?.listener.take())
    }

    /// Events since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, entity: EntityId, kind: EventKind) {
        self.pending.push(Event { entity, kind });
    }

    /// Deliver pending events to listeners and the bounded queue.
    pub(crate) fn flush_events(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        for ev in &pending {
            if let Some(listener) = self
                .entities
                .get_mut(ev.entity.0)
                .and_then(|e| e.listener.as_deref_mut())
            {
                dispatch(listener, &ev.kind);
            }
        }
        let room = self.cfg.max_events.saturating_sub(self.events.len());
        if pending.len() > room {
            tracing::warn!(
                dropped = pending.len() - room,
                max_events = self.cfg.max_events,
                "event queue full"
            );
        }
        self.events.extend(pending.into_iter().take(room));
    }

    /// Record that `top` is blocked by `contact`. An identical contact is
    /// kept as is; a different one on the same side replaces it.
    pub(crate) fn set_contact(&mut self, top: EntityId, contact: Contact) {
        let side = contact.side;
        let Some(e) = self.entities.get(top.0) else {
            return;
        };
        match e.lower[side.index()] {
            Some(old) if old == contact => return,
            Some(_) => self.remove_contact(top, side),
            None => {}
        }
        if let Some(e) = self.entities.get_mut(top.0) {
            e.lower[side.index()] = Some(contact);
        }
        if let Some(other) = self.bodies.get_mut(contact.other_body.0) {
            other.higher_contacts.push((top, side));
        }
        self.emit(top, EventKind::ContactStart(contact));
    }

    pub(crate) fn remove_contact(&mut self, top: EntityId, side: Side) {
        let Some(contact) = self
            .entities
            .get_mut(top.0)
            .and_then(|e| e.lower[side.index()].take())
        else {
            return;
        };
        if let Some(other) = self.bodies.get_mut(contact.other_body.0) {
            other.higher_contacts.retain(|&h| h != (top, side));
        }
        self.emit(top, EventKind::ContactEnd(contact));
    }

    /// End every contact the body takes part in, on either end.
    pub(crate) fn clear_body_contacts(&mut self, id: BodyId) {
        if let Some(top) = self.body_top(id) {
            for side in Side::ALL {
                let held = self
                    .entities
                    .get(top.0)
                    .and_then(|e| e.lower[side.index()])
                    .is_some_and(|c| c.body == id);
                if held {
                    self.remove_contact(top, side);
                }
            }
        }
        let higher = self
            .bodies
            .get(id.0)
            .map(|b| b.higher_contacts.clone())
            .unwrap_or_default();
        for (e, side) in higher {
            let held = self
                .entities
                .get(e.0)
                .and_then(|e| e.lower[side.index()])
                .is_some_and(|c| c.other_body == id);
            if held {
                self.remove_contact(e, side);
            }
        }
    }

    /// End every overlap involving the body, for both owners.
    pub(crate) fn end_body_overlaps(&mut self, id: BodyId) {
        let Some(owner) = self.bodies.get(id.0).map(|b| b.entity) else {
            return;
        };
        let others: Vec<BodyId> = match self.entities.get_mut(owner.0) {
            Some(e) => {
                let others: Vec<BodyId> = e.overlaps.iter().filter(|p| p.0 == id).map(|p| p.1).collect();
                e.overlaps.retain(|p| p.0 != id);
                others
            }
            None => Vec::new(),
        };
        for other in others {
            self.emit(owner, EventKind::OverlapEnd { body: id, other });
            let Some(other_owner) = self.bodies.get(other.0).map(|b| b.entity) else {
                continue;
            };
            let ended = match self.entities.get_mut(other_owner.0) {
                Some(e) => {
                    let before = e.overlaps.len();
                    e.overlaps.retain(|&p| p != (other, id));
                    e.overlaps.len() != before
                }
                None => false,
            };
            if ended {
                self.emit(other_owner, EventKind::OverlapEnd { body: other, other: id });
            }
        }
    }

    /// Top entities in simulation order.
    pub(crate) fn top_entities(&self) -> Vec<EntityId> {
        self.levels.values().flatten().copied().collect()
    }
}

impl SpatialQuery for World {
    fn raycast(&self, origin: DVec2, dir: DVec2) -> Option<RaycastHit> {
        let reach = Aabb::new(origin.min(origin + dir), origin.max(origin + dir));
        let mut best: Option<RaycastHit> = None;
        for top in self.top_entities() {
            let Some(e) = self.entities.get(top.0) else {
                continue;
            };
            let at = self.global_pos(top);
            for b in e.body_set.query(&reach.translate(-at)) {
                if !self.body_active(b) || self.bodies.get(b.0).is_none_or(Body::is_sensor) {
                    continue;
                }
                let Some(aabb) = e.body_set.get(b).map(|bb| bb.translate(at)) else {
                    continue;
                };
                let Some(hit) = Narrowphase::ray_aabb(origin, dir, &aabb) else {
                    continue;
                };
                if hit.toi > 1.0 || best.is_some_and(|h| hit.toi >= h.toi) {
                    continue;
                }
                let Some(entity) = self.bodies.get(b.0).map(|body| body.entity) else {
                    continue;
                };
                best = Some(RaycastHit {
                    entity,
                    body: b,
                    toi: hit.toi,
                    point: hit.point,
                    normal: hit.normal,
                });
            }
        }
        best
    }

    fn query_rect(&self, x: f64, y: f64, w: f64, h: f64) -> Vec<(EntityId, BodyId)> {
        let rect = Aabb::new(DVec2::new(x, y), DVec2::new(x + w, y + h));
        let mut out = Vec::new();
        for top in self.top_entities() {
            let Some(e) = self.entities.get(top.0) else {
                continue;
            };
            let at = self.global_pos(top);
            for b in e.body_set.query(&rect.translate(-at)) {
                if let Some(body) = self.bodies.get(b.0).filter(|_| self.body_active(b)) {
                    out.push((body.entity, b));
                }
            }
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TilePlacement;

    fn world() -> World {
        World::new(WorldConfig::default())
    }

    fn floor_tiles(from: i32, to: i32) -> TileArgs {
        TileArgs::List(
            (from..to)
                .map(|x| TilePlacement {
                    x,
                    y: 0,
                    tile: Tile::block(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_body_set_holds_top_local_boxes() {
        let mut w = world();
        let e = w
            .create_rect(EntityDesc::new().at(1.0, 2.0), RectDesc::new(2.0, 1.0).at(0.5, 0.0))
            .unwrap();
        let ent = w.entity(e).unwrap();
        let bb = ent.body_set.bounds().unwrap();
        assert_eq!(bb.min, DVec2::new(-0.5, -0.5));
        assert_eq!(bb.max, DVec2::new(1.5, 0.5));
        let b = ent.bodies()[0];
        assert_eq!(w.body_global_position(b).unwrap(), DVec2::new(1.5, 2.0));
    }

    #[test]
    fn test_static_child_keeps_global_and_joins_parent_set() {
        let mut w = world();
        let parent = w.create_rect(EntityDesc::new().at(10.0, 0.0), RectDesc::new(1.0, 1.0)).unwrap();
        let child = w.create_rect(EntityDesc::new().at(3.0, 4.0), RectDesc::new(1.0, 1.0)).unwrap();
        w.add_child(parent, child, ParentType::Static).unwrap();

        assert_eq!(w.position(child).unwrap(), DVec2::new(-7.0, 4.0));
        assert_eq!(w.global_position(child).unwrap(), DVec2::new(3.0, 4.0));
        assert_eq!(w.entity(child).unwrap().top(), parent);
        assert_eq!(w.top_entities(), vec![parent]);
        assert_eq!(w.entity(parent).unwrap().body_set.len(), 2);

        // moving the parent carries the child
        w.move_by(parent, 1.0, 0.0).unwrap();
        assert_eq!(w.global_position(child).unwrap(), DVec2::new(4.0, 4.0));

        assert!(w.remove_child(parent, child).unwrap());
        assert_eq!(w.global_position(child).unwrap(), DVec2::new(4.0, 4.0));
        assert_eq!(w.entity(parent).unwrap().body_set.len(), 1);
        assert_eq!(w.entity(child).unwrap().body_set.len(), 1);
        assert_eq!(w.top_entities(), vec![parent, child]);
    }

    #[test]
    fn test_follow_child_stays_top() {
        let mut w = world();
        let parent = w.create_entity(EntityDesc::new().at(5.0, 5.0)).unwrap();
        let child = w
            .create_child(parent, ParentType::Follow, EntityDesc::new().at(1.0, 0.0).level(1))
            .unwrap();
        assert_eq!(w.global_position(child).unwrap(), DVec2::new(6.0, 5.0));
        assert!(w.entity(child).unwrap().is_top());
        assert_eq!(w.entity(child).unwrap().top(), child);
        assert_eq!(w.top_entities(), vec![parent, child]);
    }

    #[test]
    fn test_parent_cycle_rejected() {
        let mut w = world();
        let a = w.create_entity(EntityDesc::new()).unwrap();
        let b = w.create_child(a, ParentType::Static, EntityDesc::new()).unwrap();
        let c = w.create_child(b, ParentType::Follow, EntityDesc::new()).unwrap();
        assert_eq!(
            w.set_parent(a, Some((c, ParentType::Static))),
            Err(PhysicsError::ParentCycle { child: a, parent: c })
        );
        assert!(matches!(
            w.set_parent(a, Some((a, ParentType::Static))),
            Err(PhysicsError::ParentCycle { .. })
        ));
    }

    #[test]
    fn test_destroy_entity_detaches_children_in_place() {
        let mut w = world();
        let parent = w.create_entity(EntityDesc::new().at(2.0, 2.0)).unwrap();
        let child = w
            .create_child(parent, ParentType::Static, EntityDesc::new().at(1.0, 1.0))
            .unwrap();
        w.add_rect(child, RectDesc::new(1.0, 1.0)).unwrap();
        w.destroy_entity(parent).unwrap();

        assert!(w.entity(parent).is_none());
        assert_eq!(w.global_position(child).unwrap(), DVec2::new(3.0, 3.0));
        assert!(w.entity(child).unwrap().parent().is_none());
        assert_eq!(w.top_entities(), vec![child]);
        assert_eq!(w.destroy_entity(parent), Err(PhysicsError::StaleEntity(parent)));
    }

    #[test]
    fn test_grid_pieces_become_bodies() {
        let mut w = world();
        let e = w
            .create_grid(EntityDesc::new(), GridDesc::new(1.0).tiles(floor_tiles(0, 3)))
            .unwrap();
        let grid = w.entity(e).unwrap().bodies()[0];
        assert_eq!(w.body_count(), 2);
        let piece = w.tile_body(grid, 1, 0).unwrap().unwrap();
        assert_eq!(w.body(piece).unwrap().generated_by(), Some(grid));
        assert_eq!(w.body_global_position(piece).unwrap(), DVec2::new(1.5, 0.5));
        assert_eq!(w.remove_body(piece), Err(PhysicsError::GeneratedBody(piece)));

        w.clear_tile(grid, 1, 0).unwrap();
        assert_eq!(w.body_count(), 3);
        assert!(w.tile_body(grid, 1, 0).unwrap().is_none());
        assert_eq!(w.entity(e).unwrap().body_set.len(), 2);

        w.remove_body(grid).unwrap();
        assert_eq!(w.body_count(), 0);
        assert!(w.entity(e).unwrap().body_set.is_empty());
    }

    #[test]
    fn test_grid_offset_moves_pieces() {
        let mut w = world();
        let e = w
            .create_grid(EntityDesc::new(), GridDesc::new(2.0).tiles(floor_tiles(0, 1)))
            .unwrap();
        let grid = w.entity(e).unwrap().bodies()[0];
        w.set_body_offset(grid, 10.0, 0.0).unwrap();
        let piece = w.tile_body(grid, 0, 0).unwrap().unwrap();
        assert_eq!(w.body_global_position(piece).unwrap(), DVec2::new(11.0, 1.0));
    }

    #[test]
    fn test_tile_edits_on_wrong_body_kind() {
        let mut w = world();
        let e = w.create_rect(EntityDesc::new(), RectDesc::new(1.0, 1.0)).unwrap();
        let rect = w.entity(e).unwrap().bodies()[0];
        assert!(matches!(
            w.set_tile(rect, 0, 0, Tile::block()),
            Err(PhysicsError::WrongBodyKind { expected: "grid", .. })
        ));
        assert!(matches!(
            w.set_line_size(rect, 2.0),
            Err(PhysicsError::WrongBodyKind { expected: "line", .. })
        ));
    }

    #[test]
    fn test_line_side_must_fit_orientation() {
        let mut w = world();
        let e = w.create_entity(EntityDesc::new()).unwrap();
        let err = w.add_line(e, LineDesc::horizontal(2.0).side(LineSide::Left));
        assert!(matches!(err, Err(PhysicsError::InvalidLineSide { .. })));
        let line = w.add_line(e, LineDesc::vertical(2.0)).unwrap();
        assert!(w.set_line_side(line, LineSide::Up).is_err());
        w.set_line_side(line, LineSide::Right).unwrap();
        let shape = w.body(line).unwrap().shape().unwrap();
        assert!(shape.right && !shape.left);
    }

    #[test]
    fn test_invalid_dimensions_rejected() {
        let mut w = world();
        let e = w.create_entity(EntityDesc::new()).unwrap();
        assert!(matches!(
            w.add_rect(e, RectDesc::new(f64::NAN, 1.0)),
            Err(PhysicsError::InvalidDimension { .. })
        ));
        assert!(matches!(
            w.create_rect(EntityDesc::new(), RectDesc::new(-1.0, 1.0)),
            Err(PhysicsError::InvalidDimension { .. })
        ));
        // the half-built entity is rolled back
        assert_eq!(w.entity_count(), 1);
    }

    #[test]
    fn test_layers_through_world() {
        let mut w = world();
        assert_eq!(
            w.set_layer_rule("default", "enemy", LayerRule::Never),
            Err(PhysicsError::DefaultLayerRule)
        );
        w.set_layer_rule("player", "enemy", LayerRule::EqualGroup).unwrap();
        assert_eq!(w.get_layer_rule("enemy", "player"), LayerRule::EqualGroup);
        assert_eq!(w.get_layer_rule("default", "player"), LayerRule::Always);

        let e = w.create_rect(EntityDesc::new(), RectDesc::new(1.0, 1.0)).unwrap();
        let b = w.entity(e).unwrap().bodies()[0];
        w.set_body_layer(b, "player").unwrap();
        assert_eq!(w.body(b).unwrap().filter().unwrap().layer, w.layer_id("player").unwrap());
    }

    #[test]
    fn test_query_rect_and_point() {
        let mut w = world();
        let a = w.create_rect(EntityDesc::new().at(0.0, 0.0), RectDesc::new(2.0, 2.0)).unwrap();
        let b = w.create_rect(EntityDesc::new().at(5.0, 0.0), RectDesc::new(2.0, 2.0)).unwrap();
        let hits = w.query_rect(-2.0, -2.0, 3.0, 3.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, a);
        let hits = w.query_point(5.0, 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, b);
        assert!(w.query_point(2.5, 0.0).is_empty());

        let body = w.entity(b).unwrap().bodies()[0];
        w.set_body_enabled(body, false).unwrap();
        assert!(w.query_point(5.0, 0.5).is_empty());

        w.create_rect(EntityDesc::new().at(9.0, 0.0), RectDesc::new(2.0, 2.0).disabled()).unwrap();
        assert!(w.query_point(9.0, 0.0).is_empty());
    }

    #[test]
    fn test_raycast_hits_closest_solid() {
        let mut w = world();
        w.create_rect(EntityDesc::new().at(4.0, 0.0), RectDesc::new(1.0, 1.0)).unwrap();
        let near = w.create_rect(EntityDesc::new().at(2.0, 0.0), RectDesc::new(1.0, 1.0)).unwrap();
        w.create_rect(EntityDesc::new().at(1.0, 0.0), RectDesc::new(1.0, 1.0).sensor()).unwrap();

        let hit = w.raycast(DVec2::new(-1.0, 0.0), DVec2::new(10.0, 0.0)).unwrap();
        assert_eq!(hit.entity, near);
        assert!((hit.toi - 0.25).abs() < 1e-12);
        assert_eq!(hit.normal, DVec2::new(-1.0, 0.0));
        assert!(w.raycast(DVec2::new(-1.0, 0.0), DVec2::new(1.0, 0.0)).is_none());
    }

    #[test]
    fn test_set_level_moves_between_lists() {
        let mut w = world();
        let a = w.create_entity(EntityDesc::new()).unwrap();
        let b = w.create_entity(EntityDesc::new()).unwrap();
        w.set_level(a, 2).unwrap();
        assert_eq!(w.top_entities(), vec![b, a]);
        assert_eq!(w.levels.len(), 2);
    }
}
