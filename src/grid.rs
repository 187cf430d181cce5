//! Tile grid storage and collision piece generation.
//!
//! Tiles live in an array of [`SubGrid`]s anchored at a down-left origin that
//! moves when the grid grows. Every tile mutation is reconciled against the
//! grid's *pieces*: rectangles of same-key tiles that become bodies in the
//! world. Pieces are kept as an exact partition of the eligible tiles of each
//! channel, so every eligible tile is covered by exactly one piece.
//!
//! Reconciliation works tile by tile and never rescans the grid:
//! - a tile whose piece no longer matches is cut out of it, and the remainder
//!   is split into at most four rectangles;
//! - an uncovered eligible tile joins same-key neighbours along its merge
//!   axis, then stacks onto matching pieces above or below.
//!
//! The grid never touches the world. It records what changed and the world
//! pulls a [`GridDelta`] after each edit.

use std::collections::{BTreeMap, BTreeSet};

use glam::DVec2;

use crate::PhysicsError;
use crate::arena::BodyId;
use crate::body::{BodyKind, Filter, Line, LineSide, Orientation, Rect};
use crate::subgrid::{SUBGRID_SIZE, SubGrid, Tile, TileShape};
use crate::types::LayerId;

/// Tiles of padding allocated around the initial content.
pub const MARGIN: i32 = 10;

/// Upper bound on the allocated extent of one grid, in tiles per axis.
pub const MAX_GRID_SPAN: i64 = 1 << 20;

// Stored tiles keep one tile of headroom so neighbour lookups stay in i32.
const TILE_MIN: i64 = i32::MIN as i64 + 1;
const TILE_MAX: i64 = i32::MAX as i64 - 1;

fn check_tile_range(rect: TileRect) -> Result<(), PhysicsError> {
    let (x1, y1) = (rect.x as i64 + rect.w as i64 - 1, rect.y as i64 + rect.h as i64 - 1);
    if (rect.x as i64) < TILE_MIN || (rect.y as i64) < TILE_MIN || x1 > TILE_MAX || y1 > TILE_MAX {
        return Err(PhysicsError::TileOutOfRange { x: rect.x, y: rect.y });
    }
    Ok(())
}

/// Grid-local identifier of a generated piece.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceId(pub u32);

/// Body channels generated from tiles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    Solid = 0,
    Sensor = 1,
}

/// Rectangle of tiles in absolute tile coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl TileRect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> i64 {
        self.w as i64 * self.h as i64
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    pub fn contains_rect(&self, o: &TileRect) -> bool {
        o.x >= self.x && o.y >= self.y && o.x + o.w <= self.x + self.w && o.y + o.h <= self.y + self.h
    }

    pub fn union(&self, o: &TileRect) -> TileRect {
        let x = self.x.min(o.x);
        let y = self.y.min(o.y);
        TileRect {
            x,
            y,
            w: (self.x + self.w).max(o.x + o.w) - x,
            h: (self.y + self.h).max(o.y + o.h) - y,
        }
    }

    /// Tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = (i32, i32)> {
        let r = *self;
        (r.y..r.y + r.h).flat_map(move |y| (r.x..r.x + r.w).map(move |x| (x, y)))
    }
}

/// Tiles sharing a key may merge into one piece.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PieceKey {
    pub shape: TileShape,
    pub layer: LayerId,
    pub group: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Piece {
    pub rect: TileRect,
    pub key: PieceKey,
    pub channel: Channel,
}

/// Piece changes accumulated since the last [`Grid::take_delta`].
#[derive(Clone, Debug, Default)]
pub struct GridDelta {
    pub removed: Vec<PieceId>,
    pub added: Vec<(PieceId, Piece)>,
    /// `(id, piece, shrunk)`; pieces that only grew keep their contacts.
    pub resized: Vec<(PieceId, Piece, bool)>,
}

impl GridDelta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.resized.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct PendingDelta {
    added: BTreeSet<PieceId>,
    removed: BTreeSet<PieceId>,
    resized: BTreeMap<PieceId, TileRect>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TilePlacement {
    pub x: i32,
    pub y: i32,
    pub tile: Tile,
}

/// Tiles to write in one batch.
#[derive(Clone, Debug)]
pub enum TileArgs {
    List(Vec<TilePlacement>),
    /// Dense block with lower-left corner `(x, y)`; `info[column][row]`.
    Block { x: i32, y: i32, info: Vec<Vec<Tile>> },
}

impl TileArgs {
    fn check_range(&self) -> Result<(), PhysicsError> {
        match self {
            TileArgs::List(list) => list
                .iter()
                .try_for_each(|p| check_tile_range(TileRect::new(p.x, p.y, 1, 1))),
            TileArgs::Block { .. } => self.bounds().map_or(Ok(()), check_tile_range),
        }
    }

    fn bounds(&self) -> Option<TileRect> {
        match self {
            TileArgs::List(list) => list
                .iter()
                .map(|p| TileRect::new(p.x, p.y, 1, 1))
                .reduce(|a, b| a.union(&b)),
            TileArgs::Block { x, y, info } => {
                let w = info.len() as i32;
                let h = info.iter().map(Vec::len).max().unwrap_or(0) as i32;
                let r = TileRect::new(*x, *y, w, h);
                (!r.is_empty()).then_some(r)
            }
        }
    }
}

/// Tiles to clear in one batch.
#[derive(Clone, Debug)]
pub enum TileRegion {
    List(Vec<(i32, i32)>),
    Rect { x: i32, y: i32, w: i32, h: i32 },
}

/// Grid body description.
#[derive(Clone, Debug)]
pub struct GridDesc {
    /// Offset of tile `(0, 0)`'s lower-left corner from the entity.
    pub x: f64,
    pub y: f64,
    pub tile_size: f64,
    pub tiles: Option<TileArgs>,
    /// Initial allocation hint when no tiles are given.
    pub width: i32,
    pub height: i32,
    pub enabled: bool,
}

impl GridDesc {
    pub fn new(tile_size: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            tile_size,
            tiles: None,
            width: 0,
            height: 0,
            enabled: true,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn tiles(mut self, tiles: TileArgs) -> Self {
        self.tiles = Some(tiles);
        self
    }

    pub fn size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Run-length-encoded tile grid with incrementally maintained pieces.
#[derive(Clone, Debug)]
pub struct Grid {
    tile_size: f64,
    origin: (i32, i32),
    cols: usize,
    rows: usize,
    subgrids: Vec<Option<Box<SubGrid>>>,
    pieces: BTreeMap<PieceId, Piece>,
    next_piece: u32,
    pending: PendingDelta,
    /// Bodies the world created for each piece.
    pub(crate) bodies: BTreeMap<PieceId, BodyId>,
}

impl Grid {
    /// Empty grid with storage allocated around `hint`.
    pub fn new(tile_size: f64, hint: TileRect) -> Result<Self, PhysicsError> {
        if !(tile_size.is_finite() && tile_size > 0.0) {
            return Err(PhysicsError::InvalidDimension { value: tile_size });
        }
        let s = SUBGRID_SIZE as i64;
        let span = |len: i32| ((len.max(0) as i64 + 2 * MARGIN as i64 + s - 1) / s).max(1);
        let (cols, rows) = (span(hint.w), span(hint.h));
        if cols * s > MAX_GRID_SPAN || rows * s > MAX_GRID_SPAN {
            return Err(PhysicsError::TileOutOfRange { x: hint.x, y: hint.y });
        }
        let origin = (
            hint.x.saturating_sub(MARGIN),
            hint.y.saturating_sub(MARGIN),
        );
        Ok(Self {
            tile_size,
            origin,
            cols: cols as usize,
            rows: rows as usize,
            subgrids: vec![None; (cols * rows) as usize],
            pieces: BTreeMap::new(),
            next_piece: 0,
            pending: PendingDelta::default(),
            bodies: BTreeMap::new(),
        })
    }

    /// Grid from a description, with its initial tiles applied.
    pub fn from_desc(desc: &GridDesc) -> Result<Self, PhysicsError> {
        if let Some(tiles) = &desc.tiles {
            tiles.check_range()?;
        }
        let hint = desc
            .tiles
            .as_ref()
            .and_then(TileArgs::bounds)
            .unwrap_or(TileRect::new(0, 0, desc.width, desc.height));
        let mut grid = Grid::new(desc.tile_size, hint)?;
        if let Some(tiles) = &desc.tiles {
            grid.set_tiles(tiles)?;
        }
        Ok(grid)
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Allocated tile range as `(min_x, min_y, max_x, max_y)`, inclusive.
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        let s = SUBGRID_SIZE as i64;
        let clamp = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        (
            self.origin.0,
            self.origin.1,
            clamp(self.origin.0 as i64 + self.cols as i64 * s - 1),
            clamp(self.origin.1 as i64 + self.rows as i64 * s - 1),
        )
    }

    pub fn pieces(&self) -> impl Iterator<Item = (PieceId, &Piece)> {
        self.pieces.iter().map(|(id, p)| (*id, p))
    }

    pub fn piece(&self, id: PieceId) -> Option<&Piece> {
        self.pieces.get(&id)
    }

    /// Piece covering a tile on `channel`.
    pub fn piece_at(&self, channel: Channel, x: i32, y: i32) -> Option<PieceId> {
        let (idx, col, row) = self.locate(x, y)?;
        self.subgrids[idx].as_ref()?.cover(channel, col, row)
    }

    /// Body generated for a piece, once the world has created it.
    pub fn body_of(&self, piece: PieceId) -> Option<BodyId> {
        self.bodies.get(&piece).copied()
    }

    /// Bodies generated for every piece, in piece order.
    pub fn generated_bodies(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.bodies.values().copied()
    }

    // -----------------------------------------------------------------------
    // Storage
    // -----------------------------------------------------------------------

    fn locate(&self, x: i32, y: i32) -> Option<(usize, usize, usize)> {
        let s = SUBGRID_SIZE as i64;
        let lx = x as i64 - self.origin.0 as i64;
        let ly = y as i64 - self.origin.1 as i64;
        if lx < 0 || ly < 0 || lx >= self.cols as i64 * s || ly >= self.rows as i64 * s {
            return None;
        }
        let (c, r) = ((lx / s) as usize, (ly / s) as usize);
        Some((c * self.rows + r, (lx % s) as usize, (ly % s) as usize))
    }

    pub fn get_tile(&self, x: i32, y: i32) -> Tile {
        self.locate(x, y)
            .and_then(|(idx, col, row)| self.subgrids[idx].as_ref().map(|sg| sg.get(col, row)))
            .unwrap_or(Tile::EMPTY)
    }

    /// Grow the subgrid array until it covers the inclusive tile range.
    fn ensure(&mut self, rect: TileRect) -> Result<(), PhysicsError> {
        if rect.is_empty() {
            return Ok(());
        }
        check_tile_range(rect)?;
        let s = SUBGRID_SIZE as i64;
        let (ox, oy) = (self.origin.0 as i64, self.origin.1 as i64);
        let (x1, y1) = (rect.x as i64 + rect.w as i64 - 1, rect.y as i64 + rect.h as i64 - 1);
        let cmin = (rect.x as i64 - ox).div_euclid(s);
        let cmax = (x1 - ox).div_euclid(s);
        let rmin = (rect.y as i64 - oy).div_euclid(s);
        let rmax = (y1 - oy).div_euclid(s);
        let (cols, rows) = (self.cols as i64, self.rows as i64);
        let left = (-cmin).max(0);
        let right = (cmax - (cols - 1)).max(0);
        let down = (-rmin).max(0);
        let up = (rmax - (rows - 1)).max(0);
        if left == 0 && right == 0 && down == 0 && up == 0 {
            return Ok(());
        }

        let new_cols = cols + left + right;
        let new_rows = rows + down + up;
        let out_of_range = PhysicsError::TileOutOfRange { x: rect.x, y: rect.y };
        if new_cols * s > MAX_GRID_SPAN || new_rows * s > MAX_GRID_SPAN {
            return Err(out_of_range);
        }
        let new_origin = (
            i32::try_from(ox - left * s).map_err(|_| out_of_range.clone())?,
            i32::try_from(oy - down * s).map_err(|_| out_of_range.clone())?,
        );

        let mut subgrids = vec![None; (new_cols * new_rows) as usize];
        for c in 0..self.cols {
            for r in 0..self.rows {
                let sg = self.subgrids[c * self.rows + r].take();
                let (nc, nr) = (c + left as usize, r + down as usize);
                subgrids[nc * new_rows as usize + nr] = sg;
            }
        }
        tracing::debug!(
            left,
            right,
            down,
            up,
            cols = new_cols,
            rows = new_rows,
            "tile grid expanded"
        );
        self.subgrids = subgrids;
        self.cols = new_cols as usize;
        self.rows = new_rows as usize;
        self.origin = new_origin;
        Ok(())
    }

    /// Intersection of `rect` with the allocated range.
    fn clip(&self, rect: TileRect) -> TileRect {
        let (x0, y0, x1, y1) = self.bounds();
        let nx = rect.x.max(x0).max(TILE_MIN as i32);
        let ny = rect.y.max(y0).max(TILE_MIN as i32);
        let ex = (rect.x as i64 + rect.w as i64).min(x1 as i64 + 1).min(TILE_MAX + 1);
        let ey = (rect.y as i64 + rect.h as i64).min(y1 as i64 + 1).min(TILE_MAX + 1);
        TileRect::new(nx, ny, (ex - nx as i64).max(0) as i32, (ey - ny as i64).max(0) as i32)
    }

    fn write_tile(&mut self, x: i32, y: i32, tile: Tile) -> bool {
        let Some((idx, col, row)) = self.locate(x, y) else {
            return false;
        };
        let sg = self.subgrids[idx].get_or_insert_with(|| Box::new(SubGrid::new()));
        sg.set(col, row, tile) != tile
    }

    /// Rewrite every tile of an allocated `rect` through `f`, one column
    /// segment at a time. Returns the tiles that changed.
    fn rewrite_region(&mut self, rect: TileRect, mut f: impl FnMut(i32, i32, Tile) -> Tile) -> Vec<(i32, i32)> {
        let s = SUBGRID_SIZE as i64;
        let mut changed = Vec::new();
        for x in rect.x..rect.x + rect.w {
            let lx = x as i64 - self.origin.0 as i64;
            let (c, col) = ((lx / s) as usize, (lx % s) as usize);
            let mut y = rect.y as i64;
            let y_end = rect.y as i64 + rect.h as i64;
            while y < y_end {
                let ly = y - self.origin.1 as i64;
                let (r, row) = ((ly / s) as usize, (ly % s) as usize);
                let seg_end = y_end.min(y + (s - row as i64));
                let base_y = (y - row as i64) as i32;
                let idx = c * self.rows + r;
                let created = self.subgrids[idx].is_none();
                let sg = self.subgrids[idx].get_or_insert_with(|| Box::new(SubGrid::new()));
                let len = (seg_end - y) as usize;
                let hits = sg.rewrite_column(col, row..row + len, |rr, t| f(x, base_y + rr as i32, t));
                if created && hits.is_empty() {
                    self.subgrids[idx] = None;
                }
                changed.extend(hits.into_iter().map(|(rr, _, _)| (x, base_y + rr as i32)));
                y = seg_end;
            }
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Public edits
    // -----------------------------------------------------------------------

    pub fn set_tile(&mut self, x: i32, y: i32, tile: Tile) -> Result<(), PhysicsError> {
        self.ensure(TileRect::new(x, y, 1, 1))?;
        if self.write_tile(x, y, tile) {
            self.reconcile(&[(x, y)]);
        }
        Ok(())
    }

    /// Change only the shape, keeping layer, group, sensor and data.
    pub fn set_tile_shape(&mut self, x: i32, y: i32, shape: TileShape) -> Result<(), PhysicsError> {
        let tile = Tile {
            shape,
            ..self.get_tile(x, y)
        };
        self.set_tile(x, y, tile)
    }

    /// Clear a tile; outside the allocated range this is a no-op.
    pub fn clear_tile(&mut self, x: i32, y: i32) {
        if self.locate(x, y).is_some() && self.write_tile(x, y, Tile::EMPTY) {
            self.reconcile(&[(x, y)]);
        }
    }

    pub fn set_tiles(&mut self, args: &TileArgs) -> Result<(), PhysicsError> {
        args.check_range()?;
        let Some(bounds) = args.bounds() else {
            return Ok(());
        };
        self.ensure(bounds)?;
        let changed = match args {
            TileArgs::List(list) => {
                let mut changed = Vec::new();
                for p in list {
                    if self.write_tile(p.x, p.y, p.tile) {
                        changed.push((p.x, p.y));
                    }
                }
                changed
            }
            TileArgs::Block { x, y, info } => {
                let (bx, by) = (*x, *y);
                self.rewrite_region(bounds, |tx, ty, old| {
                    info.get((tx - bx) as usize)
                        .and_then(|column| column.get((ty - by) as usize))
                        .copied()
                        .unwrap_or(old)
                })
            }
        };
        self.reconcile(&changed);
        Ok(())
    }

    /// Clear tiles; rectangles are clipped to the allocated range and
    /// non-positive sizes are ignored.
    pub fn clear_tiles(&mut self, region: &TileRegion) {
        let changed = match region {
            TileRegion::List(list) => {
                let mut changed = Vec::new();
                for &(x, y) in list {
                    if self.locate(x, y).is_some() && self.write_tile(x, y, Tile::EMPTY) {
                        changed.push((x, y));
                    }
                }
                changed
            }
            TileRegion::Rect { x, y, w, h } => {
                if *w <= 0 || *h <= 0 {
                    return;
                }
                let clipped = self.clip(TileRect::new(*x, *y, *w, *h));
                if clipped.is_empty() {
                    return;
                }
                self.rewrite_region(clipped, |_, _, _| Tile::EMPTY)
            }
        };
        self.reconcile(&changed);
    }

    /// Visit every tile of the rectangle; `f` returns the replacement tile,
    /// or `None` to leave it unchanged.
    pub fn for_tiles(
        &mut self,
        rect: TileRect,
        mut f: impl FnMut(i32, i32, &Tile) -> Option<Tile>,
    ) -> Result<(), PhysicsError> {
        if rect.is_empty() {
            return Ok(());
        }
        self.ensure(rect)?;
        let changed = self.rewrite_region(rect, |x, y, t| f(x, y, &t).unwrap_or(t));
        self.reconcile(&changed);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pieces
    // -----------------------------------------------------------------------

    /// Key a tile should be covered by on `channel`, if any.
    fn desired_key(&self, channel: Channel, x: i32, y: i32) -> Option<PieceKey> {
        let tile = self.get_tile(x, y);
        match channel {
            Channel::Solid => {
                if tile.shape.is_empty() {
                    return None;
                }
                if tile.shape == TileShape::Block && self.enclosed(x, y, &tile) {
                    return None;
                }
                Some(PieceKey {
                    shape: tile.shape,
                    layer: tile.layer,
                    group: tile.group,
                })
            }
            Channel::Sensor => tile.sensor.map(|s| PieceKey {
                shape: TileShape::Block,
                layer: s.layer,
                group: s.group,
            }),
        }
    }

    /// Surrounded on all four sides by blocks of the same layer and group.
    fn enclosed(&self, x: i32, y: i32, tile: &Tile) -> bool {
        [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)].iter().all(|&(nx, ny)| {
            let n = self.get_tile(nx, ny);
            n.shape == TileShape::Block && n.layer == tile.layer && n.group == tile.group
        })
    }

    fn reconcile(&mut self, changed: &[(i32, i32)]) {
        if changed.is_empty() {
            return;
        }
        // (y, x) so iteration is row-major and horizontal runs form first
        let mut solid = BTreeSet::new();
        let mut sensor = BTreeSet::new();
        for &(x, y) in changed {
            sensor.insert((y, x));
            for (nx, ny) in [(x, y), (x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)] {
                solid.insert((ny, nx));
            }
        }
        self.reconcile_channel(Channel::Solid, &solid);
        self.reconcile_channel(Channel::Sensor, &sensor);
    }

    fn reconcile_channel(&mut self, channel: Channel, tiles: &BTreeSet<(i32, i32)>) {
        for &(y, x) in tiles {
            let Some(piece) = self.piece_at(channel, x, y) else {
                continue;
            };
            let want = self.desired_key(channel, x, y);
            if self.pieces.get(&piece).map(|p| p.key) != want {
                self.cut(channel, piece, x, y);
            }
        }
        for &(y, x) in tiles {
            if self.piece_at(channel, x, y).is_some() {
                continue;
            }
            if let Some(key) = self.desired_key(channel, x, y) {
                self.place(channel, x, y, key);
            }
        }
    }

    fn set_cover(&mut self, channel: Channel, x: i32, y: i32, piece: Option<PieceId>) {
        let Some((idx, col, row)) = self.locate(x, y) else {
            return;
        };
        let sg = self.subgrids[idx].get_or_insert_with(|| Box::new(SubGrid::new()));
        sg.set_cover(channel, col, row, piece);
    }

    fn cover_rect(&mut self, channel: Channel, rect: TileRect, piece: PieceId) {
        for (x, y) in rect.tiles() {
            self.set_cover(channel, x, y, Some(piece));
        }
    }

    fn create_piece(&mut self, channel: Channel, rect: TileRect, key: PieceKey) -> PieceId {
        let id = PieceId(self.next_piece);
        self.next_piece = self.next_piece.wrapping_add(1);
        self.pieces.insert(id, Piece { rect, key, channel });
        self.pending.added.insert(id);
        self.cover_rect(channel, rect, id);
        id
    }

    fn drop_piece(&mut self, id: PieceId) {
        self.pieces.remove(&id);
        self.pending.resized.remove(&id);
        if !self.pending.added.remove(&id) {
            self.pending.removed.insert(id);
        }
    }

    fn resize_piece(&mut self, id: PieceId, rect: TileRect) {
        let Some(piece) = self.pieces.get_mut(&id) else {
            return;
        };
        let old = piece.rect;
        piece.rect = rect;
        if !self.pending.added.contains(&id) {
            self.pending.resized.entry(id).or_insert(old);
        }
    }

    /// Remove tile `(x, y)` from `piece`, splitting what remains.
    fn cut(&mut self, channel: Channel, piece: PieceId, x: i32, y: i32) {
        let Some(&Piece { rect: r, key, .. }) = self.pieces.get(&piece) else {
            return;
        };
        self.set_cover(channel, x, y, None);
        let parts: Vec<TileRect> = [
            TileRect::new(r.x, r.y, r.w, y - r.y),
            TileRect::new(r.x, y + 1, r.w, r.y + r.h - y - 1),
            TileRect::new(r.x, y, x - r.x, 1),
            TileRect::new(x + 1, y, r.x + r.w - x - 1, 1),
        ]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();

        let Some(keep) = largest(&parts) else {
            self.drop_piece(piece);
            return;
        };
        self.resize_piece(piece, parts[keep]);
        for (i, part) in parts.iter().enumerate() {
            if i != keep {
                self.create_piece(channel, *part, key);
            }
        }
    }

    fn matching(&self, channel: Channel, x: i32, y: i32, key: PieceKey) -> Option<(PieceId, TileRect)> {
        let id = self.piece_at(channel, x, y)?;
        let piece = self.pieces.get(&id)?;
        (piece.key == key).then_some((id, piece.rect))
    }

    /// Cover tile `(x, y)`, merging with matching neighbours.
    fn place(&mut self, channel: Channel, x: i32, y: i32, key: PieceKey) {
        let mut rect = TileRect::new(x, y, 1, 1);
        let mut merged: Vec<(PieceId, TileRect)> = Vec::new();

        let along_rows = channel == Channel::Sensor || key.shape.merges_horizontally();
        if along_rows {
            for nx in [x - 1, x + 1] {
                if let Some((id, r)) = self.matching(channel, nx, y, key) {
                    if r.h == 1 && r.y == y {
                        rect = rect.union(&r);
                        merged.push((id, r));
                    }
                }
            }
        }

        if channel == Channel::Solid && key.shape.merges_vertically() {
            if let Some((id, r)) = self.matching(channel, rect.x, rect.y - 1, key) {
                if r.x == rect.x && r.w == rect.w && r.y + r.h == rect.y {
                    rect = rect.union(&r);
                    merged.push((id, r));
                }
            }
            if let Some((id, r)) = self.matching(channel, rect.x, rect.y + rect.h, key) {
                if r.x == rect.x && r.w == rect.w && r.y == rect.y + rect.h {
                    rect = rect.union(&r);
                    merged.push((id, r));
                }
            }
        }

        let rects: Vec<TileRect> = merged.iter().map(|(_, r)| *r).collect();
        let Some(keep) = largest(&rects) else {
            self.create_piece(channel, rect, key);
            return;
        };
        let survivor = merged[keep].0;
        self.resize_piece(survivor, rect);
        self.set_cover(channel, x, y, Some(survivor));
        for (i, (id, r)) in merged.iter().enumerate() {
            if i != keep {
                self.drop_piece(*id);
                self.cover_rect(channel, *r, survivor);
            }
        }
    }

    /// Pieces changed since the last call.
    pub fn take_delta(&mut self) -> GridDelta {
        let pending = std::mem::take(&mut self.pending);
        let added = pending
            .added
            .iter()
            .filter_map(|id| self.pieces.get(id).map(|p| (*id, *p)))
            .collect();
        let resized = pending
            .resized
            .iter()
            .filter_map(|(id, old)| {
                self.pieces
                    .get(id)
                    .map(|p| (*id, *p, !p.rect.contains_rect(old)))
            })
            .collect();
        let delta = GridDelta {
            removed: pending.removed.into_iter().collect(),
            added,
            resized,
        };
        if !delta.is_empty() {
            tracing::debug!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                resized = delta.resized.len(),
                "tile pieces changed"
            );
        }
        delta
    }

    /// Offset (relative to the grid body) and body kind for a piece.
    pub fn piece_body(&self, piece: &Piece) -> (DVec2, BodyKind) {
        let ts = self.tile_size;
        let r = piece.rect;
        let filter = Filter {
            layer: piece.key.layer,
            group: piece.key.group,
            is_sensor: piece.channel == Channel::Sensor,
        };
        let (x0, y0) = (r.x as f64 * ts, r.y as f64 * ts);
        let (w, h) = (r.w as f64 * ts, r.h as f64 * ts);
        let mid = DVec2::new(x0 + w * 0.5, y0 + h * 0.5);
        let line = |size, orientation, side| {
            BodyKind::Line(Line {
                size,
                orientation,
                side,
                filter,
            })
        };
        match (piece.channel, piece.key.shape) {
            (Channel::Solid, TileShape::OneWayUp) => (
                DVec2::new(mid.x, y0 + h),
                line(w, Orientation::Horizontal, LineSide::Up),
            ),
            (Channel::Solid, TileShape::OneWayDown) => (
                DVec2::new(mid.x, y0),
                line(w, Orientation::Horizontal, LineSide::Down),
            ),
            (Channel::Solid, TileShape::OneWayRight) => (
                DVec2::new(x0 + w, mid.y),
                line(h, Orientation::Vertical, LineSide::Right),
            ),
            (Channel::Solid, TileShape::OneWayLeft) => (
                DVec2::new(x0, mid.y),
                line(h, Orientation::Vertical, LineSide::Left),
            ),
            _ => (
                mid,
                BodyKind::Rect(Rect {
                    width: w,
                    height: h,
                    filter,
                }),
            ),
        }
    }
}

/// Index of the first rectangle with the largest area.
fn largest(rects: &[TileRect]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, r) in rects.iter().enumerate() {
        if best.is_none_or(|b| r.area() > rects[b].area()) {
            best = Some(i);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn grid() -> Grid {
        Grid::new(1.0, TileRect::new(0, 0, 10, 10)).unwrap()
    }

    fn place(xs: &[(i32, i32)], tile: Tile) -> TileArgs {
        TileArgs::List(xs.iter().map(|&(x, y)| TilePlacement { x, y, tile }).collect())
    }

    /// Pieces cover exactly the eligible tiles, each exactly once.
    fn assert_partition(g: &Grid, channel: Channel, region: TileRect) {
        let mut covered = HashSet::new();
        for (id, p) in g.pieces().filter(|(_, p)| p.channel == channel) {
            for (x, y) in p.rect.tiles() {
                assert!(covered.insert((x, y)), "tile ({x},{y}) covered twice");
                assert_eq!(g.piece_at(channel, x, y), Some(id));
                assert_eq!(g.desired_key(channel, x, y), Some(p.key));
            }
        }
        for (x, y) in region.tiles() {
            let eligible = g.desired_key(channel, x, y).is_some();
            assert_eq!(eligible, covered.contains(&(x, y)), "tile ({x},{y})");
        }
    }

    fn solid_count(g: &Grid) -> usize {
        g.pieces().filter(|(_, p)| p.channel == Channel::Solid).count()
    }

    #[test]
    fn test_set_get_round_trip_and_out_of_range() {
        let mut g = grid();
        let t = Tile::block().with_data(42);
        g.set_tile(3, 4, t).unwrap();
        assert_eq!(g.get_tile(3, 4), t);
        assert_eq!(g.get_tile(1_000_000, 4), Tile::EMPTY);
        g.clear_tile(3, 4);
        assert_eq!(g.get_tile(3, 4), Tile::EMPTY);
        // clearing outside the allocation does nothing
        g.clear_tile(-5000, -5000);
        assert_eq!(g.bounds().0, -10);
    }

    #[test]
    fn test_expansion_keeps_existing_tiles() {
        let mut g = grid();
        g.set_tile(0, 0, Tile::block()).unwrap();
        g.set_tile(1000, -500, Tile::new(TileShape::OneWayUp)).unwrap();
        assert_eq!(g.get_tile(0, 0), Tile::block());
        assert_eq!(g.get_tile(1000, -500).shape, TileShape::OneWayUp);
        let (x0, y0, x1, y1) = g.bounds();
        assert!(x0 <= 0 && y0 <= -500 && x1 >= 1000 && y1 >= 0);
        // pieces use absolute coordinates and survive the move
        let p = g.piece_at(Channel::Solid, 0, 0).unwrap();
        assert_eq!(g.piece(p).unwrap().rect, TileRect::new(0, 0, 1, 1));
    }

    #[test]
    fn test_far_coordinates_are_rejected() {
        let mut g = grid();
        let err = g.set_tile(i32::MAX, 0, Tile::block());
        assert!(matches!(err, Err(PhysicsError::TileOutOfRange { .. })));
        assert!(g.take_delta().is_empty());
    }

    #[test]
    fn test_tiles_at_i32_edges() {
        let desc = GridDesc::new(1.0).tiles(place(&[(i32::MIN, 0)], Tile::block()));
        assert!(matches!(Grid::from_desc(&desc), Err(PhysicsError::TileOutOfRange { .. })));

        let mut low = Grid::new(1.0, TileRect::new(i32::MIN + 1, 0, 1, 1)).unwrap();
        low.set_tile(i32::MIN + 1, 0, Tile::block()).unwrap();
        assert!(low.piece_at(Channel::Solid, i32::MIN + 1, 0).is_some());
        assert!(low.set_tile(i32::MIN, 0, Tile::block()).is_err());
        low.clear_tiles(&TileRegion::Rect { x: i32::MIN, y: -1, w: 5, h: 3 });
        assert_eq!(solid_count(&low), 0);

        let mut high = Grid::new(1.0, TileRect::new(i32::MAX - 1, 0, 1, 1)).unwrap();
        let row = [(i32::MAX - 2, 0), (i32::MAX - 1, 0)];
        high.set_tiles(&place(&row, Tile::block())).unwrap();
        let p = high.piece_at(Channel::Solid, i32::MAX - 1, 0).unwrap();
        assert_eq!(high.piece(p).unwrap().rect, TileRect::new(i32::MAX - 2, 0, 2, 1));
        assert!(high.set_tiles(&place(&[(i32::MAX, 0)], Tile::block())).is_err());
        high.clear_tiles(&TileRegion::Rect { x: i32::MAX - 3, y: 0, w: 3, h: 1 });
        assert_eq!(solid_count(&high), 0);
    }

    #[test]
    fn test_row_merges_into_one_piece() {
        let mut g = grid();
        let row: Vec<_> = (0..5).map(|x| (x, 0)).collect();
        g.set_tiles(&place(&row, Tile::block())).unwrap();
        assert_eq!(solid_count(&g), 1);
        let p = g.piece_at(Channel::Solid, 2, 0).unwrap();
        assert_eq!(g.piece(p).unwrap().rect, TileRect::new(0, 0, 5, 1));
        assert_partition(&g, Channel::Solid, TileRect::new(-2, -2, 10, 5));
    }

    #[test]
    fn test_clearing_middle_splits_and_refilling_rejoins() {
        let mut g = grid();
        for x in 0..5 {
            g.set_tile(x, 0, Tile::block()).unwrap();
        }
        g.take_delta();

        g.clear_tile(2, 0);
        assert_eq!(solid_count(&g), 2);
        let delta = g.take_delta();
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.resized.len(), 1);
        assert!(delta.resized[0].2, "kept piece shrank");
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 8, 3));

        g.set_tile(2, 0, Tile::block()).unwrap();
        assert_eq!(solid_count(&g), 1);
        let delta = g.take_delta();
        assert_eq!(delta.removed.len(), 1);
        assert!(!delta.resized[0].2, "survivor only grew");
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 8, 3));
    }

    #[test]
    fn test_block_rows_stack() {
        let mut g = grid();
        let info = vec![vec![Tile::block(); 2]; 3];
        g.set_tiles(&TileArgs::Block { x: 0, y: 0, info }).unwrap();
        assert_eq!(solid_count(&g), 1);
        let p = g.piece_at(Channel::Solid, 0, 0).unwrap();
        assert_eq!(g.piece(p).unwrap().rect, TileRect::new(0, 0, 3, 2));
    }

    #[test]
    fn test_enclosed_tile_has_no_piece() {
        let mut g = grid();
        let info = vec![vec![Tile::block(); 3]; 3];
        g.set_tiles(&TileArgs::Block { x: 0, y: 0, info }).unwrap();
        assert!(g.piece_at(Channel::Solid, 1, 1).is_none());
        assert_eq!(solid_count(&g), 4);
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 5, 5));

        // opening a neighbour exposes the centre
        g.clear_tile(1, 2);
        assert!(g.piece_at(Channel::Solid, 1, 1).is_some());
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 5, 5));

        // a different group does not enclose
        g.set_tile(1, 2, Tile::block().with_group(7)).unwrap();
        assert!(g.piece_at(Channel::Solid, 1, 1).is_some());
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 5, 5));

        g.set_tile(1, 2, Tile::block()).unwrap();
        assert!(g.piece_at(Channel::Solid, 1, 1).is_none());
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 5, 5));
    }

    #[test]
    fn test_one_way_never_merges_with_blocks() {
        let mut g = grid();
        g.set_tile(0, 0, Tile::block()).unwrap();
        g.set_tile(1, 0, Tile::new(TileShape::OneWayUp)).unwrap();
        g.set_tile(2, 0, Tile::new(TileShape::OneWayUp)).unwrap();
        g.set_tile(3, 0, Tile::new(TileShape::OneWayDown)).unwrap();
        g.set_tile(4, 0, Tile::block()).unwrap();
        assert_eq!(solid_count(&g), 4);
        let p = g.piece_at(Channel::Solid, 1, 0).unwrap();
        assert_eq!(g.piece(p).unwrap().rect, TileRect::new(1, 0, 2, 1));
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 7, 3));
    }

    #[test]
    fn test_vertical_one_way_merges_along_column() {
        let mut g = grid();
        for y in 0..3 {
            g.set_tile(5, y, Tile::new(TileShape::OneWayLeft)).unwrap();
        }
        // a horizontal neighbour of the same shape does not join
        g.set_tile(6, 1, Tile::new(TileShape::OneWayLeft)).unwrap();
        assert_eq!(solid_count(&g), 2);
        let p = g.piece_at(Channel::Solid, 5, 2).unwrap();
        assert_eq!(g.piece(p).unwrap().rect, TileRect::new(5, 0, 1, 3));
    }

    #[test]
    fn test_layer_and_group_split_pieces() {
        let mut g = grid();
        g.set_tile(0, 0, Tile::block()).unwrap();
        g.set_tile(1, 0, Tile::block().with_layer(LayerId(2))).unwrap();
        g.set_tile(2, 0, Tile::block().with_group(3)).unwrap();
        assert_eq!(solid_count(&g), 3);
    }

    #[test]
    fn test_data_change_leaves_pieces_alone() {
        let mut g = grid();
        g.set_tile(0, 0, Tile::block()).unwrap();
        g.take_delta();
        g.set_tile(0, 0, Tile::block().with_data(5)).unwrap();
        assert!(g.take_delta().is_empty());
        assert_eq!(g.get_tile(0, 0).data, 5);
    }

    #[test]
    fn test_sensor_channel_runs() {
        let mut g = grid();
        let sensor = Tile::EMPTY.with_sensor(LayerId(1), 0);
        for x in 0..4 {
            g.set_tile(x, 3, sensor).unwrap();
        }
        g.set_tile(0, 4, sensor).unwrap();
        let sensors: Vec<_> = g.pieces().filter(|(_, p)| p.channel == Channel::Sensor).collect();
        assert_eq!(sensors.len(), 2);
        assert_eq!(solid_count(&g), 0);
        assert_partition(&g, Channel::Sensor, TileRect::new(-1, 0, 6, 6));
    }

    #[test]
    fn test_clear_tiles_rect_clips_and_ignores_empty() {
        let mut g = grid();
        let info = vec![vec![Tile::block(); 4]; 4];
        g.set_tiles(&TileArgs::Block { x: 0, y: 0, info }).unwrap();
        g.clear_tiles(&TileRegion::Rect { x: 0, y: 0, w: 0, h: 10 });
        assert_eq!(g.get_tile(0, 0), Tile::block());
        g.clear_tiles(&TileRegion::Rect { x: -1000, y: -1000, w: 1002, h: 1002 });
        assert_eq!(g.get_tile(1, 1), Tile::EMPTY);
        assert_eq!(g.get_tile(2, 2), Tile::block());
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 6, 6));
    }

    #[test]
    fn test_for_tiles_rewrites_and_reconciles() {
        let mut g = grid();
        g.for_tiles(TileRect::new(0, 0, 3, 1), |x, _, _| {
            (x != 1).then(|| Tile::block().with_data(x as u64))
        })
        .unwrap();
        assert_eq!(g.get_tile(2, 0).data, 2);
        assert_eq!(g.get_tile(1, 0), Tile::EMPTY);
        assert_eq!(solid_count(&g), 2);
        assert_partition(&g, Channel::Solid, TileRect::new(-1, -1, 5, 3));
    }

    #[test]
    fn test_piece_geometry() {
        let g = Grid::new(2.0, TileRect::new(0, 0, 4, 4)).unwrap();
        let key = |shape| PieceKey {
            shape,
            layer: LayerId::DEFAULT,
            group: 0,
        };
        let block = Piece {
            rect: TileRect::new(1, 0, 3, 1),
            key: key(TileShape::Block),
            channel: Channel::Solid,
        };
        let (at, kind) = g.piece_body(&block);
        assert_eq!(at, DVec2::new(5.0, 1.0));
        match kind {
            BodyKind::Rect(r) => assert_eq!((r.width, r.height), (6.0, 2.0)),
            _ => panic!("block piece should be a rect"),
        }

        let up = Piece {
            key: key(TileShape::OneWayUp),
            ..block
        };
        let (at, kind) = g.piece_body(&up);
        assert_eq!(at, DVec2::new(5.0, 2.0));
        assert!(matches!(kind, BodyKind::Line(Line { side: LineSide::Up, .. })));

        let left = Piece {
            rect: TileRect::new(0, 0, 1, 2),
            key: key(TileShape::OneWayLeft),
            channel: Channel::Solid,
        };
        let (at, kind) = g.piece_body(&left);
        assert_eq!(at, DVec2::new(0.0, 2.0));
        match kind {
            BodyKind::Line(l) => {
                assert_eq!(l.size, 4.0);
                assert_eq!(l.orientation, Orientation::Vertical);
                assert_eq!(l.side, LineSide::Left);
            }
            _ => panic!("one-way piece should be a line"),
        }
    }

    #[test]
    fn test_invalid_tile_size() {
        assert!(matches!(
            Grid::new(0.0, TileRect::new(0, 0, 1, 1)),
            Err(PhysicsError::InvalidDimension { .. })
        ));
    }
}
