//! Tile values and the fixed-size run-length-encoded block that stores them.
//!
//! A [`SubGrid`] is `SUBGRID_SIZE x SUBGRID_SIZE` tiles stored column by
//! column. A column is either absent (all empty) or a list of runs whose
//! lengths sum to `SUBGRID_SIZE`, with no two adjacent runs holding the same
//! tile. Large solid areas and empty space therefore cost a handful of runs.

use std::collections::HashMap;

use crate::grid::{Channel, PieceId};
use crate::types::LayerId;

/// Edge length of a subgrid, in tiles.
pub const SUBGRID_SIZE: usize = 120;

/// Collision shape of a tile.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileShape {
    #[default]
    Empty = 0,
    Block = 1,
    /// Line on the top edge, blocking from above.
    OneWayUp = 2,
    /// Line on the right edge, blocking from the right.
    OneWayRight = 3,
    /// Line on the bottom edge, blocking from below.
    OneWayDown = 4,
    /// Line on the left edge, blocking from the left.
    OneWayLeft = 5,
}

impl TileShape {
    pub fn from_id(id: u8) -> Option<TileShape> {
        Some(match id {
            0 => TileShape::Empty,
            1 => TileShape::Block,
            2 => TileShape::OneWayUp,
            3 => TileShape::OneWayRight,
            4 => TileShape::OneWayDown,
            5 => TileShape::OneWayLeft,
            _ => return None,
        })
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn is_empty(self) -> bool {
        self == TileShape::Empty
    }

    /// Merges along rows.
    pub fn merges_horizontally(self) -> bool {
        matches!(self, TileShape::Block | TileShape::OneWayUp | TileShape::OneWayDown)
    }

    /// Merges along columns.
    pub fn merges_vertically(self) -> bool {
        matches!(self, TileShape::Block | TileShape::OneWayRight | TileShape::OneWayLeft)
    }
}

/// Sensor overlay of a tile, independent of its solid shape.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SensorTile {
    pub layer: LayerId,
    pub group: u32,
}

/// One grid cell. `data` is opaque to the engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Tile {
    pub shape: TileShape,
    pub layer: LayerId,
    pub group: u32,
    pub sensor: Option<SensorTile>,
    pub data: u64,
}

impl Tile {
    pub const EMPTY: Tile = Tile {
        shape: TileShape::Empty,
        layer: LayerId::DEFAULT,
        group: 0,
        sensor: None,
        data: 0,
    };

    pub fn new(shape: TileShape) -> Self {
        Tile {
            shape,
            ..Tile::EMPTY
        }
    }

    pub fn block() -> Self {
        Tile::new(TileShape::Block)
    }

    pub fn with_layer(mut self, layer: LayerId) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    pub fn with_sensor(mut self, layer: LayerId, group: u32) -> Self {
        self.sensor = Some(SensorTile { layer, group });
        self
    }

    pub fn with_data(mut self, data: u64) -> Self {
        self.data = data;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Tile::EMPTY
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Run {
    len: u16,
    tile: Tile,
}

/// Fixed-size block of run-length-encoded columns, plus the weak
/// tile-to-piece references of both body channels.
#[derive(Clone, Debug)]
pub struct SubGrid {
    columns: Vec<Option<Vec<Run>>>,
    covers: [HashMap<u16, PieceId>; 2],
}

impl Default for SubGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl SubGrid {
    pub fn new() -> Self {
        Self {
            columns: vec![None; SUBGRID_SIZE],
            covers: [HashMap::new(), HashMap::new()],
        }
    }

    pub fn get(&self, col: usize, row: usize) -> Tile {
        let Some(runs) = self.columns.get(col).and_then(Option::as_ref) else {
            return Tile::EMPTY;
        };
        let mut start = 0usize;
        for run in runs {
            start += run.len as usize;
            if row < start {
                return run.tile;
            }
        }
        Tile::EMPTY
    }

    /// Store `tile`, returning the previous value.
    pub fn set(&mut self, col: usize, row: usize, tile: Tile) -> Tile {
        let old = self.get(col, row);
        if old == tile || col >= SUBGRID_SIZE || row >= SUBGRID_SIZE {
            return old;
        }
        let runs = match self.columns[col].take() {
            Some(runs) => runs,
            None => vec![Run {
                len: SUBGRID_SIZE as u16,
                tile: Tile::EMPTY,
            }],
        };

        let mut out: Vec<Run> = Vec::with_capacity(runs.len() + 2);
        let mut start = 0usize;
        for run in runs {
            let end = start + run.len as usize;
            if row >= start && row < end {
                push_run(&mut out, (row - start) as u16, run.tile);
                push_run(&mut out, 1, tile);
                push_run(&mut out, (end - row - 1) as u16, run.tile);
            } else {
                push_run(&mut out, run.len, run.tile);
            }
            start = end;
        }
        self.columns[col] = finish_column(out);
        old
    }

    /// Rewrite `rows` of column `col` through `f`, rebuilding the runs once.
    /// Returns `(row, old, new)` for every tile that changed.
    pub fn rewrite_column(
        &mut self,
        col: usize,
        rows: std::ops::Range<usize>,
        mut f: impl FnMut(usize, Tile) -> Tile,
    ) -> Vec<(usize, Tile, Tile)> {
        let mut dense = self.decode(col);
        let mut changed = Vec::new();
        for row in rows.start..rows.end.min(SUBGRID_SIZE) {
            let old = dense[row];
            let new = f(row, old);
            if new != old {
                dense[row] = new;
                changed.push((row, old, new));
            }
        }
        if !changed.is_empty() {
            let mut out = Vec::new();
            for tile in dense {
                push_run(&mut out, 1, tile);
            }
            self.columns[col] = finish_column(out);
        }
        changed
    }

    fn decode(&self, col: usize) -> Vec<Tile> {
        let mut dense = Vec::with_capacity(SUBGRID_SIZE);
        match self.columns.get(col).and_then(Option::as_ref) {
            Some(runs) => {
                for run in runs {
                    dense.extend(std::iter::repeat_n(run.tile, run.len as usize));
                }
            }
            None => dense.resize(SUBGRID_SIZE, Tile::EMPTY),
        }
        dense
    }

    /// Number of runs in a column (0 when the column is absent).
    pub fn run_count(&self, col: usize) -> usize {
        self.columns.get(col).and_then(Option::as_ref).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Option::is_none)
    }

    fn cover_key(col: usize, row: usize) -> u16 {
        (col * SUBGRID_SIZE + row) as u16
    }

    pub(crate) fn cover(&self, channel: Channel, col: usize, row: usize) -> Option<PieceId> {
        self.covers[channel as usize].get(&Self::cover_key(col, row)).copied()
    }

    pub(crate) fn set_cover(&mut self, channel: Channel, col: usize, row: usize, piece: Option<PieceId>) {
        let key = Self::cover_key(col, row);
        let map = &mut self.covers[channel as usize];
        match piece {
            Some(p) => {
                map.insert(key, p);
            }
            None => {
                map.remove(&key);
            }
        }
    }
}

fn push_run(out: &mut Vec<Run>, len: u16, tile: Tile) {
    if len == 0 {
        return;
    }
    match out.last_mut() {
        Some(last) if last.tile == tile => last.len += len,
        _ => out.push(Run { len, tile }),
    }
}

fn finish_column(runs: Vec<Run>) -> Option<Vec<Run>> {
    if runs.len() == 1 && runs[0].tile.is_empty() {
        None
    } else {
        Some(runs)
    }
}
