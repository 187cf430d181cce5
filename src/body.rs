use glam::DVec2;

use crate::arena::{BodyId, EntityId};
use crate::grid::{Grid, GridDesc};
use crate::types::{Aabb, LayerId, Side};

/// Extents plus which faces can block. Every small body reduces to one.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Shape {
    pub width: f64,
    pub height: f64,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl Shape {
    /// Box blocking on all four faces.
    pub fn solid(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            left: true,
            right: true,
            up: true,
            down: true,
        }
    }

    pub fn half(&self) -> DVec2 {
        DVec2::new(self.width * 0.5, self.height * 0.5)
    }

    pub fn aabb_at(&self, center: DVec2) -> Aabb {
        Aabb::from_center(center, self.width, self.height)
    }

    /// Whether the face on `side` blocks.
    pub fn collides(&self, side: Side) -> bool {
        match side {
            Side::Right => self.right,
            Side::Left => self.left,
            Side::Up => self.up,
            Side::Down => self.down,
        }
    }

    pub fn is_two_way(&self) -> bool {
        self.left == self.right && self.up == self.down
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Faces of a line that block. `Up` on a horizontal line is a platform you
/// can jump through from below.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineSide {
    All,
    Up,
    Down,
    Left,
    Right,
}

impl LineSide {
    pub fn fits(self, orientation: Orientation) -> bool {
        match self {
            LineSide::All => true,
            LineSide::Up | LineSide::Down => orientation == Orientation::Horizontal,
            LineSide::Left | LineSide::Right => orientation == Orientation::Vertical,
        }
    }
}

/// Layer membership of a small body.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    pub layer: LayerId,
    pub group: u32,
    pub is_sensor: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rect {
    pub width: f64,
    pub height: f64,
    pub filter: Filter,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    pub size: f64,
    pub orientation: Orientation,
    pub side: LineSide,
    pub filter: Filter,
}

impl Line {
    pub fn shape(&self) -> Shape {
        let blocks = |s: LineSide| self.side == LineSide::All || self.side == s;
        match self.orientation {
            Orientation::Horizontal => Shape {
                width: self.size,
                height: 0.0,
                left: false,
                right: false,
                up: blocks(LineSide::Up),
                down: blocks(LineSide::Down),
            },
            Orientation::Vertical => Shape {
                width: 0.0,
                height: self.size,
                left: blocks(LineSide::Left),
                right: blocks(LineSide::Right),
                up: false,
                down: false,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub enum BodyKind {
    Rect(Rect),
    Line(Line),
    Grid(Box<Grid>),
}

/// A collision shape attached to an entity.
pub struct Body {
    pub(crate) entity: EntityId,
    /// Offset from the owning entity.
    pub(crate) offset: DVec2,
    pub(crate) enabled: bool,
    pub(crate) kind: BodyKind,
    /// Entities resting on this body, with the side they rest on.
    pub(crate) higher_contacts: Vec<(EntityId, Side)>,
    /// The grid body this piece was generated from.
    pub(crate) generated_by: Option<BodyId>,
}

impl Body {
    pub(crate) fn new(entity: EntityId, offset: DVec2, enabled: bool, kind: BodyKind) -> Self {
        Self {
            entity,
            offset,
            enabled,
            kind,
            higher_contacts: Vec::new(),
            generated_by: None,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn offset(&self) -> DVec2 {
        self.offset
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn kind(&self) -> &BodyKind {
        &self.kind
    }

    pub fn generated_by(&self) -> Option<BodyId> {
        self.generated_by
    }

    /// Entities currently resting on this body.
    pub fn higher_contacts(&self) -> &[(EntityId, Side)] {
        &self.higher_contacts
    }

    pub fn as_grid(&self) -> Option<&Grid> {
        match &self.kind {
            BodyKind::Grid(g) => Some(g),
            _ => None,
        }
    }

    /// Capability table; `None` for grids, which collide through their pieces.
    pub fn shape(&self) -> Option<Shape> {
        match &self.kind {
            BodyKind::Rect(r) => Some(Shape::solid(r.width, r.height)),
            BodyKind::Line(l) => Some(l.shape()),
            BodyKind::Grid(_) => None,
        }
    }

    pub fn filter(&self) -> Option<&Filter> {
        match &self.kind {
            BodyKind::Rect(r) => Some(&r.filter),
            BodyKind::Line(l) => Some(&l.filter),
            BodyKind::Grid(_) => None,
        }
    }

    pub(crate) fn filter_mut(&mut self) -> Option<&mut Filter> {
        match &mut self.kind {
            BodyKind::Rect(r) => Some(&mut r.filter),
            BodyKind::Line(l) => Some(&mut l.filter),
            BodyKind::Grid(_) => None,
        }
    }

    pub fn is_sensor(&self) -> bool {
        self.filter().is_some_and(|f| f.is_sensor)
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self.kind {
            BodyKind::Rect(_) => "rect",
            BodyKind::Line(_) => "line",
            BodyKind::Grid(_) => "grid",
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Rectangle body description. `x`/`y` is the centre relative to the entity.
#[derive(Clone, Debug)]
pub struct RectDesc {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub layer: Option<String>,
    pub group: u32,
    pub is_sensor: bool,
    pub enabled: bool,
}

impl RectDesc {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            layer: None,
            group: 0,
            is_sensor: false,
            enabled: true,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn layer(mut self, name: &str) -> Self {
        self.layer = Some(name.to_owned());
        self
    }

    pub fn group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    pub fn sensor(mut self) -> Self {
        self.is_sensor = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Line body description. `x`/`y` is the midpoint relative to the entity.
#[derive(Clone, Debug)]
pub struct LineDesc {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub orientation: Orientation,
    pub side: LineSide,
    pub layer: Option<String>,
    pub group: u32,
    pub is_sensor: bool,
    pub enabled: bool,
}

impl LineDesc {
    pub fn horizontal(size: f64) -> Self {
        Self::new(size, Orientation::Horizontal)
    }

    pub fn vertical(size: f64) -> Self {
        Self::new(size, Orientation::Vertical)
    }

    fn new(size: f64, orientation: Orientation) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            size,
            orientation,
            side: LineSide::All,
            layer: None,
            group: 0,
            is_sensor: false,
            enabled: true,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn side(mut self, side: LineSide) -> Self {
        self.side = side;
        self
    }

    pub fn layer(mut self, name: &str) -> Self {
        self.layer = Some(name.to_owned());
        self
    }

    pub fn group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    pub fn sensor(mut self) -> Self {
        self.is_sensor = true;
        self
    }
}

/// Any body an entity can be created with.
#[derive(Clone, Debug)]
pub enum BodyDesc {
    Rect(RectDesc),
    Line(LineDesc),
    Grid(GridDesc),
}

impl From<RectDesc> for BodyDesc {
    fn from(d: RectDesc) -> Self {
        BodyDesc::Rect(d)
    }
}

impl From<LineDesc> for BodyDesc {
    fn from(d: LineDesc) -> Self {
        BodyDesc::Line(d)
    }
}

impl From<GridDesc> for BodyDesc {
    fn from(d: GridDesc) -> Self {
        BodyDesc::Grid(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_capabilities() {
        let platform = Line {
            size: 3.0,
            orientation: Orientation::Horizontal,
            side: LineSide::Up,
            filter: Filter::default(),
        };
        let s = platform.shape();
        assert_eq!((s.width, s.height), (3.0, 0.0));
        assert!(s.up && !s.down && !s.left && !s.right);
        assert!(!s.is_two_way());

        let wall = Line {
            size: 2.0,
            orientation: Orientation::Vertical,
            side: LineSide::All,
            filter: Filter::default(),
        };
        let s = wall.shape();
        assert_eq!((s.width, s.height), (0.0, 2.0));
        assert!(s.left && s.right && !s.up && !s.down);
        assert!(s.is_two_way());
    }

    #[test]
    fn test_line_side_fits_orientation() {
        assert!(LineSide::Up.fits(Orientation::Horizontal));
        assert!(!LineSide::Up.fits(Orientation::Vertical));
        assert!(LineSide::Left.fits(Orientation::Vertical));
        assert!(!LineSide::Right.fits(Orientation::Horizontal));
        assert!(LineSide::All.fits(Orientation::Vertical));
    }

    #[test]
    fn test_rect_shape_collides_everywhere() {
        let s = Shape::solid(2.0, 1.0);
        for side in Side::ALL {
            assert!(s.collides(side));
        }
        assert_eq!(s.half(), DVec2::new(1.0, 0.5));
        let bb = s.aabb_at(DVec2::new(1.0, 1.0));
        assert_eq!(bb.min, DVec2::new(0.0, 0.5));
    }
}
