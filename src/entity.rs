use glam::DVec2;

use crate::api::EntityListener;
use crate::arena::{BodyId, EntityId};
use crate::body::BodyDesc;
use crate::types::{Contact, ParentType, Side};
use crate::vbh::TreeVbh;

/// A node of the entity tree.
///
/// Position and velocity are local to the parent. Entities without a parent,
/// or attached with [`ParentType::Follow`], are *top entities*: they own the
/// collision state (body set, contacts, crush flag) and are simulated. A
/// static child merges its bodies into its top entity instead.
pub struct Entity {
    pub(crate) parent: Option<(EntityId, ParentType)>,
    pub(crate) children: Vec<EntityId>,
    pub(crate) bodies: Vec<BodyId>,
    pub(crate) top: EntityId,
    pub(crate) position: DVec2,
    pub(crate) velocity: DVec2,
    pub(crate) level: i32,
    pub(crate) listener: Option<Box<dyn EntityListener>>,

    // Top entity state
    /// Every small body of this top entity and its static descendants, in
    /// top-local coordinates.
    pub(crate) body_set: TreeVbh<BodyId>,
    pub(crate) simv: DVec2,
    pub(crate) lower: [Option<Contact>; 4],
    pub(crate) pot_contacts: Vec<(BodyId, BodyId)>,
    pub(crate) invalid_overlap: Vec<(BodyId, BodyId)>,
    pub(crate) crushed: bool,

    /// `(own body, other body)` pairs currently overlapping.
    pub(crate) overlaps: Vec<(BodyId, BodyId)>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, position: DVec2, velocity: DVec2, level: i32) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            bodies: Vec::new(),
            top: id,
            position,
            velocity,
            level,
            listener: None,
            body_set: TreeVbh::new(),
            simv: DVec2::ZERO,
            lower: [None; 4],
            pot_contacts: Vec::new(),
            invalid_overlap: Vec::new(),
            crushed: false,
            overlaps: Vec::new(),
        }
    }

    pub fn is_top(&self) -> bool {
        !matches!(self.parent, Some((_, ParentType::Static)))
    }

    /// Local position.
    pub fn position(&self) -> DVec2 {
        self.position
    }

    /// Local velocity.
    pub fn velocity(&self) -> DVec2 {
        self.velocity
    }

    /// Global displacement over the last step divided by its duration.
    pub fn simulated_velocity(&self) -> DVec2 {
        self.simv
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn parent(&self) -> Option<(EntityId, ParentType)> {
        self.parent
    }

    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    pub fn top(&self) -> EntityId {
        self.top
    }

    /// Contact blocking `side`; only top entities hold contacts.
    pub fn contact(&self, side: Side) -> Option<Contact> {
        self.lower[side.index()]
    }

    pub fn contacts(&self) -> impl Iterator<Item = Contact> + '_ {
        self.lower.iter().flatten().copied()
    }

    pub fn is_crushed(&self) -> bool {
        self.crushed
    }

    pub fn overlaps(&self) -> &[(BodyId, BodyId)] {
        &self.overlaps
    }
}

/// Entity description for [`crate::World::create_entity`].
#[derive(Clone, Debug, Default)]
pub struct EntityDesc {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub level: i32,
    pub bodies: Vec<BodyDesc>,
}

impl EntityDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn velocity(mut self, vx: f64, vy: f64) -> Self {
        self.vx = vx;
        self.vy = vy;
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_body(mut self, body: impl Into<BodyDesc>) -> Self {
        self.bodies.push(body.into());
        self
    }
}
