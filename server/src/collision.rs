//! Axis-aligned collision tests against static obstacles.
//!
//! Every entity is treated as a square box of fixed half-size centred on its
//! position. Overlap is strict on all four edges, so two boxes that only
//! touch do not collide.
//!
//! One-way platforms only stop bodies that expose a vertical velocity
//! through [`Body::as_movable`], are moving down or resting (`vy >= 0`), and
//! whose bottom edge one step earlier (`bottom - vy`) was at or above the
//! platform top. Everything else passes through them.

use crate::entity::{Loot, Monster, Obstacle, Player};
use shared::{ENTITY_HALF_SIZE, LOOT_HALF_SIZE};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Aabb {
    pub fn around(x: f32, y: f32, half_width: f32, half_height: f32) -> Self {
        Self {
            left: x - half_width,
            right: x + half_width,
            top: y - half_height,
            bottom: y + half_height,
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.right > other.left
            && self.left < other.right
            && self.bottom > other.top
            && self.top < other.bottom
    }
}

impl From<&Obstacle> for Aabb {
    fn from(o: &Obstacle) -> Self {
        Aabb::around(o.x, o.y, o.width / 2.0, o.height / 2.0)
    }
}

/// Anything with a position that can be tested against obstacles.
pub trait Body {
    fn position(&self) -> (f32, f32);

    fn half_size(&self) -> f32 {
        ENTITY_HALF_SIZE
    }

    /// Capability check used by one-way platforms.
    fn as_movable(&self) -> Option<&dyn Movable> {
        None
    }

    fn bounds(&self) -> Aabb {
        let (x, y) = self.position();
        let half = self.half_size();
        Aabb::around(x, y, half, half)
    }
}

pub trait Movable: Body {
    fn velocity(&self) -> (f32, f32);
}

/// A bare position with no velocity. One-way platforms never stop it.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub x: f32,
    pub y: f32,
}

impl Body for Probe {
    fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

macro_rules! movable_body {
    ($ty:ty, $half:expr) => {
        impl Body for $ty {
            fn position(&self) -> (f32, f32) {
                (self.x, self.y)
            }

            fn half_size(&self) -> f32 {
                $half
            }

            fn as_movable(&self) -> Option<&dyn Movable> {
                Some(self)
            }
        }

        impl Movable for $ty {
            fn velocity(&self) -> (f32, f32) {
                (self.velocity_x, self.velocity_y)
            }
        }
    };
}

movable_body!(Player, ENTITY_HALF_SIZE);
movable_body!(Monster, ENTITY_HALF_SIZE);
movable_body!(Loot, LOOT_HALF_SIZE);

pub fn collides(body: &dyn Body, obstacle: &Obstacle) -> bool {
    let bounds = body.bounds();
    let overlapping = bounds.overlaps(&Aabb::from(obstacle));

    if !obstacle.is_one_way_platform {
        return overlapping;
    }

    let Some(movable) = body.as_movable() else {
        return false;
    };
    let (_, velocity_y) = movable.velocity();
    if velocity_y < 0.0 {
        return false;
    }

    let previous_bottom = bounds.bottom - velocity_y;
    previous_bottom <= obstacle.top() && overlapping
}

/// Returns the first obstacle, in declaration order, that `body` collides with.
pub fn first_collision<'a>(body: &dyn Body, obstacles: &'a [Obstacle]) -> Option<&'a Obstacle> {
    obstacles.iter().find(|obstacle| collides(body, obstacle))
}

pub fn collides_any(body: &dyn Body, obstacles: &[Obstacle]) -> bool {
    first_collision(body, obstacles).is_some()
}
