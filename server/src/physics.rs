//! Per-tick motion helpers shared by players, monsters and loot.
//!
//! Positions use screen coordinates: `y` grows downward, so gravity adds to
//! `velocity_y` and a body's bottom edge is `y + half_size`. All steps are in
//! pixels per tick; there is no `dt` because the simulation never runs a
//! partial tick.

use crate::collision::{collides, first_collision, Aabb, Body, Movable};
use crate::entity::Obstacle;
use shared::GRAVITY;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector, or zero for a zero-length input.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::default()
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        Vector2::new(self.x - other.x, self.y - other.y).magnitude()
    }
}

/// Bodies whose position and velocity the simulation writes back.
pub trait Kinematic: Movable {
    fn set_position(&mut self, x: f32, y: f32);
    fn set_velocity(&mut self, velocity_x: f32, velocity_y: f32);
}

macro_rules! kinematic {
    ($($ty:ty),*) => {
        $(impl Kinematic for $ty {
            fn set_position(&mut self, x: f32, y: f32) {
                self.x = x;
                self.y = y;
            }

            fn set_velocity(&mut self, velocity_x: f32, velocity_y: f32) {
                self.velocity_x = velocity_x;
                self.velocity_y = velocity_y;
            }
        })*
    };
}

kinematic!(crate::entity::Player, crate::entity::Monster, crate::entity::Loot);

/// Outcome of a vertical step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalContact {
    Airborne,
    /// Came down onto an obstacle's top edge.
    Landed,
    /// Hit an obstacle some other way and was put back.
    Blocked,
}

/// Shifts a body horizontally by `dx`. When the new position collides, `x`
/// is restored and `true` is returned; velocity is left to the caller.
pub fn step_horizontal<K: Kinematic>(body: &mut K, dx: f32, obstacles: &[Obstacle]) -> bool {
    let (previous_x, y) = body.position();
    body.set_position(previous_x + dx, y);

    if first_collision(&*body, obstacles).is_some() {
        body.set_position(previous_x, y);
        return true;
    }
    false
}

/// Applies one tick of gravity and the resulting vertical motion.
///
/// A collision whose obstacle top was at or below the body's bottom edge
/// before the step is a landing: the body rests on the top edge. Any other
/// collision restores the previous `y`. Both zero the vertical velocity.
pub fn step_vertical<K: Kinematic>(body: &mut K, obstacles: &[Obstacle]) -> VerticalContact {
    let (x, previous_y) = body.position();
    let (velocity_x, velocity_y) = body.velocity();
    let velocity_y = velocity_y + GRAVITY;

    body.set_velocity(velocity_x, velocity_y);
    body.set_position(x, previous_y + velocity_y);

    let Some(obstacle) = first_collision(&*body, obstacles) else {
        return VerticalContact::Airborne;
    };

    let half = body.half_size();
    body.set_velocity(velocity_x, 0.0);
    if previous_y + half <= obstacle.top() {
        body.set_position(x, obstacle.top() - half);
        VerticalContact::Landed
    } else {
        body.set_position(x, previous_y);
        VerticalContact::Blocked
    }
}

/// Pushes a body out of every obstacle it still overlaps.
///
/// The push points from the obstacle centre to the body centre and is as long
/// as the shallower penetration axis. A body centred exactly on an obstacle
/// is pushed straight up. Returns whether anything moved.
pub fn push_out<K: Kinematic>(body: &mut K, obstacles: &[Obstacle]) -> bool {
    let mut moved = false;

    for obstacle in obstacles {
        if !collides(&*body, obstacle) {
            continue;
        }

        let bounds = body.bounds();
        let other = Aabb::from(obstacle);
        let depth_x = bounds.right.min(other.right) - bounds.left.max(other.left);
        let depth_y = bounds.bottom.min(other.bottom) - bounds.top.max(other.top);
        let depth = depth_x.min(depth_y);

        let (x, y) = body.position();
        let away = Vector2::new(x - obstacle.x, y - obstacle.y);
        let push = if away.magnitude() == 0.0 {
            Vector2::new(0.0, -depth_y)
        } else {
            away.normalize().scale(depth)
        };

        body.set_position(x + push.x, y + push.y);
        moved = true;
    }

    moved
}
