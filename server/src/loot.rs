//! Loot claims, bounce physics and expiry.

use crate::collision::first_collision;
use crate::combat::award_experience;
use crate::entity::{Loot, Obstacle, Player};
use crate::game::World;
use crate::physics::step_horizontal;
use shared::{GRAVITY, LOOT_HALF_SIZE};

pub const LOOT_COOLDOWN_MS: f64 = 250.0;
pub const LOOT_RANGE_X: f32 = 48.0;
pub const LOOT_RANGE_Y: f32 = 48.0;
/// Time a claimed item stays visible before it is removed.
pub const LOOT_PICKUP_DELAY_MS: f64 = 300.0;
pub const LOOT_LIFETIME_MS: f64 = 30_000.0;

const BOUNCE: f32 = -0.5;
const FRICTION: f32 = 0.8;
/// A landing bounce slower than this ends the bounce.
const REST_BOUNCE: f32 = 1.0;
const REST_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub loot_id: u32,
    pub name: String,
    pub level_up: Option<u32>,
}

/// Claims the nearest unclaimed item inside the pickup rectangle around
/// `player`.
///
/// The first claim on an item wins and is never undone; the item stays in
/// the world, marked as being collected, until its pickup delay runs out.
pub fn claim_nearest(loot: &mut [Loot], player: &mut Player, now_ms: f64) -> Option<Claim> {
    let item = loot
        .iter_mut()
        .filter(|item| {
            !item.is_being_collected
                && (item.x - player.x).abs() <= LOOT_RANGE_X
                && (item.y - player.y).abs() <= LOOT_RANGE_Y
        })
        .min_by(|a, b| {
            let da = (a.x - player.x).hypot(a.y - player.y);
            let db = (b.x - player.x).hypot(b.y - player.y);
            da.total_cmp(&db)
        })?;

    item.is_being_collected = true;
    item.collected_by = Some(player.username.clone());
    item.remove_at = Some(now_ms + LOOT_PICKUP_DELAY_MS);

    *player.inventory.entry(item.name.clone()).or_insert(0) += 1;
    let level_up = match item.experience {
        0 => None,
        amount => award_experience(player, amount),
    };

    Some(Claim {
        loot_id: item.id,
        name: item.name.clone(),
        level_up,
    })
}

impl World {
    pub(crate) fn update_loot(&mut self) {
        let now = self.now_ms;
        let players = &self.players;
        self.loot.retain(|item| {
            if now - item.spawn_time > LOOT_LIFETIME_MS {
                return false;
            }
            if matches!(item.remove_at, Some(at) if now >= at) {
                return false;
            }
            match &item.collected_by {
                Some(username) => players.contains_key(username),
                None => true,
            }
        });

        for item in &mut self.loot {
            step_loot(item, &self.obstacles, self.height);
        }
    }
}

fn step_loot(item: &mut Loot, obstacles: &[Obstacle], map_height: f32) {
    let velocity_x = item.velocity_x;
    if velocity_x != 0.0 && step_horizontal(item, velocity_x, obstacles) {
        item.velocity_x *= BOUNCE;
    }

    let previous_y = item.y;
    item.velocity_y += GRAVITY;
    item.y += item.velocity_y;

    if let Some(obstacle) = first_collision(&*item, obstacles) {
        if item.velocity_y > 0.0 {
            item.y = obstacle.top() - LOOT_HALF_SIZE;
            land(item);
        } else {
            item.y = previous_y;
            item.velocity_y = 0.0;
        }
    }

    if item.y > map_height - LOOT_HALF_SIZE {
        item.y = map_height - LOOT_HALF_SIZE;
        land(item);
    }

    if item.velocity_x.abs() < REST_EPSILON && item.velocity_y.abs() < REST_EPSILON {
        item.velocity_x = 0.0;
        item.velocity_y = 0.0;
    }
}

fn land(item: &mut Loot) {
    item.velocity_y *= BOUNCE;
    if item.velocity_y.abs() < REST_BOUNCE {
        item.velocity_y = 0.0;
    }
    item.velocity_x *= FRICTION;
}
