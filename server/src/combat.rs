//! Damage, targeting and progression rules.

use crate::entity::{Monster, Player};
use crate::physics::Vector2;
use rand::Rng;

pub const ATTACK_RANGE: f32 = 60.0;
pub const ATTACK_COOLDOWN_MS: f64 = 500.0;
pub const CRIT_CHANCE: f64 = 0.05;
pub const CONTACT_DAMAGE: i32 = 10;
pub const INVULNERABILITY_MS: f64 = 1000.0;
pub const KNOCKBACK_X: f32 = 6.0;
pub const KNOCKBACK_Y: f32 = -4.0;

const STRENGTH_PER_LEVEL: u32 = 2;
const HEALTH_PER_LEVEL: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub damage: i32,
    pub critical: bool,
}

/// `floor(strength * 5 * U[0.8, 1.2])`, doubled on a critical hit.
pub fn roll_damage<R: Rng + ?Sized>(strength: u32, rng: &mut R) -> Hit {
    let spread: f64 = rng.gen_range(0.8..=1.2);
    let base = (strength as f64 * 5.0 * spread).floor() as i32;
    let critical = rng.gen_bool(CRIT_CHANCE);
    Hit {
        damage: if critical { base * 2 } else { base },
        critical,
    }
}

/// Index of the closest live monster within [`ATTACK_RANGE`] of `(x, y)`.
pub fn nearest_target(monsters: &[Monster], x: f32, y: f32) -> Option<usize> {
    let origin = Vector2::new(x, y);
    monsters
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_alive())
        .map(|(index, m)| (index, origin.distance(&Vector2::new(m.x, m.y))))
        .filter(|(_, distance)| *distance <= ATTACK_RANGE)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
}

/// Experience needed to leave `level`: `floor(100 * 1.5^(level - 1))`.
pub fn required_experience(level: u32) -> u32 {
    let exponent = level.saturating_sub(1) as i32;
    (100.0 * 1.5_f64.powi(exponent)).floor() as u32
}

/// Adds experience and applies every level-up it pays for.
///
/// Experience is cumulative, so each threshold is crossed exactly once.
/// Returns the new level when at least one level was gained.
pub fn award_experience(player: &mut Player, amount: u32) -> Option<u32> {
    player.experience = player.experience.saturating_add(amount);

    let start = player.level;
    while player.experience >= required_experience(player.level) {
        player.level += 1;
        player.strength += STRENGTH_PER_LEVEL;
        player.max_health += HEALTH_PER_LEVEL;
        player.current_health = player.max_health;
    }

    (player.level > start).then_some(player.level)
}
