//! Monster spawning, behaviour and death.

use crate::config::{monster_template, LootTemplate, MonsterTemplate};
use crate::entity::{Loot, Monster};
use crate::game::World;
use crate::physics::{step_horizontal, step_vertical};
use log::{debug, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{BehaviorState, ENTITY_HALF_SIZE};

/// Live monsters allowed in one world across all spawn rules.
pub const MONSTER_CAP: usize = 30;
pub const BEHAVIOR_MIN_MS: f64 = 1000.0;
pub const BEHAVIOR_MAX_MS: f64 = 4000.0;
pub const MAX_LOOT_DROPS: usize = 3;
const DROP_SPREAD: f32 = 8.0;

#[derive(Debug, Clone)]
pub struct Spawner {
    pub template: MonsterTemplate,
    pub interval_ms: f64,
    pub max_spawned: usize,
    pub next_spawn_at: f64,
}

pub fn behavior_speed(behavior: BehaviorState) -> f32 {
    match behavior {
        BehaviorState::Idle => 0.0,
        BehaviorState::Walk => 1.0,
        BehaviorState::Run => 2.0,
    }
}

impl World {
    /// Adds a monster of catalog kind `kind` at `(x, y)`, outside any spawn rule.
    pub fn spawn_monster(&mut self, kind: &str, x: f32, y: f32) -> Option<u32> {
        let template = monster_template(kind)?;
        let id = self.next_id();
        let mut monster = Monster::new(id, template, x, y);
        monster.behavior_until = self.now_ms;
        self.monsters.push(monster);
        Some(id)
    }

    pub fn spawn_loot(
        &mut self,
        template: &LootTemplate,
        x: f32,
        y: f32,
        velocity_x: f32,
        velocity_y: f32,
    ) -> u32 {
        let id = self.next_id();
        let mut item = Loot::new(id, template, x, y, self.now_ms);
        item.velocity_x = velocity_x;
        item.velocity_y = velocity_y;
        self.loot.push(item);
        id
    }

    pub(crate) fn spawn_from(&mut self, spawner: usize) {
        let Some(template) = self.spawners.get(spawner).map(|s| s.template.clone()) else {
            return;
        };
        let (x, y) = match self.spawn_points.choose(&mut self.rng) {
            Some(&(x, y)) => (x, y - ENTITY_HALF_SIZE),
            None => (self.width * 0.2, self.height * 0.3),
        };

        let id = self.next_id();
        let mut monster = Monster::new(id, template, x, y);
        monster.spawner = Some(spawner);
        monster.behavior_until = self.now_ms;
        debug!(
            "[{}] Spawned {} #{} at ({:.0}, {:.0})",
            self.name, monster.template.name, id, x, y
        );
        self.monsters.push(monster);
    }

    /// Each due rule adds one monster while it is below its own maximum and
    /// the world is below [`MONSTER_CAP`].
    pub(crate) fn run_spawners(&mut self) {
        for index in 0..self.spawners.len() {
            let spawner = &mut self.spawners[index];
            if self.now_ms < spawner.next_spawn_at {
                continue;
            }
            spawner.next_spawn_at = self.now_ms + spawner.interval_ms;
            let max_spawned = spawner.max_spawned;

            let alive = self
                .monsters
                .iter()
                .filter(|m| m.spawner == Some(index))
                .count();
            if alive < max_spawned && self.monsters.len() < MONSTER_CAP {
                self.spawn_from(index);
            }
        }
    }

    pub(crate) fn update_monsters(&mut self) {
        let monsters = std::mem::take(&mut self.monsters);
        let mut survivors = Vec::with_capacity(monsters.len());

        for mut monster in monsters {
            if !monster.is_alive() {
                self.drop_loot(&monster);
                continue;
            }

            if self.now_ms >= monster.behavior_until {
                self.roll_behavior(&mut monster);
            }
            if monster.behavior == BehaviorState::Run {
                if let Some(direction) = self.chase_direction(&monster) {
                    monster.direction = direction;
                }
            }

            let velocity_x = monster.direction * behavior_speed(monster.behavior);
            monster.velocity_x = velocity_x;
            if velocity_x != 0.0 && step_horizontal(&mut monster, velocity_x, &self.obstacles) {
                // Bounce off walls instead of stopping.
                monster.direction = -monster.direction;
                monster.velocity_x = -velocity_x;
            }
            step_vertical(&mut monster, &self.obstacles);

            if monster.y > self.height {
                warn!(
                    "[{}] {} #{} fell out of the world",
                    self.name, monster.template.name, monster.id
                );
                continue;
            }
            survivors.push(monster);
        }

        self.monsters = survivors;
    }

    fn roll_behavior(&mut self, monster: &mut Monster) {
        let weights = monster.template.behavior;
        monster.behavior = WeightedIndex::new([weights.idle, weights.walk, weights.run])
            .map(|dist| match dist.sample(&mut self.rng) {
                0 => BehaviorState::Idle,
                1 => BehaviorState::Walk,
                _ => BehaviorState::Run,
            })
            .unwrap_or(BehaviorState::Idle);

        monster.behavior_until =
            self.now_ms + self.rng.gen_range(BEHAVIOR_MIN_MS..=BEHAVIOR_MAX_MS);
        monster.direction = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    }

    /// Direction toward the nearest player inside the monster's detection range.
    fn chase_direction(&self, monster: &Monster) -> Option<f32> {
        self.players
            .values()
            .map(|p| (p.x - monster.x, (p.x - monster.x).hypot(p.y - monster.y)))
            .filter(|(_, distance)| *distance <= monster.template.detection_range)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(dx, _)| if dx < 0.0 { -1.0 } else { 1.0 })
    }

    /// Emits one to three drops, each drawn with replacement from the loot table.
    fn drop_loot(&mut self, monster: &Monster) {
        let count = self.rng.gen_range(1..=MAX_LOOT_DROPS);
        for _ in 0..count {
            let Some(template) = monster.template.loot.choose(&mut self.rng).cloned() else {
                return;
            };
            let x = monster.x + self.rng.gen_range(-DROP_SPREAD..=DROP_SPREAD);
            let y = monster.y - DROP_SPREAD;
            let velocity_x = (self.rng.gen::<f32>() - 0.5) * 3.0;
            let velocity_y = -self.rng.gen::<f32>() * 4.0;
            self.spawn_loot(&template, x, y, velocity_x, velocity_y);
        }
        debug!(
            "[{}] {} #{} died and dropped {} item(s)",
            self.name, monster.template.name, monster.id, count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpawnRule;
    use crate::entity::Player;
    use crate::geometry::{Collider, MapGeometry};
    use assert_approx_eq::assert_approx_eq;

    fn geometry() -> MapGeometry {
        MapGeometry {
            width: 800.0,
            height: 600.0,
            colliders: vec![
                Collider {
                    x: 400.0,
                    y: 516.0,
                    width: 800.0,
                    height: 32.0,
                    one_way: false,
                },
                Collider {
                    x: 216.0,
                    y: 468.0,
                    width: 32.0,
                    height: 64.0,
                    one_way: false,
                },
            ],
            spawn_points: vec![(300.0, 484.0)],
        }
    }

    fn rule(monster: &str, interval: u64, max: usize, min: usize) -> SpawnRule {
        SpawnRule {
            monster: monster.to_string(),
            spawn_interval: interval,
            max_spawned: max,
            min_spawned: min,
        }
    }

    #[test]
    fn test_min_spawned_at_creation() {
        let mut world = World::with_seed("m", &geometry(), 3);
        world.add_spawner(&rule("snail", 1000, 5, 2)).unwrap();
        assert_eq!(world.monsters.len(), 2);
        assert!(world.monsters.iter().all(|m| m.spawner == Some(0)));
        assert_eq!(world.monsters[0].y, 484.0 - ENTITY_HALF_SIZE);
    }

    #[test]
    fn test_unknown_spawn_rule_fails() {
        let mut world = World::with_seed("m", &geometry(), 3);
        assert!(world.add_spawner(&rule("dragon", 1000, 1, 1)).is_err());
    }

    #[test]
    fn test_spawner_respects_interval_and_max() {
        let mut world = World::with_seed("m", &geometry(), 3);
        world.add_spawner(&rule("snail", 100, 3, 0)).unwrap();
        assert!(world.monsters.is_empty());

        // 100ms is six ticks.
        for _ in 0..5 {
            world.step();
        }
        assert!(world.monsters.is_empty());
        world.step();
        assert_eq!(world.monsters.len(), 1);

        for _ in 0..120 {
            world.step();
        }
        assert_eq!(world.monsters.len(), 3);
    }

    #[test]
    fn test_global_cap() {
        let mut world = World::with_seed("m", &geometry(), 3);
        for _ in 0..MONSTER_CAP {
            world.spawn_monster("snail", 600.0, 484.0).unwrap();
        }
        world.add_spawner(&rule("bee", 16, 5, 0)).unwrap();
        for _ in 0..10 {
            world.step();
        }
        assert_eq!(world.monsters.len(), MONSTER_CAP);
    }

    #[test]
    fn test_fallback_spawn_position() {
        let mut bare = geometry();
        bare.spawn_points.clear();
        let mut world = World::with_seed("m", &bare, 3);
        world.add_spawner(&rule("snail", 1000, 1, 1)).unwrap();
        assert_approx_eq!(world.monsters[0].x, 160.0);
        assert_approx_eq!(world.monsters[0].y, 180.0);
    }

    #[test]
    fn test_dead_monster_drops_loot_from_its_table() {
        for seed in 0..20 {
            let mut world = World::with_seed("m", &geometry(), seed);
            world.spawn_monster("bee", 600.0, 484.0).unwrap();
            world.monsters[0].current_health = 0;
            world.step();

            assert!(world.monsters.is_empty());
            assert!((1..=MAX_LOOT_DROPS).contains(&world.loot.len()));
            let table = monster_template("bee").unwrap().loot;
            for item in &world.loot {
                assert!(table.iter().any(|t| t.name == item.name));
            }
        }
    }

    #[test]
    fn test_behavior_rolls_and_speed() {
        let mut world = World::with_seed("m", &geometry(), 11);
        world.spawn_monster("boar", 600.0, 484.0).unwrap();
        world.step();
        let monster = &world.monsters[0];
        assert!(monster.behavior_until >= world.now_ms + BEHAVIOR_MIN_MS);
        assert!(monster.behavior_until <= world.now_ms + BEHAVIOR_MAX_MS);
        assert_eq!(monster.velocity_x.abs(), behavior_speed(monster.behavior));
    }

    #[test]
    fn test_wall_reverses_direction() {
        let mut world = World::with_seed("m", &geometry(), 5);
        // Wall spans x 200..232; monster right edge touches it.
        world.spawn_monster("snail", 184.0, 484.0).unwrap();
        world.step();
        let monster = &mut world.monsters[0];
        monster.behavior = BehaviorState::Walk;
        monster.behavior_until = f64::MAX;
        monster.direction = 1.0;
        monster.x = 184.0;

        world.step();
        let monster = &world.monsters[0];
        assert_eq!(monster.x, 184.0);
        assert_eq!(monster.direction, -1.0);
        assert_eq!(monster.velocity_x, -1.0);
    }

    #[test]
    fn test_running_monster_chases_player() {
        let mut world = World::with_seed("m", &geometry(), 5);
        world.add_player(Player::new("alice", 500.0, 484.0));
        world.spawn_monster("boar", 650.0, 484.0).unwrap();
        world.step();
        let monster = &mut world.monsters[0];
        monster.behavior = BehaviorState::Run;
        monster.behavior_until = f64::MAX;
        monster.direction = 1.0;
        monster.x = 650.0;

        world.step();
        assert_eq!(world.monsters[0].direction, -1.0);
        assert!(world.monsters[0].x < 650.0);
    }

    #[test]
    fn test_monster_below_map_is_removed_without_loot() {
        let mut world = World::with_seed("m", &geometry(), 5);
        world.spawn_monster("snail", 100.0, 700.0).unwrap();
        world.step();
        assert!(world.monsters.is_empty());
        assert!(world.loot.is_empty());
    }
}
