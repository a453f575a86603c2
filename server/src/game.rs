use crate::combat::{
    award_experience, nearest_target, roll_damage, ATTACK_COOLDOWN_MS, CONTACT_DAMAGE,
    INVULNERABILITY_MS, KNOCKBACK_X, KNOCKBACK_Y,
};
use crate::config::{monster_template, SpawnRule};
use crate::entity::{Loot, Monster, Obstacle, Player, Portal};
use crate::error::{Result, ServerError};
use crate::geometry::MapGeometry;
use crate::loot::{claim_nearest, LOOT_COOLDOWN_MS};
use crate::monster::Spawner;
use crate::physics::{push_out, step_horizontal, step_vertical, VerticalContact};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{InputFrame, Packet, JUMP_VELOCITY, PLAYER_SPEED, TICK_MS};
use std::collections::{BTreeMap, HashMap};

/// Accumulated time beyond this is dropped instead of simulated.
pub const MAX_BACKLOG_MS: f64 = 250.0;
pub const HIT_FLASH_MS: f64 = 200.0;

/// Things that happened during a tick that the room turns into packets or
/// store writes.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    MonsterTookDamage {
        monster_id: u32,
        damage: i32,
        critical: bool,
    },
    PlayerLevelUp {
        username: String,
        new_level: u32,
    },
    PlayerRespawned {
        username: String,
    },
}

/// One simulated zone instance.
///
/// `now_ms` is the world clock. It only moves by whole ticks, so every
/// cooldown, invulnerability window and hit flash expires on a tick boundary.
pub struct World {
    pub name: String,
    pub tick: u32,
    pub now_ms: f64,
    pub width: f32,
    pub height: f32,
    pub obstacles: Vec<Obstacle>,
    pub portals: Vec<Portal>,
    pub spawn_points: Vec<(f32, f32)>,
    pub players: BTreeMap<String, Player>,
    pub monsters: Vec<Monster>,
    pub loot: Vec<Loot>,
    pub(crate) spawners: Vec<Spawner>,
    pub(crate) rng: StdRng,
    pub(crate) events: Vec<WorldEvent>,
    accumulated_ms: f64,
    next_entity_id: u32,
}

impl World {
    pub fn new(name: &str, geometry: &MapGeometry) -> Self {
        Self::with_rng(name, geometry, StdRng::from_entropy())
    }

    /// Same as [`World::new`] with a deterministic random source.
    pub fn with_seed(name: &str, geometry: &MapGeometry, seed: u64) -> Self {
        Self::with_rng(name, geometry, StdRng::seed_from_u64(seed))
    }

    fn with_rng(name: &str, geometry: &MapGeometry, rng: StdRng) -> Self {
        Self {
            name: name.to_string(),
            tick: 0,
            now_ms: 0.0,
            width: geometry.width,
            height: geometry.height,
            obstacles: geometry.colliders.iter().copied().map(Obstacle::from).collect(),
            portals: Vec::new(),
            spawn_points: geometry.spawn_points.clone(),
            players: BTreeMap::new(),
            monsters: Vec::new(),
            loot: Vec::new(),
            spawners: Vec::new(),
            rng,
            events: Vec::new(),
            accumulated_ms: 0.0,
            next_entity_id: 1,
        }
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.wrapping_add(1);
        id
    }

    /// Registers a spawn rule and immediately spawns its minimum population.
    pub fn add_spawner(&mut self, rule: &SpawnRule) -> Result<()> {
        let template = monster_template(&rule.monster)
            .ok_or_else(|| ServerError::UnknownMonster(rule.monster.clone()))?;

        let index = self.spawners.len();
        self.spawners.push(Spawner {
            template,
            interval_ms: rule.spawn_interval as f64,
            max_spawned: rule.max_spawned,
            next_spawn_at: self.now_ms + rule.spawn_interval as f64,
        });

        for _ in 0..rule.min_spawned.min(rule.max_spawned) {
            self.spawn_from(index);
        }
        Ok(())
    }

    pub fn add_portal(&mut self, portal: Portal) {
        self.portals.push(portal);
    }

    pub fn add_player(&mut self, player: Player) {
        info!(
            "[{}] Added player {} at ({:.1}, {:.1})",
            self.name, player.username, player.x, player.y
        );
        self.players.insert(player.username.clone(), player);
    }

    pub fn remove_player(&mut self, username: &str) -> Option<Player> {
        let removed = self.players.remove(username);
        if removed.is_some() {
            info!("[{}] Removed player {}", self.name, username);
        }
        removed
    }

    /// Clears any claim `username` still holds so the items can be picked up again.
    pub fn release_claims(&mut self, username: &str) -> usize {
        let mut released = 0;
        for item in &mut self.loot {
            if item.collected_by.as_deref() == Some(username) {
                item.release_claim();
                released += 1;
            }
        }
        released
    }

    /// Queues a frame for the next tick. Returns false for unknown players.
    pub fn enqueue_input(&mut self, username: &str, frame: InputFrame) -> bool {
        match self.players.get_mut(username) {
            Some(player) => {
                player.inputs.push(frame);
                true
            }
            None => false,
        }
    }

    /// Claims the nearest unclaimed loot for `username`. Returns whether a
    /// claim was made.
    pub fn collect_loot(&mut self, username: &str) -> bool {
        let Some(player) = self.players.get_mut(username) else {
            return false;
        };
        let Some(claim) = claim_nearest(&mut self.loot, player, self.now_ms) else {
            return false;
        };
        if let Some(new_level) = claim.level_up {
            self.events.push(WorldEvent::PlayerLevelUp {
                username: username.to_string(),
                new_level,
            });
        }
        true
    }

    pub fn portal_in_reach(&self, username: &str, portal_id: &str) -> Option<&Portal> {
        let player = self.players.get(username)?;
        self.portals.iter().find(|portal| {
            portal.id == portal_id
                && (player.x - portal.x).abs() <= portal.width / 2.0
                && (player.y - portal.y).abs() <= portal.height / 2.0
        })
    }

    /// Feeds wall-clock time into the accumulator and runs every whole tick
    /// it covers. Returns the number of ticks executed.
    pub fn advance(&mut self, delta_ms: f64) -> u32 {
        self.accumulated_ms += delta_ms.max(0.0);
        if self.accumulated_ms > MAX_BACKLOG_MS {
            warn!(
                "[{}] Tick backlog of {:.0}ms clamped to {:.0}ms",
                self.name, self.accumulated_ms, MAX_BACKLOG_MS
            );
            self.accumulated_ms = MAX_BACKLOG_MS;
        }

        let mut ticks = 0;
        while self.accumulated_ms >= TICK_MS {
            self.accumulated_ms -= TICK_MS;
            self.step();
            ticks += 1;
        }
        ticks
    }

    /// Runs exactly one fixed step.
    pub fn step(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.now_ms = self.tick as f64 * TICK_MS;

        self.refresh_timers();
        self.run_spawners();
        self.apply_contact_damage();
        self.update_players();
        self.update_monsters();
        self.update_loot();
        self.correct_stuck_players();

        if self.tick % 60 == 0 {
            debug!(
                "[{}] Tick {}: {} players, {} monsters, {} loot",
                self.name,
                self.tick,
                self.players.len(),
                self.monsters.len(),
                self.loot.len()
            );
        }
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self, timestamp: u64) -> Packet {
        Packet::GameState {
            tick: self.tick,
            timestamp,
            last_processed_tick: self
                .players
                .values()
                .map(|p| (p.username.clone(), p.last_processed_tick))
                .collect::<HashMap<_, _>>(),
            players: self.players.values().map(Player::to_state).collect(),
            monsters: self.monsters.iter().map(Monster::to_state).collect(),
            loot: self.loot.iter().map(Loot::to_state).collect(),
        }
    }

    fn refresh_timers(&mut self) {
        let now = self.now_ms;
        for player in self.players.values_mut() {
            player.can_attack.refresh(now);
            player.can_loot.refresh(now);
            if player.is_invulnerable && now >= player.invulnerable_until {
                player.is_invulnerable = false;
            }
        }
        for monster in &mut self.monsters {
            if monster.is_hit && now >= monster.hit_until {
                monster.is_hit = false;
            }
        }
    }

    fn apply_contact_damage(&mut self) {
        let now = self.now_ms;
        for player in self.players.values_mut() {
            if player.is_invulnerable || player.is_attacking {
                continue;
            }
            let Some(monster) = self
                .monsters
                .iter()
                .find(|m| m.is_alive() && m.touches(player.x, player.y))
            else {
                continue;
            };

            player.current_health -= CONTACT_DAMAGE;
            player.is_invulnerable = true;
            player.invulnerable_until = now + INVULNERABILITY_MS;

            let away = if player.x < monster.x { -1.0 } else { 1.0 };
            player.velocity_x = away * KNOCKBACK_X;
            player.velocity_y = KNOCKBACK_Y;
            player.x += player.velocity_x;
            player.y += player.velocity_y;

            if player.current_health <= 0 {
                player.respawn();
                self.events.push(WorldEvent::PlayerRespawned {
                    username: player.username.clone(),
                });
            }
        }
    }

    fn update_players(&mut self) {
        let mut players = std::mem::take(&mut self.players);

        for player in players.values_mut() {
            let frames: Vec<InputFrame> = player.inputs.drain().collect();
            for frame in &frames {
                self.apply_input(player, frame);
            }

            match step_vertical(player, &self.obstacles) {
                VerticalContact::Landed => player.can_jump.reopen(),
                VerticalContact::Airborne | VerticalContact::Blocked => player.can_jump.close(),
            }

            if player.y > self.height {
                info!("[{}] {} fell out of the world", self.name, player.username);
                player.respawn();
                self.events.push(WorldEvent::PlayerRespawned {
                    username: player.username.clone(),
                });
            }
        }

        self.players = players;
    }

    fn apply_input(&mut self, player: &mut Player, frame: &InputFrame) {
        player.last_processed_tick = player.last_processed_tick.max(frame.tick);
        player.is_attacking = frame.attack;

        if frame.attack && player.can_attack.try_consume(self.now_ms, ATTACK_COOLDOWN_MS) {
            self.attack(player);
        }

        if frame.loot && player.can_loot.try_consume(self.now_ms, LOOT_COOLDOWN_MS) {
            if let Some(claim) = claim_nearest(&mut self.loot, player, self.now_ms) {
                if let Some(new_level) = claim.level_up {
                    self.events.push(WorldEvent::PlayerLevelUp {
                        username: player.username.clone(),
                        new_level,
                    });
                }
            }
        }

        if player.is_attacking {
            return;
        }

        let dx = if frame.left {
            -PLAYER_SPEED
        } else if frame.right {
            PLAYER_SPEED
        } else {
            0.0
        };
        player.velocity_x = if dx != 0.0 && !step_horizontal(player, dx, &self.obstacles) {
            dx
        } else {
            0.0
        };

        if frame.jump && player.can_jump.is_open() {
            player.velocity_y = JUMP_VELOCITY;
            player.can_jump.close();
        }
    }

    fn attack(&mut self, player: &mut Player) {
        let Some(index) = nearest_target(&self.monsters, player.x, player.y) else {
            return;
        };
        let hit = roll_damage(player.strength, &mut self.rng);

        let monster = &mut self.monsters[index];
        monster.current_health -= hit.damage;
        monster.is_hit = true;
        monster.hit_until = self.now_ms + HIT_FLASH_MS;
        self.events.push(WorldEvent::MonsterTookDamage {
            monster_id: monster.id,
            damage: hit.damage,
            critical: hit.critical,
        });

        if monster.is_alive() {
            return;
        }
        let reward = monster.template.experience;
        debug!(
            "[{}] {} defeated {} #{}",
            self.name, player.username, monster.template.name, monster.id
        );
        if let Some(new_level) = award_experience(player, reward) {
            self.events.push(WorldEvent::PlayerLevelUp {
                username: player.username.clone(),
                new_level,
            });
        }
    }

    fn correct_stuck_players(&mut self) {
        for player in self.players.values_mut() {
            if push_out(player, &self.obstacles) {
                debug!("[{}] Pushed {} out of geometry", self.name, player.username);
            }
        }
    }
}
