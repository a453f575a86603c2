//! World entities and their mapping to wire records.
//!
//! Entities are plain data owned by a [`World`](crate::game::World). Each one
//! converts itself into the matching `shared` record for snapshots.

use crate::config::{LootTemplate, MonsterTemplate};
use crate::geometry::Collider;
use crate::input::InputQueue;
use crate::persistence::{AccountRecord, AccountUpdate, InventoryEntry};
use shared::{
    BehaviorState, LootState, MonsterState, ObstacleState, PlayerState, PortalState,
    ENTITY_HALF_SIZE, PLAYER_SIZE,
};
use std::collections::BTreeMap;

/// Where players reappear after their health runs out.
pub const RESPAWN_POINT: (f32, f32) = (100.0, 100.0);

/// A permission consumed on use and restored later.
///
/// Timed gates reopen once the world clock reaches `reopen_at`; the jump gate
/// has no deadline and is reopened by landing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gate {
    open: bool,
    reopen_at: Option<f64>,
}

impl Gate {
    pub fn open() -> Self {
        Self {
            open: true,
            reopen_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Closes the gate for `cooldown_ms` if it is open. Returns whether it was.
    pub fn try_consume(&mut self, now_ms: f64, cooldown_ms: f64) -> bool {
        if !self.open {
            return false;
        }
        self.open = false;
        self.reopen_at = Some(now_ms + cooldown_ms);
        true
    }

    pub fn close(&mut self) {
        self.open = false;
        self.reopen_at = None;
    }

    pub fn reopen(&mut self) {
        self.open = true;
        self.reopen_at = None;
    }

    pub fn refresh(&mut self, now_ms: f64) {
        if matches!(self.reopen_at, Some(at) if now_ms >= at) {
            self.reopen();
        }
    }
}

/// Immutable axis-aligned collider, positioned by its centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub is_one_way_platform: bool,
}

impl Obstacle {
    pub fn new(x: f32, y: f32, width: f32, height: f32, is_one_way_platform: bool) -> Self {
        Self {
            x,
            y,
            width,
            height,
            is_one_way_platform,
        }
    }

    pub fn top(&self) -> f32 {
        self.y - self.height / 2.0
    }

    pub fn to_state(&self) -> ObstacleState {
        ObstacleState {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            is_one_way_platform: self.is_one_way_platform,
        }
    }
}

impl From<Collider> for Obstacle {
    fn from(c: Collider) -> Self {
        Obstacle::new(c.x, c.y, c.width, c.height, c.one_way)
    }
}

/// Rectangular trigger leading to another room. Positioned by its centre.
#[derive(Debug, Clone, PartialEq)]
pub struct Portal {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub target_room: String,
    pub target_x: f32,
    pub target_y: f32,
}

impl Portal {
    pub fn to_state(&self) -> PortalState {
        PortalState {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            target_room: self.target_room.clone(),
            target_x: self.target_x,
            target_y: self.target_y,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub username: String,
    /// Cosmetic display name, set through `setName`.
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub width: f32,
    pub height: f32,
    pub experience: u32,
    pub level: u32,
    pub strength: u32,
    pub max_health: i32,
    pub current_health: i32,
    pub can_attack: Gate,
    pub can_loot: Gate,
    pub can_jump: Gate,
    pub is_attacking: bool,
    pub is_invulnerable: bool,
    pub invulnerable_until: f64,
    pub last_processed_tick: u32,
    pub inputs: InputQueue,
    pub inventory: BTreeMap<String, u32>,
}

impl Player {
    /// Starting-stat player, mainly for worlds built without a store.
    pub fn new(username: &str, x: f32, y: f32) -> Self {
        Self::from_record(&AccountRecord::new(username, ""), x, y)
    }

    /// Rebuilds a session player from durable data.
    pub fn from_record(record: &AccountRecord, x: f32, y: f32) -> Self {
        let inventory = record
            .inventory
            .iter()
            .map(|entry| (entry.loot.clone(), entry.quantity))
            .collect();

        Self {
            username: record.username.clone(),
            name: record.username.clone(),
            x,
            y,
            velocity_x: 0.0,
            velocity_y: 0.0,
            width: PLAYER_SIZE,
            height: PLAYER_SIZE,
            experience: record.experience,
            level: record.level.max(1),
            strength: record.strength,
            max_health: record.max_health,
            current_health: record.max_health,
            can_attack: Gate::open(),
            can_loot: Gate::open(),
            can_jump: Gate::open(),
            is_attacking: false,
            is_invulnerable: false,
            invulnerable_until: 0.0,
            last_processed_tick: 0,
            inputs: InputQueue::new(),
            inventory,
        }
    }

    /// Durable fields, ready to merge into the account record.
    pub fn durable_update(&self, room: &str) -> AccountUpdate {
        AccountUpdate {
            last_room: Some(room.to_string()),
            last_x: Some(self.x),
            last_y: Some(self.y),
            ..self.stats_update()
        }
    }

    /// Stat and inventory fields without position.
    pub fn stats_update(&self) -> AccountUpdate {
        AccountUpdate {
            experience: Some(self.experience),
            level: Some(self.level),
            strength: Some(self.strength),
            max_health: Some(self.max_health),
            inventory: Some(
                self.inventory
                    .iter()
                    .map(|(loot, quantity)| InventoryEntry {
                        loot: loot.clone(),
                        quantity: *quantity,
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn respawn(&mut self) {
        self.current_health = self.max_health;
        self.x = RESPAWN_POINT.0;
        self.y = RESPAWN_POINT.1;
        self.velocity_x = 0.0;
        self.velocity_y = 0.0;
    }

    pub fn to_state(&self) -> PlayerState {
        PlayerState {
            username: self.username.clone(),
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            velocity_x: self.velocity_x,
            velocity_y: self.velocity_y,
            width: self.width,
            height: self.height,
            experience: self.experience,
            level: self.level,
            strength: self.strength,
            max_health: self.max_health,
            current_health: self.current_health,
            is_attacking: self.is_attacking,
            is_invulnerable: self.is_invulnerable,
            can_attack: self.can_attack.is_open(),
            can_loot: self.can_loot.is_open(),
            can_jump: self.can_jump.is_open(),
            inventory: self.inventory.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Monster {
    pub id: u32,
    pub template: MonsterTemplate,
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub current_health: i32,
    pub behavior: BehaviorState,
    /// World time at which a new behaviour is rolled.
    pub behavior_until: f64,
    /// +1 or -1.
    pub direction: f32,
    pub is_hit: bool,
    pub hit_until: f64,
    /// Index of the spawn rule that produced this monster, if any.
    pub spawner: Option<usize>,
}

impl Monster {
    pub fn new(id: u32, template: MonsterTemplate, x: f32, y: f32) -> Self {
        Self {
            id,
            current_health: template.max_health,
            template,
            x,
            y,
            velocity_x: 0.0,
            velocity_y: 0.0,
            behavior: BehaviorState::Idle,
            behavior_until: 0.0,
            direction: 1.0,
            is_hit: false,
            hit_until: 0.0,
            spawner: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.current_health > 0
    }

    /// True when the two collision boxes overlap.
    pub fn touches(&self, x: f32, y: f32) -> bool {
        (self.x - x).abs() < ENTITY_HALF_SIZE * 2.0 && (self.y - y).abs() < ENTITY_HALF_SIZE * 2.0
    }

    pub fn to_state(&self) -> MonsterState {
        MonsterState {
            id: self.id,
            kind: self.template.kind.to_string(),
            name: self.template.name.to_string(),
            x: self.x,
            y: self.y,
            velocity_x: self.velocity_x,
            velocity_y: self.velocity_y,
            width: self.template.width,
            height: self.template.height,
            max_health: self.template.max_health,
            current_health: self.current_health,
            behavior: self.behavior,
            is_hit: self.is_hit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Loot {
    pub id: u32,
    pub name: String,
    pub experience: u32,
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub width: f32,
    pub height: f32,
    pub spawn_time: f64,
    pub is_being_collected: bool,
    pub collected_by: Option<String>,
    /// Set when claimed; the item disappears once the world clock reaches it.
    pub remove_at: Option<f64>,
}

impl Loot {
    pub fn new(id: u32, template: &LootTemplate, x: f32, y: f32, spawn_time: f64) -> Self {
        Self {
            id,
            name: template.name.to_string(),
            experience: template.experience,
            x,
            y,
            velocity_x: 0.0,
            velocity_y: 0.0,
            width: template.width,
            height: template.height,
            spawn_time,
            is_being_collected: false,
            collected_by: None,
            remove_at: None,
        }
    }

    pub fn release_claim(&mut self) {
        self.is_being_collected = false;
        self.collected_by = None;
        self.remove_at = None;
    }

    pub fn to_state(&self) -> LootState {
        LootState {
            id: self.id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            velocity_x: self.velocity_x,
            velocity_y: self.velocity_y,
            width: self.width,
            height: self.height,
            is_being_collected: self.is_being_collected,
            collected_by: self.collected_by.clone(),
        }
    }
}
