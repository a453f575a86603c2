use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Length of one fixed simulation step in milliseconds.
pub const TICK_MS: f64 = 1000.0 / 60.0;
pub const GRAVITY: f32 = 0.5;
pub const PLAYER_SPEED: f32 = 2.0;
pub const JUMP_VELOCITY: f32 = -12.0;
/// Half of the collision box used for players and monsters.
pub const ENTITY_HALF_SIZE: f32 = 16.0;
/// Half of the collision box used for loot.
pub const LOOT_HALF_SIZE: f32 = 8.0;
pub const PLAYER_SIZE: f32 = 32.0;
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Register {
        username: String,
        password: String,
    },
    Join {
        client_version: u32,
        username: String,
        password: String,
        /// Room to enter; the last saved room is used when absent.
        room: Option<String>,
    },
    Input(InputFrame),
    CollectLoot,
    Chat {
        text: String,
    },
    SetName {
        name: String,
    },
    EnterPortal {
        portal_id: String,
    },
    Leave,

    Registered {
        username: String,
    },
    Joined {
        room: String,
        username: String,
        map_width: f32,
        map_height: f32,
        obstacles: Vec<ObstacleState>,
        portals: Vec<PortalState>,
    },
    Rejected {
        reason: String,
    },
    GameState {
        tick: u32,
        timestamp: u64,
        last_processed_tick: HashMap<String, u32>,
        players: Vec<PlayerState>,
        monsters: Vec<MonsterState>,
        loot: Vec<LootState>,
    },
    ChatMessage {
        sender: String,
        text: String,
    },
    PlayerNameUpdate {
        username: String,
        name: String,
    },
    MonsterTookDamage {
        monster_id: u32,
        damage: i32,
        critical: bool,
    },
    PlayerLevelUp {
        username: String,
        new_level: u32,
    },
    System {
        message: String,
    },
}

/// One client-side input sample. Clients send one per local tick.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct InputFrame {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub jump: bool,
    pub attack: bool,
    pub loot: bool,
    pub tick: u32,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorState {
    Idle,
    Walk,
    Run,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub username: String,
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
    pub is_attacking: bool,
    pub is_invulnerable: bool,
    pub can_attack: bool,
    pub can_loot: bool,
    pub can_jump: bool,
    pub inventory: BTreeMap<String, u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonsterState {
    pub id: u32,
    pub kind: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub width: f32,
    pub height: f32,
    pub max_health: i32,
    pub current_health: i32,
    pub behavior: BehaviorState,
    pub is_hit: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LootState {
    pub id: u32,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub width: f32,
    pub height: f32,
    pub is_being_collected: bool,
    pub collected_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ObstacleState {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub is_one_way_platform: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortalState {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub target_room: String,
    pub target_x: f32,
    pub target_y: f32,
}
