//! Zone tables and the static monster/loot catalog.
//!
//! A zone names its map file, the spawn rules for its monsters and the
//! portals leading out of it. The built-in table links `village`, `forest`
//! and `dungeon`; a JSON file with the same shape may replace it.

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct LootTemplate {
    pub name: &'static str,
    pub width: f32,
    pub height: f32,
    /// Experience granted on pickup. Coins grant experience, other loot does not.
    pub experience: u32,
}

pub const SMALL_COIN: LootTemplate = LootTemplate {
    name: "Small Coin",
    width: 16.0,
    height: 16.0,
    experience: 1,
};

pub const MEDIUM_COIN: LootTemplate = LootTemplate {
    name: "Medium Coin",
    width: 24.0,
    height: 24.0,
    experience: 3,
};

pub const LARGE_COIN: LootTemplate = LootTemplate {
    name: "Large Coin",
    width: 32.0,
    height: 32.0,
    experience: 5,
};

/// Relative odds of entering each behaviour state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorWeights {
    pub idle: f32,
    pub walk: f32,
    pub run: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonsterTemplate {
    pub kind: &'static str,
    pub name: &'static str,
    pub max_health: i32,
    pub damage: i32,
    pub width: f32,
    pub height: f32,
    pub detection_range: f32,
    pub experience: u32,
    pub loot: Vec<LootTemplate>,
    pub behavior: BehaviorWeights,
}

const SLOW: BehaviorWeights = BehaviorWeights {
    idle: 0.6,
    walk: 0.4,
    run: 0.0,
};

const WANDERER: BehaviorWeights = BehaviorWeights {
    idle: 0.3,
    walk: 0.5,
    run: 0.2,
};

const HUNTER: BehaviorWeights = BehaviorWeights {
    idle: 0.2,
    walk: 0.4,
    run: 0.4,
};

/// Looks up a monster by its catalog key (`snail`, `bee`, `boar`, ...).
pub fn monster_template(kind: &str) -> Option<MonsterTemplate> {
    let template = match kind {
        "snail" => MonsterTemplate {
            kind: "snail",
            name: "Snail",
            max_health: 100,
            damage: 5,
            width: 24.0,
            height: 24.0,
            detection_range: 100.0,
            experience: 10,
            loot: vec![SMALL_COIN],
            behavior: SLOW,
        },
        "bee" => MonsterTemplate {
            kind: "bee",
            name: "Bee",
            max_health: 150,
            damage: 10,
            width: 32.0,
            height: 32.0,
            detection_range: 150.0,
            experience: 20,
            loot: vec![SMALL_COIN, MEDIUM_COIN],
            behavior: WANDERER,
        },
        "boar" => MonsterTemplate {
            kind: "boar",
            name: "Boar",
            max_health: 200,
            damage: 20,
            width: 50.0,
            height: 50.0,
            detection_range: 250.0,
            experience: 40,
            loot: vec![SMALL_COIN, MEDIUM_COIN, LARGE_COIN],
            behavior: HUNTER,
        },
        "blackBoar" => MonsterTemplate {
            kind: "blackBoar",
            name: "Black Boar",
            max_health: 1000,
            damage: 100,
            width: 100.0,
            height: 100.0,
            detection_range: 300.0,
            experience: 500,
            loot: vec![LARGE_COIN; 5],
            behavior: HUNTER,
        },
        "whiteBoar" => MonsterTemplate {
            kind: "whiteBoar",
            name: "White Boar",
            max_health: 500,
            damage: 50,
            width: 50.0,
            height: 50.0,
            detection_range: 300.0,
            experience: 100,
            loot: vec![LARGE_COIN],
            behavior: HUNTER,
        },
        "blackWolf" | "whiteWolf" | "grayWolf" | "brownWolf" => {
            let (kind, name) = match kind {
                "blackWolf" => ("blackWolf", "Black Wolf"),
                "whiteWolf" => ("whiteWolf", "White Wolf"),
                "grayWolf" => ("grayWolf", "Gray Wolf"),
                _ => ("brownWolf", "Brown Wolf"),
            };
            MonsterTemplate {
                kind,
                name,
                max_health: 500,
                damage: 100,
                width: 50.0,
                height: 50.0,
                detection_range: 300.0,
                experience: 100,
                loot: vec![LARGE_COIN, MEDIUM_COIN],
                behavior: HUNTER,
            }
        }
        _ => return None,
    };
    Some(template)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRule {
    pub monster: String,
    pub spawn_interval: u64,
    pub max_spawned: usize,
    pub min_spawned: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub target_room: String,
    pub target_x: f32,
    pub target_y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    pub name: String,
    /// Map file name, resolved against the map directory.
    pub map: String,
    #[serde(default)]
    pub monsters: Vec<SpawnRule>,
    #[serde(default)]
    pub portals: Vec<PortalConfig>,
}

impl ZoneConfig {
    /// Fails on the first spawn rule naming a monster the catalog lacks.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.monsters {
            if monster_template(&rule.monster).is_none() {
                return Err(ServerError::UnknownMonster(rule.monster.clone()));
            }
        }
        Ok(())
    }
}

fn rule(monster: &str, spawn_interval: u64, max_spawned: usize, min_spawned: usize) -> SpawnRule {
    SpawnRule {
        monster: monster.to_string(),
        spawn_interval,
        max_spawned,
        min_spawned,
    }
}

fn portal(id: &str, x: f32, y: f32, target_room: &str, target_x: f32, target_y: f32) -> PortalConfig {
    PortalConfig {
        id: id.to_string(),
        x,
        y,
        width: 64.0,
        height: 64.0,
        target_room: target_room.to_string(),
        target_x,
        target_y,
    }
}

pub fn default_zones() -> Vec<ZoneConfig> {
    vec![
        ZoneConfig {
            name: "village".to_string(),
            map: "village.tmj".to_string(),
            monsters: vec![rule("snail", 1000, 6, 3), rule("bee", 2000, 4, 2)],
            portals: vec![portal("forest-portal", 500.0, 300.0, "forest", 100.0, 100.0)],
        },
        ZoneConfig {
            name: "forest".to_string(),
            map: "forest.tmj".to_string(),
            monsters: vec![
                rule("bee", 1500, 6, 3),
                rule("boar", 2000, 4, 2),
                rule("grayWolf", 4000, 2, 1),
            ],
            portals: vec![
                portal("village-portal", 100.0, 100.0, "village", 500.0, 300.0),
                portal("dungeon-portal", 800.0, 400.0, "dungeon", 150.0, 150.0),
            ],
        },
        ZoneConfig {
            name: "dungeon".to_string(),
            map: "dungeon.tmj".to_string(),
            monsters: vec![
                rule("blackWolf", 2000, 4, 2),
                rule("whiteBoar", 3000, 3, 1),
                rule("blackBoar", 10000, 1, 0),
            ],
            portals: vec![portal("forest-portal", 150.0, 150.0, "forest", 800.0, 400.0)],
        },
    ]
}

/// Reads a zone table from JSON and validates every spawn rule.
pub fn load_zones(path: &Path) -> Result<Vec<ZoneConfig>> {
    let text = std::fs::read_to_string(path)?;
    let zones: Vec<ZoneConfig> = serde_json::from_str(&text)?;
    for zone in &zones {
        zone.validate()?;
    }
    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_monsters() {
        for kind in [
            "snail", "bee", "boar", "blackBoar", "whiteBoar", "blackWolf", "whiteWolf",
            "grayWolf", "brownWolf",
        ] {
            let template = monster_template(kind).unwrap();
            assert_eq!(template.kind, kind);
            assert!(!template.loot.is_empty());
            assert!(template.max_health > 0);
        }
        assert!(monster_template("dragon").is_none());
    }

    #[test]
    fn test_coins_grant_experience() {
        assert!(SMALL_COIN.experience > 0);
        assert!(LARGE_COIN.experience > MEDIUM_COIN.experience);
    }

    #[test]
    fn test_default_zones_are_valid_and_linked() {
        let zones = default_zones();
        let names: Vec<&str> = zones.iter().map(|z| z.name.as_str()).collect();
        for zone in &zones {
            zone.validate().unwrap();
            for portal in &zone.portals {
                assert!(names.contains(&portal.target_room.as_str()));
            }
        }
    }

    #[test]
    fn test_zone_json_shape() {
        let json = r#"[{
            "name": "meadow",
            "map": "meadow.tmj",
            "monsters": [{ "monster": "snail", "spawnInterval": 500, "maxSpawned": 2, "minSpawned": 1 }],
            "portals": [{ "id": "p", "x": 1, "y": 2, "width": 3, "height": 4,
                          "targetRoom": "village", "targetX": 5, "targetY": 6 }]
        }]"#;
        let zones: Vec<ZoneConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(zones[0].monsters[0].spawn_interval, 500);
        assert_eq!(zones[0].portals[0].target_room, "village");
    }

    #[test]
    fn test_unknown_monster_fails_validation() {
        let zone = ZoneConfig {
            name: "void".to_string(),
            map: "void.tmj".to_string(),
            monsters: vec![rule("dragon", 1000, 1, 1)],
            portals: vec![],
        };
        assert!(matches!(zone.validate(), Err(ServerError::UnknownMonster(_))));
    }
}
