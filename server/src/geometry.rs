//! Tile map loading
//!
//! Converts a Tiled JSON map into static colliders and monster spawn points.
//! Tiles are looked up through their tileset's `firstgid` range and emit a
//! collider when flagged `collision` or `oneway`, and a spawn point when
//! flagged `monster`. Every layer is scanned and overlapping layers may emit
//! duplicate colliders; resolution treats each obstacle independently so
//! duplicates are harmless.

use crate::error::{Result, ServerError};
use log::info;
use serde::Deserialize;
use std::path::Path;

/// Tiled stores flip/rotation flags in the top bits of each gid.
const GID_FLAG_MASK: u32 = 0x1FFF_FFFF;

#[derive(Debug, Clone, Deserialize)]
pub struct TiledMap {
    pub width: u32,
    pub height: u32,
    pub tilewidth: u32,
    pub tileheight: u32,
    pub layers: Vec<TiledLayer>,
    pub tilesets: Vec<TiledTileset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TiledLayer {
    /// Object layers carry no tile data.
    #[serde(default)]
    pub data: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TiledTileset {
    pub firstgid: u32,
    #[serde(default)]
    pub tiles: Vec<TiledTile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TiledTile {
    pub id: u32,
    #[serde(default)]
    pub properties: Vec<TiledProperty>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TiledProperty {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Static collider in pixel space, positioned by its centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub one_way: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapGeometry {
    pub width: f32,
    pub height: f32,
    pub colliders: Vec<Collider>,
    pub spawn_points: Vec<(f32, f32)>,
}

impl TiledMap {
    /// Returns the property list of a global tile id, or an empty slice when
    /// no tileset declares it.
    pub fn tile_properties(&self, gid: u32) -> &[TiledProperty] {
        let gid = gid & GID_FLAG_MASK;
        let tileset = self.tilesets.iter().enumerate().find(|(index, ts)| {
            let next = self.tilesets.get(index + 1);
            gid >= ts.firstgid && next.map_or(true, |n| gid < n.firstgid)
        });

        let Some((_, tileset)) = tileset else {
            return &[];
        };

        let local_id = gid - tileset.firstgid;
        tileset
            .tiles
            .iter()
            .find(|t| t.id == local_id)
            .map(|t| t.properties.as_slice())
            .unwrap_or(&[])
    }

    fn has_flag(&self, gid: u32, flag: &str) -> bool {
        self.tile_properties(gid)
            .iter()
            .any(|p| p.name == flag && p.value == serde_json::Value::Bool(true))
    }

    /// Iterates (index, gid) over every non-empty cell of every layer.
    fn cells(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.layers.iter().flat_map(|layer| {
            layer
                .data
                .iter()
                .enumerate()
                .filter(|(_, gid)| **gid != 0)
                .map(|(index, gid)| (index, *gid))
        })
    }
}

/// Extracts colliders and spawn points from a parsed map. Pure.
pub fn parse_geometry(map: &TiledMap) -> MapGeometry {
    let tile_w = map.tilewidth as f32;
    let tile_h = map.tileheight as f32;
    let columns = map.width.max(1) as usize;

    let mut geometry = MapGeometry {
        width: map.width as f32 * tile_w,
        height: map.height as f32 * tile_h,
        ..Default::default()
    };

    for (index, gid) in map.cells() {
        let column = (index % columns) as f32;
        let row = (index / columns) as f32;

        let collision = map.has_flag(gid, "collision");
        let one_way = map.has_flag(gid, "oneway");
        if collision || one_way {
            geometry.colliders.push(Collider {
                x: column * tile_w + tile_w / 2.0,
                y: row * tile_h + tile_h / 2.0,
                width: tile_w,
                height: tile_h,
                one_way,
            });
        }

        // Spawn points sit on the top edge of their tile.
        if map.has_flag(gid, "monster") {
            geometry
                .spawn_points
                .push((column * tile_w + tile_w / 2.0, row * tile_h));
        }
    }

    geometry
}

/// Reads and parses a map file. Any failure here is fatal to room creation.
pub fn load_geometry(path: &Path) -> Result<MapGeometry> {
    let text = std::fs::read_to_string(path).map_err(|source| ServerError::MapRead {
        path: path.to_path_buf(),
        source,
    })?;
    let map: TiledMap = serde_json::from_str(&text).map_err(|source| ServerError::MapParse {
        path: path.to_path_buf(),
        source,
    })?;

    let geometry = parse_geometry(&map);
    info!(
        "Loaded map {}: {}x{} px, {} colliders, {} spawn points",
        path.display(),
        geometry.width,
        geometry.height,
        geometry.colliders.len(),
        geometry.spawn_points.len()
    );
    Ok(geometry)
}
