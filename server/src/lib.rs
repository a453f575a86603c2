//! # Platformer World Server Library
//!
//! This library provides the authoritative server for a multiplayer 2D
//! side-scroller. Every zone of the game runs as an independent world that
//! the server simulates in fixed steps; clients send inputs and render the
//! snapshots they get back.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Gravity, movement, one-way platforms, combat, monster behaviour and loot
//! are all decided here. Clients never move their own player; they queue
//! input frames that the next tick consumes.
//!
//! ### Rooms
//! A room owns one world together with its spawn rules and portals. It
//! seeds players from the account store when they join and writes their
//! durable fields back when they leave, level up or walk through a portal.
//!
//! ### Sessions
//! The network layer authenticates logins, maps UDP addresses to usernames
//! and routes each request to the room the player is in.
//!
//! ## Architecture Design
//!
//! ### One Task per Room
//! Each room runs in its own tokio task. Commands and ticks for a room are
//! handled strictly one after another, so world state needs no locks, while
//! different rooms run concurrently and share nothing.
//!
//! ### Fixed Timestep
//! The room scheduler fires at the configured rate and feeds wall-clock time
//! into an accumulator. The world always advances in whole ticks of
//! [`shared::TICK_MS`], and cooldown deadlines are measured on that tick clock.
//!
//! ### Asynchronous Persistence
//! Account writes are handed to a background thread and never block a tick.
//!
//! ## Module Organization
//!
//! - `geometry`: Tiled map loading into colliders and spawn points
//! - `collision`: bounding boxes and the one-way platform rule
//! - `physics`: gravity, axis-separated movement and stuck correction
//! - `entity`: players, monsters, loot, obstacles and portals
//! - `input`: per-player input queues
//! - `combat`: damage rolls, targeting and levelling
//! - `monster` / `loot`: spawners, behaviour and loot lifecycle
//! - `game`: the world and its tick
//! - `room`: lifecycle and persistence hooks around a world
//! - `persistence`: the JSON account store
//! - `config`: zone tables and monster/loot catalogs
//! - `client_manager` / `network`: sessions and UDP transport
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::default_zones;
//! use server::network::Server;
//! use server::persistence::JsonAccountStore;
//! use server::room::Room;
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(JsonAccountStore::open("data/players.json")?);
//!
//!     let mut rooms = Vec::new();
//!     for zone in &default_zones() {
//!         rooms.push(Room::create(zone, Path::new("maps"), store.clone())?);
//!     }
//!
//!     // 60Hz scheduler, at most 64 players
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(16),
//!         64,
//!         rooms,
//!         store.clone(),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     store.flush_blocking()?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod collision;
pub mod combat;
pub mod config;
pub mod entity;
pub mod error;
pub mod game;
pub mod geometry;
pub mod input;
pub mod loot;
pub mod monster;
pub mod network;
pub mod persistence;
pub mod physics;
pub mod room;
pub mod utils;
