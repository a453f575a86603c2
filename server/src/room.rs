//! Room lifecycle: bridges connection events to a [`World`] and writes
//! durable player fields back to the account store.
//!
//! Each room runs in its own tokio task (see [`spawn_room`]). The task owns
//! the room outright, so commands and ticks never interleave and the world
//! needs no lock.

use crate::config::ZoneConfig;
use crate::entity::{Player, Portal};
use crate::error::{Result, ServerError};
use crate::game::{World, WorldEvent};
use crate::geometry::{load_geometry, MapGeometry};
use crate::persistence::{AccountRecord, AccountStore, AccountUpdate};
use crate::utils::get_timestamp;
use log::{debug, error, info, warn};
use shared::{InputFrame, Packet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Something the room wants delivered outside of itself.
#[derive(Debug, Clone)]
pub enum Outbound {
    Broadcast(Packet),
    ToPlayer {
        username: String,
        packet: Packet,
    },
    /// The player walked through a portal and must be joined to `room`.
    Transfer {
        username: String,
        room: String,
        x: f32,
        y: f32,
    },
}

pub struct Room {
    pub world: World,
    store: Arc<dyn AccountStore>,
    outbox: Vec<Outbound>,
}

/// Rejects empty or wrong credentials; otherwise returns the stored record.
pub fn authenticate(
    store: &dyn AccountStore,
    username: &str,
    password: &str,
) -> Result<AccountRecord> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(ServerError::MissingCredentials);
    }
    store.login(username, password).ok_or_else(|| {
        warn!("Failed login for {}", username);
        ServerError::InvalidCredentials(username.to_string())
    })
}

impl Room {
    /// Loads the zone's map and builds its world. An unreadable map fails the
    /// whole room.
    pub fn create(zone: &ZoneConfig, map_dir: &Path, store: Arc<dyn AccountStore>) -> Result<Self> {
        let geometry = load_geometry(&map_dir.join(&zone.map))?;
        Self::from_world(zone, World::new(&zone.name, &geometry), store)
    }

    /// Builds a room around already parsed geometry with a fixed random seed.
    pub fn with_geometry(
        zone: &ZoneConfig,
        geometry: &MapGeometry,
        store: Arc<dyn AccountStore>,
        seed: u64,
    ) -> Result<Self> {
        Self::from_world(zone, World::with_seed(&zone.name, geometry, seed), store)
    }

    fn from_world(zone: &ZoneConfig, mut world: World, store: Arc<dyn AccountStore>) -> Result<Self> {
        for rule in &zone.monsters {
            world.add_spawner(rule)?;
        }
        for portal in &zone.portals {
            world.add_portal(Portal {
                id: portal.id.clone(),
                x: portal.x,
                y: portal.y,
                width: portal.width,
                height: portal.height,
                target_room: portal.target_room.clone(),
                target_x: portal.target_x,
                target_y: portal.target_y,
            });
        }

        info!(
            "Created room {}: {} obstacles, {} spawn points, {} portals, {} monsters",
            world.name,
            world.obstacles.len(),
            world.spawn_points.len(),
            world.portals.len(),
            world.monsters.len()
        );

        Ok(Self {
            world,
            store,
            outbox: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.world.name
    }

    /// Where a player without a usable saved position appears.
    pub fn default_spawn(&self) -> (f32, f32) {
        (self.world.width * 0.8, self.world.height * 0.3)
    }

    /// Adds a player built from `record`. `arrival` overrides the saved
    /// position for portal transfers. Returns the `Joined` reply.
    pub fn join(&mut self, record: &AccountRecord, arrival: Option<(f32, f32)>) -> Packet {
        let saved = match (&record.last_room, record.last_x, record.last_y) {
            (Some(room), Some(x), Some(y)) if room == self.name() => Some((x, y)),
            _ => None,
        };
        let (x, y) = arrival.or(saved).unwrap_or_else(|| self.default_spawn());

        let released = self.world.release_claims(&record.username);
        if released > 0 {
            debug!(
                "[{}] Released {} stale loot claim(s) held by {}",
                self.name(),
                released,
                record.username
            );
        }

        self.world.add_player(Player::from_record(record, x, y));
        self.outbox.push(Outbound::Broadcast(Packet::System {
            message: format!("Player {} has joined the game", record.username),
        }));

        Packet::Joined {
            room: self.name().to_string(),
            username: record.username.clone(),
            map_width: self.world.width,
            map_height: self.world.height,
            obstacles: self.world.obstacles.iter().map(|o| o.to_state()).collect(),
            portals: self.world.portals.iter().map(Portal::to_state).collect(),
        }
    }

    /// Persists and removes a player. Returns false when nobody by that name
    /// is in the room.
    pub fn leave(&mut self, username: &str) -> bool {
        let Some(player) = self.world.remove_player(username) else {
            return false;
        };
        self.persist(username, player.durable_update(self.name()));
        self.outbox.push(Outbound::Broadcast(Packet::System {
            message: format!("Player {} has left the game", username),
        }));
        true
    }

    pub fn enqueue_input(&mut self, username: &str, frame: InputFrame) {
        if !self.world.enqueue_input(username, frame) {
            warn!("[{}] Dropping input for unknown player {}", self.name(), username);
        }
    }

    pub fn collect_loot(&mut self, username: &str) -> bool {
        if !self.world.players.contains_key(username) {
            warn!("[{}] Dropping collectLoot from unknown player {}", self.name(), username);
            return false;
        }
        self.world.collect_loot(username)
    }

    pub fn chat(&mut self, username: &str, text: &str) {
        let Some(player) = self.world.players.get(username) else {
            warn!("[{}] Dropping chat from unknown player {}", self.name(), username);
            return;
        };
        self.outbox.push(Outbound::Broadcast(Packet::ChatMessage {
            sender: player.name.clone(),
            text: text.to_string(),
        }));
    }

    pub fn set_name(&mut self, username: &str, name: &str) {
        let Some(player) = self.world.players.get_mut(username) else {
            warn!("[{}] Dropping setName from unknown player {}", self.name(), username);
            return;
        };
        player.name = name.to_string();
        self.outbox.push(Outbound::Broadcast(Packet::PlayerNameUpdate {
            username: username.to_string(),
            name: name.to_string(),
        }));
    }

    /// Moves the player out through `portal_id` if they stand inside it.
    pub fn enter_portal(&mut self, username: &str, portal_id: &str) -> bool {
        let Some(portal) = self.world.portal_in_reach(username, portal_id).cloned() else {
            debug!(
                "[{}] {} is not inside portal {}",
                self.name(),
                username,
                portal_id
            );
            return false;
        };
        let Some(player) = self.world.remove_player(username) else {
            return false;
        };

        let update = AccountUpdate {
            last_room: Some(portal.target_room.clone()),
            last_x: Some(portal.target_x),
            last_y: Some(portal.target_y),
            ..player.stats_update()
        };
        self.persist(username, update);

        info!(
            "[{}] {} entered portal {} to {}",
            self.name(),
            username,
            portal.id,
            portal.target_room
        );
        self.outbox.push(Outbound::Broadcast(Packet::System {
            message: format!("Player {} has left the game", username),
        }));
        self.outbox.push(Outbound::Transfer {
            username: username.to_string(),
            room: portal.target_room,
            x: portal.target_x,
            y: portal.target_y,
        });
        true
    }

    /// Advances the world by `delta_ms` of wall-clock time and turns the
    /// resulting events into packets and store writes.
    pub fn update(&mut self, delta_ms: f64) -> u32 {
        let ticks = self.world.advance(delta_ms);

        for event in self.world.drain_events() {
            match event {
                WorldEvent::MonsterTookDamage {
                    monster_id,
                    damage,
                    critical,
                } => {
                    self.outbox.push(Outbound::Broadcast(Packet::MonsterTookDamage {
                        monster_id,
                        damage,
                        critical,
                    }));
                }
                WorldEvent::PlayerLevelUp {
                    username,
                    new_level,
                } => {
                    info!("[{}] {} reached level {}", self.name(), username, new_level);
                    if let Some(player) = self.world.players.get(&username) {
                        self.persist(&username, player.stats_update());
                    }
                    self.outbox.push(Outbound::Broadcast(Packet::PlayerLevelUp {
                        username,
                        new_level,
                    }));
                }
                WorldEvent::PlayerRespawned { username } => {
                    info!("[{}] {} respawned", self.name(), username);
                }
            }
        }

        ticks
    }

    pub fn snapshot(&self, timestamp: u64) -> Packet {
        self.world.snapshot(timestamp)
    }

    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Persists every player still in the room.
    pub fn dispose(&mut self) {
        let usernames: Vec<String> = self.world.players.keys().cloned().collect();
        for username in &usernames {
            self.leave(username);
        }
        info!("Room {} disposing", self.name());
    }

    fn persist(&self, username: &str, update: AccountUpdate) {
        if !self.store.update(username, update) {
            error!("[{}] Could not save {}: no such account", self.name(), username);
        }
    }
}

/// Requests handled by a running room task.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        record: AccountRecord,
        arrival: Option<(f32, f32)>,
    },
    /// `done` fires once the player's durable fields have been written.
    Leave {
        username: String,
        done: Option<oneshot::Sender<()>>,
    },
    Input {
        username: String,
        frame: InputFrame,
    },
    CollectLoot {
        username: String,
    },
    Chat {
        username: String,
        text: String,
    },
    SetName {
        username: String,
        name: String,
    },
    EnterPortal {
        username: String,
        portal_id: String,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Output of a room task, tagged with the room it came from.
#[derive(Debug, Clone)]
pub struct RoomOutput {
    pub room: String,
    pub message: Outbound,
}

/// Cheap handle for sending commands to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub name: String,
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    /// Queues a command. Returns false once the room task has stopped.
    pub fn send(&self, command: RoomCommand) -> bool {
        if self.commands.send(command).is_err() {
            error!("Room {} is no longer running", self.name);
            return false;
        }
        true
    }

    /// Removes a player and waits until their record has been saved.
    pub async fn leave(&self, username: &str) {
        let (done, wait) = oneshot::channel();
        if self.send(RoomCommand::Leave {
            username: username.to_string(),
            done: Some(done),
        }) {
            let _ = wait.await;
        }
    }

    /// Asks the room to persist its players and stop, then waits for it.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(RoomCommand::Shutdown { done }) {
            let _ = wait.await;
        }
    }
}

impl Room {
    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { record, arrival } => {
                let username = record.username.clone();
                let reply = self.join(&record, arrival);
                self.outbox.push(Outbound::ToPlayer {
                    username,
                    packet: reply,
                });
            }
            RoomCommand::Leave { username, done } => {
                self.leave(&username);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            RoomCommand::Input { username, frame } => self.enqueue_input(&username, frame),
            RoomCommand::CollectLoot { username } => {
                self.collect_loot(&username);
            }
            RoomCommand::Chat { username, text } => self.chat(&username, &text),
            RoomCommand::SetName { username, name } => self.set_name(&username, &name),
            RoomCommand::EnterPortal {
                username,
                portal_id,
            } => {
                self.enter_portal(&username, &portal_id);
            }
            // Handled by the task loop.
            RoomCommand::Shutdown { .. } => {}
        }
    }

    fn flush_outbox(&mut self, output: &mpsc::UnboundedSender<RoomOutput>) {
        for message in self.take_outbox() {
            let tagged = RoomOutput {
                room: self.name().to_string(),
                message,
            };
            if output.send(tagged).is_err() {
                debug!("[{}] Output channel closed", self.name());
                return;
            }
        }
    }
}

/// Starts the task that owns `room`. The interval drives the scheduler;
/// the world itself always steps in fixed ticks.
pub fn spawn_room(
    mut room: Room,
    tick_duration: Duration,
    output: mpsc::UnboundedSender<RoomOutput>,
) -> (RoomHandle, JoinHandle<()>) {
    let (commands, mut command_rx) = mpsc::unbounded_channel();
    let handle = RoomHandle {
        name: room.name().to_string(),
        commands,
    };

    let task = tokio::spawn(async move {
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_update = Instant::now();

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(RoomCommand::Shutdown { done }) => {
                        room.dispose();
                        room.flush_outbox(&output);
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => room.handle(command),
                    None => {
                        room.dispose();
                        break;
                    }
                },

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let delta = now.duration_since(last_update);
                    last_update = now;

                    room.update(delta.as_secs_f64() * 1000.0);
                    if !room.world.players.is_empty() {
                        let snapshot = room.snapshot(get_timestamp());
                        room.outbox.push(Outbound::Broadcast(snapshot));
                    }
                },
            }

            room.flush_outbox(&output);
        }
    });

    (handle, task)
}
