//! Server network layer handling UDP communications and room routing

use crate::client_manager::{ClientManager, Session, COLLECT_INTERVAL};
use crate::error::{Result, ServerError};
use crate::persistence::{AccountRecord, AccountStore};
use crate::room::{authenticate, spawn_room, Outbound, Room, RoomCommand, RoomHandle, RoomOutput};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{InputFrame, Packet, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { session: Session },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastRoom { packet: Packet, room: String },
}

/// Routes datagrams between clients and the room tasks.
///
/// The server itself never touches a world. It owns sessions, resolves the
/// sender of every packet to a username and forwards the request to the
/// task that owns that player's room.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    store: Arc<dyn AccountStore>,
    rooms: HashMap<String, RoomHandle>,
    room_tasks: Vec<JoinHandle<()>>,
    /// Room for accounts that have never been saved anywhere
    default_room: String,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
    room_rx: mpsc::UnboundedReceiver<RoomOutput>,
}

impl Server {
    /// Binds the socket and starts one task per room. The first room is the
    /// default for new accounts.
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        rooms: Vec<Room>,
        store: Arc<dyn AccountStore>,
    ) -> Result<Self> {
        let default_room = rooms
            .first()
            .map(|room| room.name().to_string())
            .ok_or(ServerError::NoRooms)?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (room_tx, room_rx) = mpsc::unbounded_channel();

        let mut handles = HashMap::new();
        let mut room_tasks = Vec::new();
        for room in rooms {
            let (handle, task) = spawn_room(room, tick_duration, room_tx.clone());
            handles.insert(handle.name.clone(), handle);
            room_tasks.push(task);
        }

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            store,
            rooms: handles,
            room_tasks,
            default_room,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
            room_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender that can stop [`Server::run`] with [`ServerMessage::Shutdown`].
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns the network receiver task
    ///
    /// Continuously listens for incoming UDP packets, deserializes them,
    /// and forwards them to the main loop. Undecodable datagrams are logged
    /// and dropped.
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                        Ok(packet) => {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                debug!("Main loop gone, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the network sender task
    ///
    /// Serializes outgoing packets once and delivers them either to a single
    /// address or to every session currently in a room.
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, &[addr]).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastRoom { packet, room } => {
                        let addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.room_addrs(&room)
                        };
                        if addrs.is_empty() {
                            continue;
                        }
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, &addrs).await {
                            error!("Failed to broadcast to room {}: {}", room, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns the timeout checker task
    ///
    /// Once a second, removes sessions that have gone silent and tells the
    /// main loop so their rooms can persist and drop the players.
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for session in timed_out {
                    info!("Player {} timed out", session.username);
                    if server_tx
                        .send(ServerMessage::ClientTimeout { session })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(socket: &UdpSocket, packet: &Packet, addrs: &[SocketAddr]) -> Result<()> {
        let data = serialize(packet)?;
        for addr in addrs {
            if let Err(e) = socket.send_to(&data, addr).await {
                warn!("Failed to send {} bytes to {}: {}", data.len(), addr, e);
            }
        }
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_room(&self, packet: Packet, room: &str) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastRoom {
            packet,
            room: room.to_string(),
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    fn reject(&self, addr: SocketAddr, reason: String) {
        self.send_packet(Packet::Rejected { reason }, addr);
    }

    fn send_to_room(&self, room: &str, command: RoomCommand) {
        match self.rooms.get(room) {
            Some(handle) => {
                handle.send(command);
            }
            None => error!("No running room named {}", room),
        }
    }

    /// Resolves the sender of a session-bound packet. Unknown senders are
    /// logged and dropped.
    async fn route(&self, addr: SocketAddr, kind: &str) -> Option<(String, String)> {
        let clients = self.clients.read().await;
        match clients.find_by_addr(addr) {
            Some(Session {
                username,
                room: Some(room),
                ..
            }) => Some((username.clone(), room.clone())),
            Some(session) => {
                debug!("Dropping {} from {} during a room transfer", kind, session.username);
                None
            }
            None => {
                warn!("Dropping {} from unknown client {}", kind, addr);
                None
            }
        }
    }

    /// Picks the room a login lands in: the requested one, else the last
    /// saved room, else the default.
    fn choose_room(&self, record: &AccountRecord, requested: Option<&str>) -> Result<String> {
        if let Some(room) = requested {
            return if self.rooms.contains_key(room) {
                Ok(room.to_string())
            } else {
                Err(ServerError::UnknownRoom(room.to_string()))
            };
        }
        Ok(record
            .last_room
            .as_ref()
            .filter(|room| self.rooms.contains_key(room.as_str()))
            .cloned()
            .unwrap_or_else(|| self.default_room.clone()))
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        {
            let mut clients = self.clients.write().await;
            clients.touch(addr);
        }

        match packet {
            Packet::Register { username, password } => {
                match self.store.register(&username, &password) {
                    Ok(record) => self.send_packet(
                        Packet::Registered {
                            username: record.username,
                        },
                        addr,
                    ),
                    Err(e) => {
                        warn!("Registration from {} rejected: {}", addr, e);
                        self.reject(addr, e.to_string());
                    }
                }
            }

            Packet::Join {
                client_version,
                username,
                password,
                room,
            } => {
                info!("Login for {} from {} (version: {})", username, addr, client_version);
                self.handle_join(addr, client_version, &username, &password, room.as_deref())
                    .await;
            }

            Packet::Input(frame) => {
                if let Some((username, room)) = self.route(addr, "input").await {
                    // The session decides who this frame belongs to.
                    let frame = InputFrame {
                        username: username.clone(),
                        ..frame
                    };
                    self.send_to_room(&room, RoomCommand::Input { username, frame });
                }
            }

            Packet::CollectLoot => {
                if let Some((username, room)) = self.route(addr, "collectLoot").await {
                    let allowed = {
                        let mut clients = self.clients.write().await;
                        clients.try_collect(addr, COLLECT_INTERVAL)
                    };
                    if allowed {
                        self.send_to_room(&room, RoomCommand::CollectLoot { username });
                    } else {
                        debug!("collectLoot from {} rate limited", username);
                    }
                }
            }

            Packet::Chat { text } => {
                if let Some((username, room)) = self.route(addr, "chat").await {
                    self.send_to_room(&room, RoomCommand::Chat { username, text });
                }
            }

            Packet::SetName { name } => {
                if let Some((username, room)) = self.route(addr, "setName").await {
                    self.send_to_room(&room, RoomCommand::SetName { username, name });
                }
            }

            Packet::EnterPortal { portal_id } => {
                if let Some((username, room)) = self.route(addr, "enterPortal").await {
                    self.send_to_room(
                        &room,
                        RoomCommand::EnterPortal {
                            username,
                            portal_id,
                        },
                    );
                }
            }

            Packet::Leave => {
                let session = {
                    let mut clients = self.clients.write().await;
                    clients.remove_session(addr)
                };
                match session {
                    Some(Session {
                        username,
                        room: Some(room),
                        ..
                    }) => self.send_to_room(
                        &room,
                        RoomCommand::Leave {
                            username,
                            done: None,
                        },
                    ),
                    Some(_) => {}
                    None => warn!("Dropping leave from unknown client {}", addr),
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_join(
        &mut self,
        addr: SocketAddr,
        client_version: u32,
        username: &str,
        password: &str,
        requested: Option<&str>,
    ) {
        if client_version != PROTOCOL_VERSION {
            self.reject(
                addr,
                format!(
                    "Unsupported client version {} (server speaks {})",
                    client_version, PROTOCOL_VERSION
                ),
            );
            return;
        }

        let record = match authenticate(self.store.as_ref(), username, password) {
            Ok(record) => record,
            Err(e) => {
                self.reject(addr, e.to_string());
                return;
            }
        };
        if let Err(e) = self.choose_room(&record, requested) {
            self.reject(addr, e.to_string());
            return;
        }

        // Either this address or this account may still hold a session.
        let stale = {
            let mut clients = self.clients.write().await;
            let mut stale: Vec<Session> = clients.remove_session(addr).into_iter().collect();
            if let Some(other) = clients.addr_of(&record.username) {
                stale.extend(clients.remove_session(other));
            }
            stale
        };
        for session in stale {
            if session.addr != addr {
                info!(
                    "{} logged in again from {}, dropping session at {}",
                    session.username, addr, session.addr
                );
                self.reject(session.addr, "Logged in from another location".to_string());
            }
            if let Some(handle) = session.room.as_ref().and_then(|room| self.rooms.get(room)) {
                handle.leave(&session.username).await;
            }
        }

        // Reload so the join sees whatever the stale session just saved.
        let record = self.store.get(&record.username).unwrap_or(record);
        let room = match self.choose_room(&record, requested) {
            Ok(room) => room,
            Err(e) => {
                self.reject(addr, e.to_string());
                return;
            }
        };

        let admitted = {
            let mut clients = self.clients.write().await;
            clients.add_session(Session::new(addr, &record.username, &room))
        };
        if !admitted {
            warn!("Server full, rejecting {} from {}", record.username, addr);
            self.reject(addr, "Server full".to_string());
            return;
        }

        self.send_to_room(
            &room,
            RoomCommand::Join {
                record,
                arrival: None,
            },
        );
    }

    async fn handle_room_output(&mut self, output: RoomOutput) {
        match output.message {
            Outbound::Broadcast(packet) => self.broadcast_room(packet, &output.room),
            Outbound::ToPlayer { username, packet } => {
                let addr = {
                    let clients = self.clients.read().await;
                    clients.addr_of(&username)
                };
                match addr {
                    Some(addr) => self.send_packet(packet, addr),
                    None => debug!("No session for {}, dropping reply", username),
                }
            }
            Outbound::Transfer { username, room, x, y } => {
                self.transfer(&output.room, &username, &room, x, y).await;
            }
        }
    }

    /// Joins a player who left `from` through a portal to the target room.
    async fn transfer(&mut self, from: &str, username: &str, to: &str, x: f32, y: f32) {
        let Some(record) = self.store.get(username) else {
            error!("Cannot transfer {}: account not found", username);
            return;
        };

        let (target, arrival) = if self.rooms.contains_key(to) {
            (to.to_string(), Some((x, y)))
        } else {
            error!(
                "Portal in {} leads to unknown room {}; returning {}",
                from, to, username
            );
            (from.to_string(), None)
        };

        let connected = {
            let mut clients = self.clients.write().await;
            if clients.addr_of(username).is_some() {
                clients.set_room(username, Some(target.clone()));
                true
            } else {
                false
            }
        };
        if !connected {
            debug!("{} disconnected before reaching {}", username, target);
            return;
        }

        self.send_to_room(&target, RoomCommand::Join { record, arrival });
    }

    /// Stops every room, waiting for each to persist its players.
    async fn shutdown(&mut self) {
        info!("Server shutting down, saving {} rooms", self.rooms.len());
        for handle in self.rooms.values() {
            handle.shutdown().await;
        }
        for task in self.room_tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Room task failed: {}", e);
            }
        }
    }

    /// Main loop
    ///
    /// Starts the network tasks and routes client packets and room output
    /// until a [`ServerMessage::Shutdown`] arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!(
            "Server started successfully with rooms: {}",
            self.rooms.keys().cloned().collect::<Vec<_>>().join(", ")
        );

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { session }) => {
                            if let Some(room) = session.room {
                                self.send_to_room(&room, RoomCommand::Leave {
                                    username: session.username,
                                    done: None,
                                });
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => break,
                    }
                },

                output = self.room_rx.recv() => {
                    match output {
                        Some(output) => self.handle_room_output(output).await,
                        None => {
                            error!("All room tasks have stopped");
                            break;
                        }
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }
}
