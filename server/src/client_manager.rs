//! Session tracking for connected players
//!
//! This module maps UDP peer addresses to authenticated players:
//! - Session lifecycle (join, leave, timeout)
//! - Which room each session is currently in
//! - Per-session rate limiting of explicit loot requests
//!
//! Rooms never see addresses. The network layer resolves a packet's sender
//! to a username here and forwards the request to the session's room.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Sessions without traffic for this long are dropped.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5);
/// Minimum spacing between explicit collect-loot requests.
pub const COLLECT_INTERVAL: Duration = Duration::from_millis(250);

/// An authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub addr: SocketAddr,
    pub username: String,
    /// Room the player is in, or `None` while a portal transfer is pending
    pub room: Option<String>,
    /// Last time we received any packet from this session
    pub last_seen: Instant,
    last_collect: Option<Instant>,
}

impl Session {
    pub fn new(addr: SocketAddr, username: &str, room: &str) -> Self {
        Self {
            addr,
            username: username.to_string(),
            room: Some(room.to_string()),
            last_seen: Instant::now(),
            last_collect: None,
        }
    }

    /// Checks if the session has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Owns every live session and enforces the server's capacity limit.
pub struct ClientManager {
    /// Sessions indexed by peer address
    sessions: HashMap<SocketAddr, Session>,
    /// Maximum number of concurrent sessions allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_clients,
        }
    }

    /// Attempts to add a session.
    ///
    /// Returns false if the server is at capacity. An address that already
    /// holds a session is replaced and does not count against capacity.
    pub fn add_session(&mut self, session: Session) -> bool {
        if !self.sessions.contains_key(&session.addr) && self.sessions.len() >= self.max_clients {
            return false;
        }

        info!(
            "Player {} connected from {} into {}",
            session.username,
            session.addr,
            session.room.as_deref().unwrap_or("-")
        );
        self.sessions.insert(session.addr, session);
        true
    }

    pub fn remove_session(&mut self, addr: SocketAddr) -> Option<Session> {
        let removed = self.sessions.remove(&addr);
        if let Some(session) = &removed {
            info!("Player {} disconnected ({})", session.username, addr);
        }
        removed
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&Session> {
        self.sessions.get(&addr)
    }

    /// Address of the session logged in as `username`, if any.
    pub fn addr_of(&self, username: &str) -> Option<SocketAddr> {
        self.sessions
            .values()
            .find(|session| session.username == username)
            .map(|session| session.addr)
    }

    /// Marks the session as alive. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.sessions.get_mut(&addr) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn set_room(&mut self, username: &str, room: Option<String>) {
        if let Some(session) = self
            .sessions
            .values_mut()
            .find(|session| session.username == username)
        {
            session.room = room;
        }
    }

    /// Returns true and records the attempt if enough time has passed since
    /// the session's last collect request.
    pub fn try_collect(&mut self, addr: SocketAddr, interval: Duration) -> bool {
        let Some(session) = self.sessions.get_mut(&addr) else {
            return false;
        };
        let now = Instant::now();
        if let Some(last) = session.last_collect {
            if now.duration_since(last) < interval {
                return false;
            }
        }
        session.last_collect = Some(now);
        true
    }

    /// Removes and returns sessions that have been silent longer than
    /// [`SESSION_TIMEOUT`].
    pub fn check_timeouts(&mut self) -> Vec<Session> {
        self.expire(SESSION_TIMEOUT)
    }

    fn expire(&mut self, timeout: Duration) -> Vec<Session> {
        let timed_out: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.addr)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|addr| self.remove_session(addr))
            .collect()
    }

    /// Addresses of every session currently in `room`.
    pub fn room_addrs(&self, room: &str) -> Vec<SocketAddr> {
        self.sessions
            .values()
            .filter(|session| session.room.as_deref() == Some(room))
            .map(|session| session.addr)
            .collect()
    }

    /// Every session, used at shutdown.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Returns the number of currently connected sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are currently connected
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
