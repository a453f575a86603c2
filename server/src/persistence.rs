//! Account storage
//!
//! Durable player data lives in a JSON object keyed by username. The store
//! keeps every record in memory and hands disk writes to a background thread,
//! so callers on the simulation path never wait on I/O. Writes that pile up
//! while the saver is busy are coalesced into the most recent snapshot.

use crate::error::{Result, ServerError};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

pub const STARTING_LEVEL: u32 = 1;
pub const STARTING_STRENGTH: u32 = 10;
pub const STARTING_MAX_HEALTH: i32 = 100;

fn default_level() -> u32 {
    STARTING_LEVEL
}

fn default_strength() -> u32 {
    STARTING_STRENGTH
}

fn default_max_health() -> i32 {
    STARTING_MAX_HEALTH
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub loot: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub experience: u32,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub last_room: Option<String>,
    #[serde(default)]
    pub last_x: Option<f32>,
    #[serde(default)]
    pub last_y: Option<f32>,
    #[serde(default = "default_strength")]
    pub strength: u32,
    #[serde(default = "default_max_health")]
    pub max_health: i32,
    #[serde(default)]
    pub inventory: Vec<InventoryEntry>,
}

impl AccountRecord {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            experience: 0,
            level: STARTING_LEVEL,
            last_room: None,
            last_x: None,
            last_y: None,
            strength: STARTING_STRENGTH,
            max_health: STARTING_MAX_HEALTH,
            inventory: Vec::new(),
        }
    }

    pub fn apply(&mut self, update: AccountUpdate) {
        if let Some(room) = update.last_room {
            self.last_room = Some(room);
        }
        if let Some(x) = update.last_x {
            self.last_x = Some(x);
        }
        if let Some(y) = update.last_y {
            self.last_y = Some(y);
        }
        if let Some(experience) = update.experience {
            self.experience = experience;
        }
        if let Some(level) = update.level {
            self.level = level;
        }
        if let Some(strength) = update.strength {
            self.strength = strength;
        }
        if let Some(max_health) = update.max_health {
            self.max_health = max_health;
        }
        if let Some(inventory) = update.inventory {
            self.inventory = inventory;
        }
    }
}

/// Partial record; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub last_room: Option<String>,
    pub last_x: Option<f32>,
    pub last_y: Option<f32>,
    pub experience: Option<u32>,
    pub level: Option<u32>,
    pub strength: Option<u32>,
    pub max_health: Option<i32>,
    pub inventory: Option<Vec<InventoryEntry>>,
}

/// Persistence collaborator used by rooms and the network layer.
pub trait AccountStore: Send + Sync {
    fn register(&self, username: &str, password: &str) -> Result<AccountRecord>;

    /// Returns the record when the password matches.
    fn login(&self, username: &str, password: &str) -> Option<AccountRecord>;

    fn get(&self, username: &str) -> Option<AccountRecord>;

    /// Merges `update` into an existing record. Returns false for unknown users.
    fn update(&self, username: &str, update: AccountUpdate) -> bool;

    /// Schedules a full snapshot write.
    fn flush(&self) {}
}

enum SaveJob {
    Write(BTreeMap<String, AccountRecord>),
    Shutdown,
}

/// Owns the thread that writes account snapshots to disk.
struct BackgroundSaver {
    sender: mpsc::Sender<SaveJob>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundSaver {
    fn spawn(path: PathBuf) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<SaveJob>();
        let handle = thread::Builder::new()
            .name("account-saver".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    let mut latest = match job {
                        SaveJob::Write(records) => records,
                        SaveJob::Shutdown => break,
                    };
                    let mut shutdown = false;
                    // Only the newest queued snapshot matters.
                    while let Ok(next) = receiver.try_recv() {
                        match next {
                            SaveJob::Write(records) => latest = records,
                            SaveJob::Shutdown => {
                                shutdown = true;
                                break;
                            }
                        }
                    }
                    if let Err(e) = write_snapshot(&path, &latest, "saver.tmp") {
                        error!("Failed to save accounts to {}: {}", path.display(), e);
                    } else {
                        debug!("Saved {} accounts to {}", latest.len(), path.display());
                    }
                    if shutdown {
                        break;
                    }
                }
            })?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    fn send(&self, records: BTreeMap<String, AccountRecord>) {
        if self.sender.send(SaveJob::Write(records)).is_err() {
            error!("Account saver thread has stopped; snapshot dropped");
        }
    }
}

impl Drop for BackgroundSaver {
    fn drop(&mut self) {
        let _ = self.sender.send(SaveJob::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_snapshot(
    path: &Path,
    records: &BTreeMap<String, AccountRecord>,
    tmp_extension: &str,
) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let text = serde_json::to_string_pretty(records)?;
    let tmp = path.with_extension(tmp_extension);
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// JSON-file account store. Without a path it only lives in memory.
pub struct JsonAccountStore {
    path: Option<PathBuf>,
    records: Mutex<HashMap<String, AccountRecord>>,
    saver: Option<BackgroundSaver>,
}

impl JsonAccountStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(HashMap::new()),
            saver: None,
        }
    }

    /// Loads `path` if it exists and starts the background saver for it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: HashMap<String, AccountRecord> = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            info!("No account file at {}, starting empty", path.display());
            HashMap::new()
        };
        info!("Loaded {} player accounts", records.len());

        let saver = BackgroundSaver::spawn(path.clone())?;
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
            saver: Some(saver),
        })
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, AccountRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> BTreeMap<String, AccountRecord> {
        self.records()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn schedule_save(&self) {
        if let Some(saver) = &self.saver {
            saver.send(self.snapshot());
        }
    }

    /// Writes the current snapshot on the calling thread. Meant for shutdown.
    pub fn flush_blocking(&self) -> Result<()> {
        match &self.path {
            Some(path) => {
                let records = self.snapshot();
                write_snapshot(path, &records, "flush.tmp")?;
                info!("Saved {} player accounts to {}", records.len(), path.display());
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

impl AccountStore for JsonAccountStore {
    fn register(&self, username: &str, password: &str) -> Result<AccountRecord> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ServerError::MissingCredentials);
        }

        let record = {
            let mut records = self.records();
            if records.contains_key(username) {
                return Err(ServerError::AlreadyRegistered(username.to_string()));
            }
            let record = AccountRecord::new(username, password);
            records.insert(username.to_string(), record.clone());
            record
        };

        info!("Registered account {}", username);
        self.schedule_save();
        Ok(record)
    }

    fn login(&self, username: &str, password: &str) -> Option<AccountRecord> {
        self.records()
            .get(username)
            .filter(|record| record.password == password)
            .cloned()
    }

    fn get(&self, username: &str) -> Option<AccountRecord> {
        self.records().get(username).cloned()
    }

    fn update(&self, username: &str, update: AccountUpdate) -> bool {
        let found = match self.records().get_mut(username) {
            Some(record) => {
                record.apply(update);
                true
            }
            None => false,
        };
        if found {
            self.schedule_save();
        }
        found
    }

    fn flush(&self) {
        self.schedule_save();
    }
}
