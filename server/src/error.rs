//! Error type shared by the server's initialisation and request paths.
//!
//! Only startup (map loading, zone tables, socket bind) and connection
//! admission surface these to callers. The tick path logs and continues.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("username and password are required")]
    MissingCredentials,

    #[error("invalid credentials for {0}")]
    InvalidCredentials(String),

    #[error("username {0} is already registered")]
    AlreadyRegistered(String),

    #[error("unknown room {0}")]
    UnknownRoom(String),

    #[error("no rooms configured")]
    NoRooms,

    #[error("unknown monster type {0}")]
    UnknownMonster(String),

    #[error("failed to read map {path}: {source}")]
    MapRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed map {path}: {source}")]
    MapParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

impl ServerError {
    /// True for failures that should be reported to a connecting client as a
    /// rejection rather than treated as a server fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ServerError::MissingCredentials
                | ServerError::InvalidCredentials(_)
                | ServerError::AlreadyRegistered(_)
                | ServerError::UnknownRoom(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
