//! Session persistence.
//!
//! Persists the last session id to `~/.config/rallets-cli/config.json` so
//! `ls` and `connect` can run without logging in again.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Message shown when no usable session is stored.
pub const LOGIN_REQUIRED: &str = "Please login first";

/// An opaque bearer token issued at login. Never parsed or modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// On-disk record.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    last_session_id: String,
}

/// Reads and writes the single persisted session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the per-user default location.
    pub fn default_location() -> Result<Self> {
        Self::default_path()
            .map(Self::new)
            .ok_or_else(|| Error::NotFound("Cannot determine home directory".into()))
    }

    /// Path to the session file: `~/.config/rallets-cli/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".config").join("rallets-cli").join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the session id, replacing any previous one.
    ///
    /// The record is written to a sibling temp file and renamed into place,
    /// so a failed write leaves the previous session intact.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&SessionFile {
            last_session_id: session.id.clone(),
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    /// Read the stored session.
    ///
    /// A missing, unreadable or undecodable file all mean the operator has
    /// to log in again.
    pub fn load(&self) -> Result<Session> {
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            debug!(path = %self.path.display(), error = %e, "No readable session file");
            Error::NotFound(LOGIN_REQUIRED.into())
        })?;
        let file: SessionFile = serde_json::from_str(&data).map_err(|e| {
            debug!(path = %self.path.display(), error = %e, "Session file is corrupt");
            Error::NotFound(LOGIN_REQUIRED.into())
        })?;
        Ok(Session::new(file.last_session_id))
    }
}
