//! Local configuration and persisted state.
//!
//! Everything specific to this machine lives in `<state dir>/state.toml`:
//!
//! ```toml
//! [sync]
//! name = "laptop"
//! path = "/home/me/.configsync/repo"
//! remote = "git@example.com:me/config.git"
//! initialized = true
//!
//! [files."/home/me/.gitconfig"]
//! local = "/home/me/.gitconfig"
//! synced = "/home/me/.configsync/repo/files/home/me/.gitconfig"
//!
//! [[pending]]
//! change = "link"
//! key = "/home/me/.gitconfig"
//! ```
//!
//! The shared side (the registry) lives inside the working directory, see
//! [`registry`].
pub mod local_map;
pub mod registry;
pub mod toml_loader;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StateError, SyncError};
pub use local_map::{LocalFileMap, LocalLink};
pub use registry::{
    Registration, RegistryChange, RegistryEntry, SharedFileRegistry, synced_path,
};

/// Environment variable overriding the state directory.
pub const HOME_ENV: &str = "CONFIGSYNC_HOME";

const STATE_FILE: &str = "state.toml";
const LOCK_FILE: &str = "lock";
const SCRATCH_DIR: &str = "scratch";

/// Name identifying this machine to its peers.
///
/// Used as the owner tag of registered files and as the prefix of commit
/// messages. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineName(String);

impl MachineName {
    /// Validate `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] if `name` is empty or contains
    /// whitespace or control characters.
    pub fn new(name: &str) -> Result<Self, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Configuration(
                "machine name must not be empty".to_string(),
            ));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SyncError::Configuration(format!(
                "machine name {name:?} must not contain whitespace"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local synchronization settings (`[sync]` in `state.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Machine name; empty until initialized.
    pub name: String,
    /// Working directory holding the clone of the remote.
    pub path: PathBuf,
    /// Remote repository URL.
    pub remote: String,
    /// Set once the working directory exists and the remote was cloned.
    pub initialized: bool,
}

impl SyncConfig {
    /// The validated machine name.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInitialized`] before initialization, or
    /// [`SyncError::Configuration`] if the stored name is invalid.
    pub fn machine(&self) -> Result<MachineName, SyncError> {
        if !self.initialized {
            return Err(SyncError::NotInitialized);
        }
        MachineName::new(&self.name)
    }
}

/// Everything persisted in `state.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalState {
    /// Synchronization settings.
    pub sync: SyncConfig,
    /// Files tracked on this machine.
    pub files: LocalFileMap,
    /// Registry edits committed here but not yet pushed, oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<RegistryChange>,
}

/// Load/save contract the engine uses for local state.
pub trait StateStore: Send + Sync {
    /// Read the persisted state, or the default state if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the state exists but cannot be read.
    fn load(&self) -> Result<LocalState, StateError>;

    /// Persist `state` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the state cannot be written.
    fn save(&self, state: &LocalState) -> Result<(), StateError>;

    /// Directory for preserved copies of interrupted unlinks.
    fn scratch_dir(&self) -> PathBuf;
}

/// File-backed [`StateStore`] rooted at a state directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Create a store rooted at `dir`; nothing is touched until first use.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$CONFIGSYNC_HOME`, else `~/.configsync`.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        std::env::var_os(HOME_ENV).map_or_else(
            || {
                std::env::var_os("HOME")
                    .or_else(|| std::env::var_os("USERPROFILE"))
                    .map_or_else(|| PathBuf::from("."), PathBuf::from)
                    .join(".configsync")
            },
            PathBuf::from,
        )
    }

    /// The state directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of `state.toml`.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Path of the lock file guarding this state directory.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }
}

impl StateStore for ConfigStore {
    fn load(&self) -> Result<LocalState, StateError> {
        toml_loader::load_or_default(&self.state_path())
    }

    fn save(&self, state: &LocalState) -> Result<(), StateError> {
        toml_loader::save(&self.state_path(), state)
    }

    fn scratch_dir(&self) -> PathBuf {
        self.dir.join(SCRATCH_DIR)
    }
}
