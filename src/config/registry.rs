//! Shared, version-controlled registry of synchronized files.
//!
//! The registry lives at the root of the working directory as
//! `registry.toml`, one table per file:
//!
//! ```toml
//! [files."/home/me/.gitconfig"]
//! owner = "laptop"
//! links = 2
//! ```
//!
//! Two machines editing it between syncs make git report a conflict on the
//! whole file.  Each machine therefore also records its own edits as
//! [`RegistryChange`]s until they are pushed, and replays them with
//! [`SharedFileRegistry::apply`] on top of the remote version.
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::toml_loader;
use crate::error::{StateError, SyncError};

/// File name of the registry inside the working directory.
pub const REGISTRY_FILE: &str = "registry.toml";

/// Directory inside the working directory that holds synced copies.
pub const FILES_DIR: &str = "files";

/// One registered file: who introduced it and how many machines link to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Machine that registered the file first.
    pub owner: String,
    /// Number of machines currently linked. Never zero.
    pub links: NonZeroU32,
}

/// Lifecycle state of a registry key.
///
/// `Deleted` is only ever observed as the result of a final
/// [`SharedFileRegistry::remove_link`]; afterwards the key reads as
/// `Unregistered` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No entry exists.
    Unregistered,
    /// An entry exists with this many linked machines.
    Registered(NonZeroU32),
    /// The last link was just removed.
    Deleted,
}

/// A registry edit made on this machine that the remote has not accepted
/// yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum RegistryChange {
    /// This machine started linking `key` (registered or joined it).
    Link {
        /// Registry key.
        key: String,
    },
    /// This machine stopped linking `key`.
    Unlink {
        /// Registry key.
        key: String,
    },
}

impl RegistryChange {
    /// The registry key the change applies to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Link { key } | Self::Unlink { key } => key,
        }
    }
}

/// Mapping from original file path to its [`RegistryEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFileRegistry {
    #[serde(default)]
    files: BTreeMap<String, RegistryEntry>,
}

impl SharedFileRegistry {
    /// Load the registry from `workdir`, or an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(workdir: &Path) -> Result<Self, StateError> {
        toml_loader::load_or_default(&Self::path(workdir))
    }

    /// Write the registry to `workdir` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if serialization or the write fails.
    pub fn save(&self, workdir: &Path) -> Result<(), StateError> {
        toml_loader::save(&Self::path(workdir), self)
    }

    /// Location of the registry file for `workdir`.
    #[must_use]
    pub fn path(workdir: &Path) -> PathBuf {
        workdir.join(REGISTRY_FILE)
    }

    /// Insert `original` with `owner` and a count of one.
    ///
    /// Returns `false` without changing anything if the key is already
    /// registered; the first registrant keeps ownership.
    pub fn register(&mut self, original: &str, owner: &str) -> bool {
        if self.files.contains_key(original) {
            return false;
        }
        self.files.insert(
            original.to_string(),
            RegistryEntry {
                owner: owner.to_string(),
                links: NonZeroU32::MIN,
            },
        );
        true
    }

    /// Increment the link count of `original`.
    ///
    /// Returns `false` if the key is absent, in which case nothing changes.
    pub fn add_link(&mut self, original: &str) -> bool {
        match self.files.get_mut(original) {
            Some(entry) => {
                entry.links = entry.links.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Decrement the link count of `original`.
    ///
    /// Returns `true` when the count reached zero and the entry was deleted;
    /// the caller must then delete the synced file. Returns `false` when the
    /// entry survives or was never present.
    pub fn remove_link(&mut self, original: &str) -> bool {
        let Some(entry) = self.files.get_mut(original) else {
            return false;
        };
        if let Some(links) = NonZeroU32::new(entry.links.get() - 1) {
            entry.links = links;
            false
        } else {
            self.files.remove(original);
            true
        }
    }

    /// Undo a [`register`](Self::register) or [`add_link`](Self::add_link)
    /// made earlier in the same operation.
    pub(crate) fn revert_link(&mut self, original: &str, registered: bool) {
        if registered {
            self.files.remove(original);
        } else {
            self.remove_link(original);
        }
    }

    /// Undo a [`remove_link`](Self::remove_link) made earlier in the same
    /// operation, restoring `previous`.
    pub(crate) fn restore(&mut self, original: &str, previous: RegistryEntry) {
        self.files.insert(original.to_string(), previous);
    }

    /// Apply a recorded edit of `machine` to this (possibly newer) registry.
    ///
    /// A link joins an existing entry or registers the key again with
    /// `machine` as owner if the entry vanished meanwhile.  An unlink of an
    /// absent key does nothing.  Returns `true` when an unlink removed the
    /// last link; the caller must then delete the synced file.
    pub fn apply(&mut self, change: &RegistryChange, machine: &str) -> bool {
        match change {
            RegistryChange::Link { key } => {
                if !self.add_link(key) {
                    self.register(key, machine);
                }
                false
            }
            RegistryChange::Unlink { key } => self.remove_link(key),
        }
    }

    /// Whether `original` is registered.
    #[must_use]
    pub fn exists(&self, original: &str) -> bool {
        self.files.contains_key(original)
    }

    /// Entry for `original`, if registered.
    #[must_use]
    pub fn get(&self, original: &str) -> Option<&RegistryEntry> {
        self.files.get(original)
    }

    /// Current lifecycle state of `original`.
    #[must_use]
    pub fn state(&self, original: &str) -> Registration {
        self.files
            .get(original)
            .map_or(Registration::Unregistered, |e| {
                Registration::Registered(e.links)
            })
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Location of the synced copy of `key` inside `workdir`.
///
/// The absolute key is mirrored below `files/` with its root (and drive
/// prefix on Windows) stripped, so `/etc/app.conf` lands at
/// `<workdir>/files/etc/app.conf`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidPath`] if `key` is relative, names no file,
/// or contains `.`/`..` components.
pub fn synced_path(workdir: &Path, key: &str) -> Result<PathBuf, SyncError> {
    let path = Path::new(key);
    let invalid = |reason| SyncError::InvalidPath {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_absolute() {
        return Err(invalid("path must be absolute"));
    }

    let mut out = workdir.join(FILES_DIR);
    let mut pushed = false;
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                // Keep the drive letter so C:\a and D:\a stay distinct.
                let drive: String = prefix
                    .as_os_str()
                    .to_string_lossy()
                    .chars()
                    .filter(char::is_ascii_alphanumeric)
                    .collect();
                out.push(drive);
            }
            Component::RootDir => {}
            Component::Normal(part) => {
                out.push(part);
                pushed = true;
            }
            Component::CurDir | Component::ParentDir => {
                return Err(invalid("path must not contain '.' or '..'"));
            }
        }
    }
    if !pushed {
        return Err(invalid("path does not name a file"));
    }
    Ok(out)
}
