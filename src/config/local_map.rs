//! Per-machine map from original file to its synced copy.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One tracked file on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalLink {
    /// The file on this machine that shares an inode with the synced copy.
    ///
    /// Equal to the original path for files added here; the chosen target
    /// for files linked from another machine.
    pub local: PathBuf,
    /// The synced copy inside the working directory.
    pub synced: PathBuf,
}

/// Mapping from original (registry) path to the files linked on this machine.
///
/// Every key here must also be a key of the
/// [`SharedFileRegistry`](super::registry::SharedFileRegistry); the engine
/// keeps that invariant, this type only stores entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalFileMap {
    files: BTreeMap<String, LocalLink>,
}

impl LocalFileMap {
    /// Record `original` as linked through `local` to `synced`.
    ///
    /// Does nothing if `original` is already present; existing entries are
    /// never overwritten.
    pub fn add(&mut self, original: &str, local: &Path, synced: &Path) {
        self.files
            .entry(original.to_string())
            .or_insert_with(|| LocalLink {
                local: local.to_path_buf(),
                synced: synced.to_path_buf(),
            });
    }

    /// Forget `original`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotTracked`] if `original` is absent.
    pub fn remove(&mut self, original: &str) -> Result<LocalLink, SyncError> {
        self.files
            .remove(original)
            .ok_or_else(|| SyncError::NotTracked(original.to_string()))
    }

    /// Whether `original` is tracked on this machine.
    #[must_use]
    pub fn exists(&self, original: &str) -> bool {
        self.files.contains_key(original)
    }

    /// The synced copy for `original`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotTracked`] if `original` is absent.
    pub fn get(&self, original: &str) -> Result<&Path, SyncError> {
        self.entry(original).map(|link| link.synced.as_path())
    }

    /// The full entry for `original`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotTracked`] if `original` is absent.
    pub fn entry(&self, original: &str) -> Result<&LocalLink, SyncError> {
        self.files
            .get(original)
            .ok_or_else(|| SyncError::NotTracked(original.to_string()))
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocalLink)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drop every entry, returning them.
    pub fn clear(&mut self) -> Vec<(String, LocalLink)> {
        std::mem::take(&mut self.files).into_iter().collect()
    }
}
