//! Cross-process exclusion on the local state directory.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{StateError, SyncError};

/// An exclusive advisory lock on a state directory.
///
/// Held for the lifetime of a command so two configsync processes never
/// mutate the same local map and working directory at once.  The lock is
/// released when the value is dropped, or by the OS if the process dies.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Take the lock at `path`, failing immediately if another process holds
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Locked`] if the lock is held elsewhere, or
    /// [`SyncError::State`] if the lock file cannot be opened.
    pub fn acquire(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| StateError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| SyncError::Locked(path.to_path_buf()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        FileExt::unlock(&self.file).ok();
    }
}
