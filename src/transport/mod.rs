//! Version-control transport used to share the working directory.
//!
//! The engine never talks to git directly: it calls the [`Transport`] trait,
//! which [`git::GitTransport`] implements by running the `git` binary with a
//! fixed argument vector.
pub mod error;
pub mod git;

use std::path::{Path, PathBuf};

pub use error::TransportError;
pub use git::GitTransport;

/// What a pull did to the working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nothing new on the remote.
    UpToDate,
    /// Remote commits were integrated.
    Updated,
    /// The current branch tracks no remote branch yet (fresh repository).
    NoUpstream,
}

/// Clone, stage, commit, pull and push a working directory.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Clone `remote` into `path`, which must be empty or absent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the clone fails.
    fn clone_repo(&self, remote: &str, path: &Path) -> Result<(), TransportError>;

    /// Stage every change in `workdir`, including deletions.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if staging fails.
    fn stage_all(&self, workdir: &Path) -> Result<(), TransportError>;

    /// Stage the changes (including deletion) of one path in `workdir`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if staging fails.
    fn stage_path(&self, workdir: &Path, path: &Path) -> Result<(), TransportError>;

    /// Commit staged changes, returning `false` when there was nothing to
    /// commit.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the commit fails.
    fn commit(&self, workdir: &Path, message: &str) -> Result<bool, TransportError>;

    /// Integrate remote changes into `workdir`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Conflict`] if local and remote changes
    /// conflict; the working directory is left as it was before the pull.
    fn pull(&self, workdir: &Path) -> Result<PullOutcome, TransportError>;

    /// Discard local commits and changes, leaving `workdir` at the remote
    /// branch.
    ///
    /// Returns the paths, relative to `workdir`, that differed from the last
    /// commit shared with the remote before the reset.  Used after a
    /// conflicting [`pull`](Self::pull) to rebuild local changes on top of
    /// the remote.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the remote cannot be fetched or the
    /// reset fails.
    fn reset_to_remote(&self, workdir: &Path) -> Result<Vec<PathBuf>, TransportError>;

    /// Publish local commits.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Conflict`] if the remote has commits the
    /// working directory lacks.
    fn push(&self, workdir: &Path) -> Result<(), TransportError>;
}
