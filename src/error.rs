//! Domain-specific error types for the sync engine.
//!
//! Internal modules return typed errors ([`SyncError`], [`StateError`],
//! [`LinkError`], [`TransportError`]) while command handlers at the CLI
//! boundary convert them to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! SyncError
//! ├── precondition variants      NotInitialized, NotTracked, AlreadyLinked, ...
//! ├── Link(LinkError)            hardlink creation and unlinking
//! ├── Transport(TransportError)  clone, commit, pull, push
//! ├── State(StateError)          reading and writing state.toml / registry.toml
//! └── Incomplete { step, .. }    local change applied, sharing it failed
//! ```
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub use crate::resources::error::LinkError;
pub use crate::transport::TransportError;

/// Top-level error type for engine operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// An operation other than `init` ran before the working directory was
    /// cloned.
    #[error("configsync is not initialized; run `configsync init` first")]
    NotInitialized,

    /// Machine name, working path or remote URL is missing or invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The file to track does not exist or is not a regular file.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file to track is above the size limit.
    #[error("{} is too large ({size} bytes); files above {limit} bytes cannot be synchronized", .path.display())]
    FileTooLarge {
        /// The rejected file.
        path: PathBuf,
        /// Its size in bytes.
        size: u64,
        /// The limit in bytes.
        limit: u64,
    },

    /// The file is already tracked on this machine.
    #[error("{0} is already tracked on this machine")]
    AlreadyTracked(String),

    /// The file is not tracked on this machine.
    #[error("{0} is not tracked on this machine")]
    NotTracked(String),

    /// No machine has registered the file in the shared registry.
    #[error("{0} is not registered in the shared repository")]
    NotRegistered(String),

    /// The registered file is already linked on this machine.
    #[error("{0} is already linked on this machine")]
    AlreadyLinked(String),

    /// A path cannot be used as a registry key (not UTF-8, or escapes the
    /// working directory).
    #[error("unusable path {}: {reason}", .path.display())]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A hardlink could not be created or broken.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The version-control transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The working directory could not be (re)created.
    #[error("cannot create working directory {}: {source}", .path.display())]
    DirectoryCreation {
        /// The working directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Cloning the remote into the working directory failed.
    #[error("cannot clone {remote}: {source}")]
    Clone {
        /// The remote URL.
        remote: String,
        /// The transport failure.
        source: TransportError,
    },

    /// Local or shared state could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),

    /// Another configsync process holds the state directory.
    #[error("another configsync process is using {}", .0.display())]
    Locked(PathBuf),

    /// `init` was asked to recreate the working directory while files are
    /// still tracked.
    #[error("{0} file(s) are still tracked; remove them or run `configsync reset` first")]
    TrackedFilesRemain(usize),

    /// The operation changed local state durably but sharing it failed.
    /// Running `configsync sync` completes it.
    #[error("{operation} applied locally but {step} failed: {source}")]
    Incomplete {
        /// The operation that was running.
        operation: Operation,
        /// The step that failed.
        step: Step,
        /// Why the step failed.
        source: TransportError,
    },
}

impl SyncError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) | Self::Clone { source: e, .. } | Self::Incomplete { source: e, .. } => {
                e.is_retryable()
            }
            Self::Locked(_) => true,
            _ => false,
        }
    }
}

/// Engine operations, used to report where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Start tracking a local file.
    AddFile,
    /// Stop tracking a file on this machine.
    RemoveFile,
    /// Link a file another machine registered.
    LinkExisting,
    /// Commit, pull and push.
    Synchronize,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AddFile => "add",
            Self::RemoveFile => "remove",
            Self::LinkExisting => "link",
            Self::Synchronize => "sync",
        })
    }
}

/// Individual steps of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Create or break the hardlink.
    Link,
    /// Write state.toml and registry.toml.
    Persist,
    /// Stage changes in the working directory.
    Stage,
    /// Record a commit.
    Commit,
    /// Fetch and integrate remote changes.
    Pull,
    /// Publish commits to the remote.
    Push,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Link => "link",
            Self::Persist => "persist",
            Self::Stage => "stage",
            Self::Commit => "commit",
            Self::Pull => "pull",
            Self::Push => "push",
        })
    }
}

/// Errors reading or writing persisted state.
#[derive(Error, Debug)]
pub enum StateError {
    /// An I/O error occurred while reading or writing a state file.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// The state file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A state file contains invalid TOML or an invalid value.
    #[error("invalid state file {}: {source}", .path.display())]
    Parse {
        /// The state file.
        path: PathBuf,
        /// The parse failure.
        source: toml::de::Error,
    },

    /// State could not be serialized.
    #[error("cannot serialize {}: {source}", .path.display())]
    Serialize {
        /// The state file being written.
        path: PathBuf,
        /// The serialization failure.
        source: toml::ser::Error,
    },
}
