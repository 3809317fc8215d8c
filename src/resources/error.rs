//! Typed error variants for hardlink operations.
use std::path::PathBuf;

use thiserror::Error;

/// Errors that arise while creating or breaking hardlinks.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The file to link from does not exist.
    #[error("source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    /// The file to link from is not a regular file.
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// The file is above the trackable size limit.
    #[error("{} is {size} bytes, above the {limit} byte limit", .path.display())]
    TooLarge {
        /// File that was rejected.
        path: PathBuf,
        /// Its size in bytes.
        size: u64,
        /// The configured limit in bytes.
        limit: u64,
    },

    /// Source and target live on different filesystems, so no hardlink can
    /// join them.
    #[error(
        "cannot hardlink across devices: {} and {}",
        .source_path.display(),
        .target.display()
    )]
    CrossDevice {
        /// The file being linked.
        source_path: PathBuf,
        /// Where the link was requested.
        target: PathBuf,
    },

    /// An unlink removed the target but could not write the content back.
    /// The last content is kept at `preserved` until a retry restores it.
    #[error(
        "unlink of {} interrupted; content preserved at {}: {source}",
        .target.display(),
        .preserved.display()
    )]
    Interrupted {
        /// The path that is temporarily missing.
        target: PathBuf,
        /// Where the content is preserved.
        preserved: PathBuf,
        /// The failure that stopped the copy-back.
        source: std::io::Error,
    },

    /// Any other filesystem failure.
    #[error("{action} {}: {source}", .path.display())]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl LinkError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
