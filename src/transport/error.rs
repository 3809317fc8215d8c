//! Typed failures of the version-control transport.
use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`Transport`](super::Transport) calls.
///
/// The git adapter classifies failures from the command's stderr; variants
/// other than [`TransportError::Failed`] are only produced when the
/// transport can tell them apart.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The remote rejected our credentials.
    #[error("{op}: authentication failed: {message}")]
    Auth {
        /// The transport operation (e.g. `"push"`).
        op: &'static str,
        /// Transport output describing the failure.
        message: String,
    },

    /// The remote moved on (non-fast-forward) or a merge conflicted.
    #[error("{op}: conflicting remote changes: {message}")]
    Conflict {
        /// The transport operation.
        op: &'static str,
        /// Transport output describing the failure.
        message: String,
    },

    /// The remote could not be reached.
    #[error("{op}: network error: {message}")]
    Network {
        /// The transport operation.
        op: &'static str,
        /// Transport output describing the failure.
        message: String,
    },

    /// The operation did not finish before its deadline.
    #[error("{op}: timed out after {}s", .after.as_secs())]
    Timeout {
        /// The transport operation.
        op: &'static str,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// The operation failed for a reason the transport cannot classify.
    #[error("{op} failed (exit {code}): {stderr}")]
    Failed {
        /// The transport operation.
        op: &'static str,
        /// Exit code, `-1` when killed by a signal.
        code: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// The transport program could not be started at all.
    #[error("{op}: {message}")]
    Spawn {
        /// The transport operation.
        op: &'static str,
        /// Why the program could not run.
        message: String,
    },
}

impl TransportError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Network { .. } | Self::Timeout { .. }
        )
    }

    /// Whether this is a rejected update that a pull may resolve.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable() {
        let e = TransportError::Timeout {
            op: "push",
            after: Duration::from_secs(120),
        };
        assert!(e.is_retryable());
        assert_eq!(e.to_string(), "push: timed out after 120s");
    }

    #[test]
    fn conflict_and_network_are_retryable() {
        let conflict = TransportError::Conflict {
            op: "push",
            message: "non-fast-forward".to_string(),
        };
        let network = TransportError::Network {
            op: "pull",
            message: "Could not resolve host".to_string(),
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_conflict());
        assert!(network.is_retryable());
        assert!(!network.is_conflict());
    }

    #[test]
    fn auth_and_failed_are_not_retryable() {
        let auth = TransportError::Auth {
            op: "clone",
            message: "Permission denied (publickey)".to_string(),
        };
        let failed = TransportError::Failed {
            op: "commit",
            code: 128,
            stderr: "fatal: bad object".to_string(),
        };
        assert!(!auth.is_retryable());
        assert!(!failed.is_retryable());
        assert_eq!(failed.to_string(), "commit failed (exit 128): fatal: bad object");
    }
}
