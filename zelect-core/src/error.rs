//! # Error Types
//!
//! Error handling for coordination-service calls and for the election built on top of them.

use crate::SessionId;
use thiserror::Error;

/// Errors reported by a coordination service.
///
/// These map one-to-one onto the failure modes of a ZooKeeper-like service.
/// The election layer never retries them itself; it wraps them in an
/// [`ElectionError`] and hands them to the caller.
///
/// # Examples
///
/// ```rust
/// use zelect_core::CoordinationError;
///
/// let error = CoordinationError::unavailable("connection refused");
/// assert!(error.is_retryable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// The service could not be reached at all
    #[error("Coordination service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// The connection dropped while a request was in flight; its outcome is unknown
    #[error("Connection lost: {message}")]
    ConnectionLoss { message: String },

    /// The session lacks the permission required on the node
    #[error("Permission denied on {path}")]
    PermissionDenied { path: String },

    /// The node (or the parent of a node being created) does not exist
    #[error("No such path: {path}")]
    NoSuchPath { path: String },

    /// A non-sequential create collided with an existing node
    #[error("Node already exists: {path}")]
    NodeExists { path: String },

    /// The session has ended and its ephemeral nodes are gone
    #[error("Session {session_id} expired")]
    SessionExpired { session_id: SessionId },

    /// The path is not a valid absolute node path
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The sequence counter of `path` has no values left
    #[error("Sequence counter of {path} exhausted")]
    SequenceOverflow { path: String },
}

impl CoordinationError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub fn connection_loss(message: impl Into<String>) -> Self {
        Self::ConnectionLoss {
            message: message.into(),
        }
    }

    pub fn no_such_path(path: impl Into<String>) -> Self {
        Self::NoSuchPath { path: path.into() }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Transient failures that a fresh session may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. } | Self::ConnectionLoss { .. } | Self::SessionExpired { .. }
        )
    }
}

/// Errors that end an election attempt.
///
/// Cancellation is not represented here: an aborted election is a normal
/// outcome and is reported through `LeadershipResult::Aborted` by the engine.
///
/// # Examples
///
/// ```rust
/// use zelect_core::{CoordinationError, ElectionError};
///
/// let error = ElectionError::watch_failed(
///     "/election",
///     CoordinationError::connection_loss("socket closed"),
/// );
/// assert!(error.is_retryable());
///
/// let violation = ElectionError::protocol_violation("duplicate order key 7");
/// assert!(!violation.is_retryable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    /// The candidate node could not be created
    #[error("Registration under {path} failed: {source}")]
    RegistrationFailed {
        path: String,
        #[source]
        source: CoordinationError,
    },

    /// Sibling changes can no longer be observed
    #[error("Watch on {path} failed: {source}")]
    WatchFailed {
        path: String,
        #[source]
        source: CoordinationError,
    },

    /// The service broke its uniqueness or liveness guarantee
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// A node name carries no usable order key
    #[error("Invalid candidate name {name:?}: {reason}")]
    InvalidCandidateName { name: String, reason: String },

    /// The election path could not be prepared
    #[error("Bootstrap of {path} failed: {source}")]
    Bootstrap {
        path: String,
        #[source]
        source: CoordinationError,
    },

    /// The supplied configuration is unusable
    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

/// Type alias for Results in the election layer.
pub type Result<T> = std::result::Result<T, ElectionError>;

impl ElectionError {
    pub fn registration_failed(path: impl Into<String>, source: CoordinationError) -> Self {
        Self::RegistrationFailed {
            path: path.into(),
            source,
        }
    }

    pub fn watch_failed(path: impl Into<String>, source: CoordinationError) -> Self {
        Self::WatchFailed {
            path: path.into(),
            source,
        }
    }

    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    pub fn invalid_candidate(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCandidateName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Determines whether restarting the election from registration may succeed.
    ///
    /// Only failures caused by a transient service condition qualify. A
    /// protocol violation means the service itself misbehaved and is never
    /// worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RegistrationFailed { source, .. }
            | Self::WatchFailed { source, .. }
            | Self::Bootstrap { source, .. } => source.is_retryable(),
            Self::ProtocolViolation { .. }
            | Self::InvalidCandidateName { .. }
            | Self::Config { .. } => false,
        }
    }
}
