//! Error Module
//!
//! Error taxonomy shared by every socket operation.

use std::io;

use entities_net_address::AddressError;
use thiserror::Error;

/// Socket error types
///
/// Graceful peer close is not an error: it is reported as a zero-length
/// receive and a transition to the closed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// Bad enum value or out-of-range scalar
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Operation incompatible with the socket's lifecycle phase
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// Resolution or raw transport failure
    #[error("{0}")]
    Resource(String),
    /// Receive deadline elapsed with no data ready
    ///
    /// `received` counts bytes a completion loop had already accumulated.
    #[error("timed out waiting for data ({received} bytes received)")]
    Timeout { received: usize },
    /// Malformed endpoint address
    #[error(transparent)]
    Format(#[from] AddressError),
}

impl SocketError {
    /// Build a resource error from an OS error, prefixed with the operation
    pub(crate) fn resource(op: &str, err: io::Error) -> Self {
        SocketError::Resource(format!("{}: {}", op, err))
    }

    pub(crate) fn illegal_state(op: &str, reason: &str) -> Self {
        SocketError::IllegalState(format!("{}: {}", op, reason))
    }

    pub(crate) fn invalid_config(op: &str, reason: impl AsRef<str>) -> Self {
        SocketError::InvalidConfig(format!("{}: {}", op, reason.as_ref()))
    }

    /// Whether this is a receive deadline rather than a hard failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, SocketError::Timeout { .. })
    }

    /// Bytes accumulated before a timeout, zero for every other kind
    pub fn received(&self) -> usize {
        match self {
            SocketError::Timeout { received } => *received,
            _ => 0,
        }
    }

    /// Re-annotate a timeout with the bytes a completion loop had gathered
    pub(crate) fn with_received(self, received: usize) -> Self {
        match self {
            SocketError::Timeout { .. } => SocketError::Timeout { received },
            other => other,
        }
    }
}

/// Result type for socket operations
pub type Result<T> = std::result::Result<T, SocketError>;
