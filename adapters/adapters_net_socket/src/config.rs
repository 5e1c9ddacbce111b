//! Configuration Module
//!
//! Socket configuration: network family, transport kind, backlog, receive
//! timeout and default chunk size. Configuration is frozen once a socket is
//! passively opened or connected.

use std::time::Duration;

use socket2::{Domain, Type};

use crate::error::{Result, SocketError};

/// Default pending-connection queue depth
pub const DEFAULT_BACKLOG: i32 = 5;

/// Default transfer size when an operation does not specify or imply one
pub const DEFAULT_CHUNK_SIZE: usize = 1400;

/// Largest transfer size a single operation will allocate for
pub const MAX_CHUNK_SIZE: usize = i32::MAX as usize;

/// Percentage of fault-injected sends that are silently dropped
pub const DEFAULT_DROP_RATE: u8 = 15;

/// Network family used to filter resolved candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    /// IPv4 or IPv6, whichever resolves
    #[default]
    Any,
    /// IPv4 only
    Ipv4,
    /// IPv6 only
    Ipv6,
}

impl AddressFamily {
    /// Platform address family constant used as a resolver hint
    pub fn as_raw(self) -> libc::c_int {
        match self {
            AddressFamily::Any => libc::AF_UNSPEC,
            AddressFamily::Ipv4 => libc::AF_INET,
            AddressFamily::Ipv6 => libc::AF_INET6,
        }
    }

    /// Whether an endpoint of the given domain is acceptable
    pub fn admits(self, domain: Domain) -> bool {
        match self {
            AddressFamily::Any => domain == Domain::IPV4 || domain == Domain::IPV6,
            AddressFamily::Ipv4 => domain == Domain::IPV4,
            AddressFamily::Ipv6 => domain == Domain::IPV6,
        }
    }
}

/// Transport kind
///
/// Only `Stream` is supported; `Datagram` exists so callers asking for it
/// get an explicit configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketType {
    /// Reliable, ordered, connection-oriented byte stream (TCP)
    #[default]
    Stream,
    /// Datagram transport (UDP), rejected
    Datagram,
}

impl From<SocketType> for Type {
    fn from(ty: SocketType) -> Self {
        match ty {
            SocketType::Stream => Type::STREAM,
            SocketType::Datagram => Type::DGRAM,
        }
    }
}

/// Socket configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SocketConfig {
    /// Family restriction for listen/connect candidates
    pub family: AddressFamily,
    /// Transport kind, must be `Stream`
    pub socket_type: SocketType,
    /// Pending-connection queue depth for passive sockets
    pub backlog: i32,
    /// Receive deadline, `None` when disabled
    pub timeout: Option<Duration>,
    /// Fallback transfer size
    pub chunk_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            family: AddressFamily::Any,
            socket_type: SocketType::Stream,
            backlog: DEFAULT_BACKLOG,
            timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SocketConfig {
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_socket_type(mut self, socket_type: SocketType) -> Self {
        self.socket_type = socket_type;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the receive deadline; a zero duration disables it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Check every field against its allowed range
    ///
    /// # Errors
    ///
    /// * `SocketError::InvalidConfig` - Unsupported transport, negative
    ///   backlog or zero chunk size
    pub fn validate(&self) -> Result<()> {
        validate_socket_type(self.socket_type)?;
        validate_backlog(self.backlog)?;
        validate_chunk_size(self.chunk_size)?;
        Ok(())
    }
}

pub(crate) fn validate_socket_type(socket_type: SocketType) -> Result<()> {
    match socket_type {
        SocketType::Stream => Ok(()),
        SocketType::Datagram => Err(SocketError::invalid_config(
            "socket_type",
            "only stream sockets are supported",
        )),
    }
}

pub(crate) fn validate_backlog(backlog: i32) -> Result<()> {
    if backlog < 0 {
        return Err(SocketError::invalid_config(
            "backlog",
            format!("negative backlog values ({}) not allowed", backlog),
        ));
    }
    Ok(())
}

pub(crate) fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(SocketError::invalid_config(
            "chunk_size",
            "chunk size must be positive",
        ));
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(SocketError::invalid_config(
            "chunk_size",
            format!("chunk size ({}) exceeds {}", chunk_size, MAX_CHUNK_SIZE),
        ));
    }
    Ok(())
}

/// Convert a timeout in seconds into a deadline
///
/// Zero disables the deadline. Values too large for a `Duration` saturate to
/// `Duration::MAX`. Negative values and NaN are rejected.
pub(crate) fn timeout_from_secs(secs: f64) -> Result<Option<Duration>> {
    if secs.is_nan() || secs < 0.0 {
        return Err(SocketError::invalid_config(
            "timeout",
            format!("negative timeout value ({}) provided", secs),
        ));
    }
    if secs == 0.0 {
        return Ok(None);
    }
    Ok(Some(
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
    ))
}
