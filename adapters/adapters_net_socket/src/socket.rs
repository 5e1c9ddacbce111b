//! Socket Module
//!
//! Provides the connection-oriented stream socket. A [`Socket`] owns at most
//! one descriptor and moves through a small lifecycle:
//!
//! - **Unopened**: no descriptor, configuration may change
//! - **Passive**: bound and listening, produces connected sockets via `accept`
//! - **Connected**: established byte stream with one peer
//!
//! Closing (explicitly, on drop, or when a receive observes end-of-stream)
//! releases the descriptor and returns the socket to the unopened state.

use std::fmt;
use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use entities_net_address::Address;
use socket2::{Domain, Protocol, SockAddr, Socket as Socket2};
use tracing::{debug, trace, warn};

use crate::config::{
    timeout_from_secs, validate_backlog, validate_chunk_size, validate_socket_type,
    AddressFamily, SocketConfig, SocketType, MAX_CHUNK_SIZE,
};
use crate::error::{Result, SocketError};
use crate::fault::PacketDropper;
use crate::readiness::wait_readable;
use crate::resolver::{Resolve, SystemResolver};

/// Sentinel appended to text sent with [`Socket::send_text`]
pub const TEXT_TERMINATOR: u8 = 0;

/// Stream socket
///
/// Passive and connected are never both true. Configuration other than the
/// timeout and chunk size is frozen while the socket is open. Copies of an
/// open socket are refused; see [`Socket::try_clone`].
pub struct Socket {
    inner: Option<Socket2>,
    config: SocketConfig,
    passive: bool,
    connected: bool,
    dropper: PacketDropper,
    resolver: Arc<dyn Resolve>,
}

impl Socket {
    /// Create an unopened socket
    ///
    /// # Arguments
    ///
    /// * `family` - Family restriction for listen/connect candidates
    /// * `socket_type` - Transport kind, must be `Stream`
    ///
    /// # Returns
    ///
    /// * `Ok(Socket)` - Unopened socket with default backlog, no timeout and
    ///   the default chunk size
    /// * `Err(SocketError::InvalidConfig)` - Unsupported transport kind
    pub fn new(family: AddressFamily, socket_type: SocketType) -> Result<Self> {
        Self::with_config(
            SocketConfig::default()
                .with_family(family)
                .with_socket_type(socket_type),
        )
    }

    /// Create an unopened socket from a full configuration
    pub fn with_config(config: SocketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: None,
            config,
            passive: false,
            connected: false,
            dropper: PacketDropper::new(),
            resolver: Arc::new(SystemResolver),
        })
    }

    /// Replace the resolver used by `listen` and `connect`
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Copy an unopened socket
    ///
    /// Only configuration is copied; the copy never holds a descriptor and
    /// gets its own fault-injection generator.
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - This socket is passive or connected
    pub fn try_clone(&self) -> Result<Socket> {
        if self.is_open() {
            return Err(SocketError::illegal_state(
                "try_clone",
                "unable to copy an open socket",
            ));
        }
        Ok(Socket {
            inner: None,
            config: self.config.clone(),
            passive: false,
            connected: false,
            dropper: PacketDropper::new(),
            resolver: Arc::clone(&self.resolver),
        })
    }

    /// Copy configuration from another unopened socket into this one
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - Either socket is passive or connected
    pub fn clone_config_from(&mut self, other: &Socket) -> Result<()> {
        if self.is_open() || other.is_open() {
            return Err(SocketError::illegal_state(
                "clone_config_from",
                "unable to assign to/from an open socket",
            ));
        }
        self.config = other.config.clone();
        self.resolver = Arc::clone(&other.resolver);
        Ok(())
    }

    /// Move everything out of this socket, leaving it default and closed
    pub fn take(&mut self) -> Socket {
        std::mem::take(self)
    }

    // Getters and setters

    /// Raw descriptor, `None` when no descriptor is held
    pub fn descriptor(&self) -> Option<RawFd> {
        self.inner.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn family(&self) -> AddressFamily {
        self.config.family
    }

    /// Set the family restriction
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - Socket is passive or connected
    pub fn set_family(&mut self, family: AddressFamily) -> Result<()> {
        self.ensure_unopened("set_family")?;
        self.config.family = family;
        Ok(())
    }

    pub fn socket_type(&self) -> SocketType {
        self.config.socket_type
    }

    /// Set the transport kind
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - Socket is passive or connected
    /// * `SocketError::InvalidConfig` - Anything other than `Stream`
    pub fn set_socket_type(&mut self, socket_type: SocketType) -> Result<()> {
        self.ensure_unopened("set_socket_type")?;
        validate_socket_type(socket_type)?;
        self.config.socket_type = socket_type;
        Ok(())
    }

    pub fn backlog(&self) -> i32 {
        self.config.backlog
    }

    /// Set the pending-connection backlog used by the next `listen`
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - Socket is passive or connected
    /// * `SocketError::InvalidConfig` - Negative backlog
    pub fn set_backlog(&mut self, backlog: i32) -> Result<()> {
        self.ensure_unopened("set_backlog")?;
        validate_backlog(backlog)?;
        self.config.backlog = backlog;
        Ok(())
    }

    /// Receive timeout in seconds, 0 when disabled
    pub fn timeout(&self) -> f64 {
        self.config.timeout.map_or(0.0, |t| t.as_secs_f64())
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.config.timeout
    }

    pub fn timeout_is_set(&self) -> bool {
        self.config.timeout.is_some()
    }

    /// Set the receive timeout in seconds
    ///
    /// Zero disables the timeout like [`Socket::clear_timeout`]. Values too
    /// large for a `Duration` wait for `Duration::MAX`. Allowed in any
    /// lifecycle state.
    ///
    /// # Errors
    ///
    /// * `SocketError::InvalidConfig` - Negative value or NaN
    pub fn set_timeout(&mut self, secs: f64) -> Result<()> {
        self.config.timeout = timeout_from_secs(secs)?;
        Ok(())
    }

    pub fn clear_timeout(&mut self) {
        self.config.timeout = None;
    }

    pub fn default_chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Set the fallback transfer size; allowed in any lifecycle state
    ///
    /// # Errors
    ///
    /// * `SocketError::InvalidConfig` - Zero, or above `MAX_CHUNK_SIZE`
    pub fn set_default_chunk_size(&mut self, chunk_size: usize) -> Result<()> {
        validate_chunk_size(chunk_size)?;
        self.config.chunk_size = chunk_size;
        Ok(())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Percentage of `packet_error_send` calls that are dropped
    pub fn packet_drop_rate(&self) -> u8 {
        self.dropper.drop_rate()
    }

    /// Reseed the private fault-injection generator
    pub fn seed_packet_errors(&mut self, seed: u64) {
        self.dropper.reseed(seed);
    }

    pub fn is_passively_opened(&self) -> bool {
        self.passive
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // Connection management

    /// Bind and listen on the first usable candidate for `host`/`service`
    ///
    /// An empty `host` listens on every interface.
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - A descriptor is already held
    /// * `SocketError::Resource` - Resolution failed, no candidate could be
    ///   bound (carries the last failure), or listen failed
    pub fn listen(&mut self, host: &str, service: &str) -> Result<()> {
        const OP: &str = "listen";
        if self.inner.is_some() {
            return Err(SocketError::illegal_state(OP, "listen called on an open socket"));
        }

        let candidates = self.candidates(OP, host, service, true)?;
        let (socket, addr) = self.first_candidate(OP, &candidates, |socket, addr| {
            socket.bind(&SockAddr::from(*addr))
        })?;

        if let Err(e) = socket.listen(self.config.backlog) {
            warn!(%addr, error = %e, "listen failed");
            return Err(SocketError::resource(OP, e));
        }

        debug!(%addr, backlog = self.config.backlog, "socket listening");
        self.inner = Some(socket);
        self.passive = true;
        Ok(())
    }

    /// Listen on every interface for `service`
    pub fn listen_service(&mut self, service: &str) -> Result<()> {
        self.listen("", service)
    }

    /// Listen on every interface at `port`
    pub fn listen_port(&mut self, port: u16) -> Result<()> {
        self.listen("", &port.to_string())
    }

    /// Connect to the first reachable candidate for `host`/`service`
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - Socket is passive or already connected
    /// * `SocketError::Resource` - Resolution failed or every candidate
    ///   refused (carries the last failure)
    pub fn connect(&mut self, host: &str, service: &str) -> Result<()> {
        const OP: &str = "connect";
        if self.passive {
            return Err(SocketError::illegal_state(
                OP,
                "unable to connect using a passively opened socket",
            ));
        }
        if self.inner.is_some() {
            return Err(SocketError::illegal_state(OP, "connect called on an open socket"));
        }

        let candidates = self.candidates(OP, host, service, false)?;
        let (socket, addr) = self.first_candidate(OP, &candidates, |socket, addr| {
            socket.connect(&SockAddr::from(*addr))
        })?;

        debug!(peer = %addr, "socket connected");
        self.inner = Some(socket);
        self.connected = true;
        Ok(())
    }

    /// Connect to `host` at `port`
    pub fn connect_port(&mut self, host: &str, port: u16) -> Result<()> {
        self.connect(host, &port.to_string())
    }

    /// Accept a pending connection
    ///
    /// Blocks until a peer connects. The returned socket is connected and
    /// inherits this socket's family and transport kind; this socket stays
    /// passive. No timeout applies.
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - Socket is not passively opened
    /// * `SocketError::Resource` - The accept call failed
    pub fn accept(&self) -> Result<Socket> {
        const OP: &str = "accept";
        let listener = match (&self.inner, self.passive) {
            (Some(listener), true) => listener,
            _ => {
                return Err(SocketError::illegal_state(
                    OP,
                    "accept requires a passively opened socket",
                ))
            }
        };

        let (socket, peer) = listener.accept().map_err(|e| SocketError::resource(OP, e))?;
        debug!(peer = ?peer.as_socket(), "accepted connection");

        let mut accepted = Socket::with_config(
            SocketConfig::default()
                .with_family(self.config.family)
                .with_socket_type(self.config.socket_type),
        )?;
        accepted.resolver = Arc::clone(&self.resolver);
        accepted.inner = Some(socket);
        accepted.connected = true;
        Ok(accepted)
    }

    /// Release the descriptor, if any
    ///
    /// Idempotent. Configuration is left untouched.
    pub fn close(&mut self) {
        if let Some(socket) = self.inner.take() {
            debug!(fd = socket.as_raw_fd(), "closing socket");
        }
        self.passive = false;
        self.connected = false;
    }

    /// Local endpoint of a passive or connected socket
    pub fn local_address(&self) -> Result<Address> {
        const OP: &str = "local_address";
        let socket = match (&self.inner, self.passive || self.connected) {
            (Some(socket), true) => socket,
            _ => {
                return Err(SocketError::illegal_state(
                    OP,
                    "socket is neither connected nor passively opened",
                ))
            }
        };
        let addr = socket.local_addr().map_err(|e| SocketError::resource(OP, e))?;
        Ok(Address::from_sock_addr(&addr)?)
    }

    /// Peer endpoint of a connected socket
    pub fn remote_address(&self) -> Result<Address> {
        const OP: &str = "remote_address";
        let socket = self.connected_inner(OP)?;
        let addr = socket.peer_addr().map_err(|e| SocketError::resource(OP, e))?;
        Ok(Address::from_sock_addr(&addr)?)
    }

    // Sending

    /// Single send attempt
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Bytes accepted by the transport, possibly fewer than
    ///   `data.len()`
    /// * `Err(SocketError::IllegalState)` - Socket is not connected
    /// * `Err(SocketError::Resource)` - The send failed
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        const OP: &str = "send";
        let socket = self.connected_inner(OP)?;
        socket.send(data).map_err(|e| SocketError::resource(OP, e))
    }

    /// Single send attempt of at most `size` bytes
    ///
    /// An unspecified or zero size, or one larger than `data`, sends the
    /// whole buffer.
    pub fn send_sized(&self, data: &[u8], size: Option<usize>) -> Result<usize> {
        self.send(clip(data, size))
    }

    /// Send every byte of `data`
    ///
    /// Any failed attempt is returned immediately without retry.
    pub fn send_all(&self, data: &[u8]) -> Result<usize> {
        const OP: &str = "send_all";
        self.connected_inner(OP)?;

        let mut sent = 0;
        while sent < data.len() {
            let n = self.send(&data[sent..])?;
            if n == 0 {
                return Err(SocketError::Resource(format!(
                    "{}: transport accepted no data after {} bytes",
                    OP, sent
                )));
            }
            sent += n;
        }
        Ok(sent)
    }

    /// Send `text` followed by the terminator byte
    ///
    /// The terminator is sent even for empty text. Returns the bytes sent,
    /// terminator included.
    pub fn send_text(&self, text: &str) -> Result<usize> {
        let mut framed = Vec::with_capacity(text.len() + 1);
        framed.extend_from_slice(text.as_bytes());
        framed.push(TEXT_TERMINATOR);
        self.send_all(&framed)
    }

    /// Send with simulated packet loss
    ///
    /// With the socket's drop rate the data is silently discarded and its full
    /// length reported as sent; otherwise this is a plain [`Socket::send`].
    ///
    /// # Errors
    ///
    /// * `SocketError::IllegalState` - Socket is not connected, checked even
    ///   when the packet is dropped
    pub fn packet_error_send(&mut self, data: &[u8]) -> Result<usize> {
        const OP: &str = "packet_error_send";
        self.connected_inner(OP)?;

        if self.dropper.should_drop() {
            trace!(len = data.len(), "dropping packet");
            return Ok(data.len());
        }
        self.send(data)
    }

    /// [`Socket::packet_error_send`] of at most `size` bytes
    pub fn packet_error_send_sized(&mut self, data: &[u8], size: Option<usize>) -> Result<usize> {
        self.packet_error_send(clip(data, size))
    }

    // Receiving

    /// Single receive attempt of at most `buf.len()` bytes
    ///
    /// With a timeout configured, waits for readiness first. A zero-length
    /// result means the peer closed the stream; the socket is closed before
    /// returning.
    ///
    /// # Returns
    ///
    /// * `Ok(0)` - Empty buffer (no wait) or graceful peer close
    /// * `Ok(usize)` - Bytes received
    /// * `Err(SocketError::Timeout)` - No data before the deadline
    /// * `Err(SocketError::IllegalState)` - Socket is not connected
    /// * `Err(SocketError::Resource)` - The receive failed
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        const OP: &str = "recv";
        let socket = self.connected_inner(OP)?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.wait_for_data(socket, OP)?;

        let n = read_retrying(socket, buf).map_err(|e| SocketError::resource(OP, e))?;
        if n == 0 {
            debug!("peer closed connection");
            self.close();
        }
        Ok(n)
    }

    /// Single receive into a vector, resized to the bytes received
    ///
    /// The attempt size is `size` when non-zero, otherwise the vector's
    /// current length when non-empty, otherwise the default chunk size.
    pub fn recv_into(&mut self, buf: &mut Vec<u8>, size: Option<usize>) -> Result<usize> {
        self.connected_inner("recv")?;
        let want = self.resolve_size(size, buf.len());
        buf.resize(want, 0);
        match self.recv(buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(n)
            }
            Err(e) => {
                buf.clear();
                Err(e)
            }
        }
    }

    /// Single receive into a text buffer
    ///
    /// Size resolution follows [`Socket::recv_into`] using the string's byte
    /// length. Invalid UTF-8 is replaced.
    pub fn recv_string(&mut self, text: &mut String, size: Option<usize>) -> Result<usize> {
        let mut buf = Vec::new();
        let want = self.resolve_size(size, text.len());
        let n = self.recv_into(&mut buf, Some(want))?;
        *text = String::from_utf8_lossy(&buf).into_owned();
        Ok(n)
    }

    /// Receive until `buf` is full or the peer closes
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - `buf.len()`, or fewer when the peer closed first
    /// * `Err(SocketError::Timeout)` - Deadline hit; `received` holds the
    ///   bytes already stored in `buf`
    pub fn recv_all(&mut self, buf: &mut [u8]) -> Result<usize> {
        const OP: &str = "recv_all";
        self.connected_inner(OP)?;

        let mut received = 0;
        while received < buf.len() {
            match self.recv(&mut buf[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(e) => return Err(e.with_received(received)),
            }
        }
        Ok(received)
    }

    /// Exact-size receive into a vector, resized to the bytes received
    ///
    /// Size resolution follows [`Socket::recv_into`]. On timeout the vector
    /// keeps the bytes received before the deadline.
    pub fn recv_all_into(&mut self, buf: &mut Vec<u8>, size: Option<usize>) -> Result<usize> {
        self.connected_inner("recv_all")?;
        let want = self.resolve_size(size, buf.len());
        buf.resize(want, 0);
        match self.recv_all(buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(n)
            }
            Err(e) => {
                buf.truncate(e.received());
                Err(e)
            }
        }
    }

    /// Exact-size receive into a text buffer
    pub fn recv_all_string(&mut self, text: &mut String, size: Option<usize>) -> Result<usize> {
        self.connected_inner("recv_all")?;
        let mut buf = Vec::new();
        let want = self.resolve_size(size, text.len());
        let result = self.recv_all_into(&mut buf, Some(want));
        *text = String::from_utf8_lossy(&buf).into_owned();
        result
    }

    /// Receive one terminator-framed text message
    ///
    /// Reads until the terminator byte, at most the default chunk size bytes
    /// (terminator included), or until the peer closes. Bytes past the
    /// terminator stay queued for the next receive. When the chunk budget
    /// runs out first, the partial text is returned without error.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Bytes consumed from the stream, terminator included;
    ///   zero only when the peer closed before sending anything
    /// * `Err(SocketError::Timeout)` - Deadline hit; `received` counts bytes
    ///   consumed so far, which are left in `text`
    pub fn recv_text(&mut self, text: &mut String) -> Result<usize> {
        const OP: &str = "recv_text";
        self.connected_inner(OP)?;

        let budget = self.config.chunk_size;
        let mut window = vec![0u8; budget];
        let mut consumed = 0;
        let mut message = Vec::new();
        let mut result = Ok(());

        while consumed < budget {
            let peeked = match self.peek_ready(&mut window[..budget - consumed], OP) {
                Ok(n) => n,
                Err(e) => {
                    result = Err(e.with_received(consumed));
                    break;
                }
            };
            if peeked == 0 {
                // End of stream; let recv observe it and close the socket
                let mut probe = [0u8; 1];
                if let Err(e) = self.recv(&mut probe) {
                    result = Err(e.with_received(consumed));
                }
                break;
            }

            let terminator = window[..peeked].iter().position(|&b| b == TEXT_TERMINATOR);
            let take = terminator.map_or(peeked, |pos| pos + 1);
            let got = match self.recv_all(&mut window[..take]) {
                Ok(n) => n,
                Err(e) => {
                    let partial = e.received();
                    message.extend_from_slice(&window[..partial]);
                    result = Err(e.with_received(consumed + partial));
                    break;
                }
            };
            consumed += got;
            message.extend_from_slice(&window[..got]);

            if terminator.is_some() && got == take {
                message.pop();
                break;
            }
            if got < take {
                break;
            }
        }

        *text = String::from_utf8_lossy(&message).into_owned();
        result.map(|()| consumed)
    }

    // Private helpers

    fn is_open(&self) -> bool {
        self.passive || self.connected
    }

    fn ensure_unopened(&self, op: &str) -> Result<()> {
        if self.is_open() {
            return Err(SocketError::illegal_state(
                op,
                "unable to change configuration of an open socket",
            ));
        }
        Ok(())
    }

    fn connected_inner(&self, op: &str) -> Result<&Socket2> {
        match (&self.inner, self.connected) {
            (Some(socket), true) => Ok(socket),
            _ => Err(SocketError::illegal_state(op, "socket is not connected")),
        }
    }

    /// Explicit non-zero size, then current buffer length, then chunk size
    ///
    /// Capped at `MAX_CHUNK_SIZE` so a receive never over-allocates.
    fn resolve_size(&self, explicit: Option<usize>, current: usize) -> usize {
        let size = match explicit {
            Some(n) if n > 0 => n,
            _ if current > 0 => current,
            _ => self.config.chunk_size,
        };
        size.min(MAX_CHUNK_SIZE)
    }

    fn wait_for_data(&self, socket: &Socket2, op: &str) -> Result<()> {
        if let Some(timeout) = self.config.timeout {
            if !wait_readable(socket, timeout, op)? {
                trace!(?timeout, "receive deadline elapsed");
                return Err(SocketError::Timeout { received: 0 });
            }
        }
        Ok(())
    }

    fn peek_ready(&self, buf: &mut [u8], op: &str) -> Result<usize> {
        let socket = self.connected_inner(op)?;
        self.wait_for_data(socket, op)?;
        peek(socket, buf).map_err(|e| SocketError::resource(op, e))
    }

    fn candidates(
        &self,
        op: &str,
        host: &str,
        service: &str,
        passive: bool,
    ) -> Result<Vec<SocketAddr>> {
        let family = self.config.family;
        let candidates: Vec<SocketAddr> = self
            .resolver
            .resolve(host, service, family, passive)?
            .into_iter()
            .filter(|addr| family.admits(Domain::for_address(*addr)))
            .collect();

        if candidates.is_empty() {
            return Err(SocketError::Resource(format!(
                "{}: no {:?} endpoints for {}:{}",
                op, family, host, service
            )));
        }
        Ok(candidates)
    }

    /// Try `attempt` on a fresh descriptor for each candidate in order
    fn first_candidate<F>(
        &self,
        op: &str,
        candidates: &[SocketAddr],
        attempt: F,
    ) -> Result<(Socket2, SocketAddr)>
    where
        F: Fn(&Socket2, &SocketAddr) -> io::Result<()>,
    {
        let mut last_error = None;
        for addr in candidates {
            let outcome = Socket2::new(
                Domain::for_address(*addr),
                self.config.socket_type.into(),
                Some(Protocol::TCP),
            )
            .and_then(|socket| attempt(&socket, addr).map(|()| socket));

            match outcome {
                Ok(socket) => return Ok((socket, *addr)),
                Err(e) => {
                    trace!(%addr, error = %e, "{} candidate failed", op);
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
        warn!(candidates = candidates.len(), error = %err, "{}: all candidates failed", op);
        Err(SocketError::resource(op, err))
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self {
            inner: None,
            config: SocketConfig::default(),
            passive: false,
            connected: false,
            dropper: PacketDropper::new(),
            resolver: Arc::new(SystemResolver),
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("descriptor", &self.descriptor())
            .field("config", &self.config)
            .field("passive", &self.passive)
            .field("connected", &self.connected)
            .finish()
    }
}

fn clip(data: &[u8], size: Option<usize>) -> &[u8] {
    match size {
        Some(n) if n > 0 && n < data.len() => &data[..n],
        _ => data,
    }
}

fn read_retrying(socket: &Socket2, buf: &mut [u8]) -> io::Result<usize> {
    let mut reader = socket;
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn peek(socket: &Socket2, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: initialized bytes are valid `MaybeUninit<u8>`, and peek only
    // writes initialized data into the slice
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
    loop {
        match socket.peek(uninit) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MockResolve;
    use std::thread;

    fn loopback_listener() -> (Socket, u16) {
        let mut listener = Socket::new(AddressFamily::Ipv4, SocketType::Stream).unwrap();
        listener.listen("127.0.0.1", "0").unwrap();
        let port = listener.local_address().unwrap().port();
        (listener, port)
    }

    fn connected_pair() -> (Socket, Socket) {
        let (listener, port) = loopback_listener();
        let mut client = Socket::new(AddressFamily::Ipv4, SocketType::Stream).unwrap();
        client.connect_port("127.0.0.1", port).unwrap();
        let server = listener.accept().unwrap();
        (client, server)
    }

    fn closed_port() -> u16 {
        let probe = Socket2::new(Domain::IPV4, socket2::Type::STREAM, None).unwrap();
        probe
            .bind(&SockAddr::from("127.0.0.1:0".parse::<SocketAddr>().unwrap()))
            .unwrap();
        probe.local_addr().unwrap().as_socket().unwrap().port()
    }

    fn mock_resolver(addrs: Vec<SocketAddr>) -> Arc<dyn Resolve> {
        let mut resolver = MockResolve::new();
        resolver
            .expect_resolve()
            .returning(move |_, _, _, _| Ok(addrs.clone()));
        Arc::new(resolver)
    }

    #[test]
    fn test_socket_defaults() {
        let socket = Socket::default();
        assert_eq!(socket.descriptor(), None);
        assert_eq!(socket.family(), AddressFamily::Any);
        assert_eq!(socket.socket_type(), SocketType::Stream);
        assert_eq!(socket.backlog(), 5);
        assert!(!socket.timeout_is_set());
        assert_eq!(socket.timeout(), 0.0);
        assert_eq!(socket.default_chunk_size(), 1400);
        assert_eq!(socket.packet_drop_rate(), 15);
        assert!(!socket.is_passively_opened());
        assert!(!socket.is_connected());
    }

    #[test]
    fn test_socket_creation() {
        let v4 = Socket::new(AddressFamily::Ipv4, SocketType::Stream).unwrap();
        assert_eq!(v4.family(), AddressFamily::Ipv4);

        let v6 = Socket::new(AddressFamily::Ipv6, SocketType::Stream).unwrap();
        assert_eq!(v6.family(), AddressFamily::Ipv6);

        let datagram = Socket::new(AddressFamily::Ipv4, SocketType::Datagram);
        assert!(matches!(datagram, Err(SocketError::InvalidConfig(_))));
    }

    #[test]
    fn test_setters_on_unopened_socket() {
        let mut socket = Socket::default();
        for family in [AddressFamily::Ipv4, AddressFamily::Ipv6, AddressFamily::Any] {
            socket.set_family(family).unwrap();
            assert_eq!(socket.family(), family);
        }

        assert!(matches!(
            socket.set_socket_type(SocketType::Datagram),
            Err(SocketError::InvalidConfig(_))
        ));
        assert_eq!(socket.socket_type(), SocketType::Stream);
        socket.set_socket_type(SocketType::Stream).unwrap();

        for backlog in [0, 1, 5, 128, i32::MAX] {
            socket.set_backlog(backlog).unwrap();
            assert_eq!(socket.backlog(), backlog);
        }
        assert!(matches!(socket.set_backlog(-1), Err(SocketError::InvalidConfig(_))));
        assert_eq!(socket.backlog(), i32::MAX);

        assert!(socket.set_default_chunk_size(0).is_err());
        assert!(matches!(
            socket.set_default_chunk_size(usize::MAX),
            Err(SocketError::InvalidConfig(_))
        ));
        assert_eq!(socket.default_chunk_size(), 1400);
        socket.set_default_chunk_size(64).unwrap();
        assert_eq!(socket.default_chunk_size(), 64);
    }

    #[test]
    fn test_timeout_settings() {
        let mut socket = Socket::default();
        for secs in [0.5, 1.25, 2.0, 30.0] {
            socket.set_timeout(secs).unwrap();
            assert_eq!(socket.timeout(), secs);
            assert!(socket.timeout_is_set());
        }

        socket.set_timeout(0.0).unwrap();
        assert!(!socket.timeout_is_set());
        assert_eq!(socket.timeout(), 0.0);

        socket.set_timeout(3.0).unwrap();
        socket.clear_timeout();
        assert!(!socket.timeout_is_set());
        assert_eq!(socket.timeout_duration(), None);

        assert!(matches!(socket.set_timeout(-1.0), Err(SocketError::InvalidConfig(_))));
        assert!(!socket.timeout_is_set());
    }

    #[test]
    fn test_open_socket_rejects_setters() {
        let (mut listener, _) = loopback_listener();
        assert!(matches!(
            listener.set_family(AddressFamily::Ipv6),
            Err(SocketError::IllegalState(_))
        ));
        assert!(matches!(
            listener.set_socket_type(SocketType::Stream),
            Err(SocketError::IllegalState(_))
        ));
        assert!(matches!(listener.set_backlog(10), Err(SocketError::IllegalState(_))));
        assert!(matches!(listener.set_backlog(-10), Err(SocketError::IllegalState(_))));

        // Timeout and chunk size stay adjustable
        listener.set_timeout(1.0).unwrap();
        listener.set_default_chunk_size(100).unwrap();

        let (mut client, _server) = connected_pair();
        assert!(matches!(
            client.set_family(AddressFamily::Ipv4),
            Err(SocketError::IllegalState(_))
        ));
        assert!(matches!(client.set_backlog(1), Err(SocketError::IllegalState(_))));
    }

    #[test]
    fn test_clone_rules() {
        let mut unopened = Socket::new(AddressFamily::Ipv4, SocketType::Stream).unwrap();
        unopened.set_backlog(9).unwrap();
        unopened.set_timeout(0.75).unwrap();

        let copy = unopened.try_clone().unwrap();
        assert_eq!(copy.config(), unopened.config());
        assert_eq!(copy.descriptor(), None);

        let (listener, _) = loopback_listener();
        assert!(matches!(listener.try_clone(), Err(SocketError::IllegalState(_))));

        let mut target = Socket::default();
        assert!(matches!(
            target.clone_config_from(&listener),
            Err(SocketError::IllegalState(_))
        ));
        target.clone_config_from(&unopened).unwrap();
        assert_eq!(target.backlog(), 9);

        let (mut client, _server) = connected_pair();
        assert!(matches!(
            client.clone_config_from(&unopened),
            Err(SocketError::IllegalState(_))
        ));
    }

    #[test]
    fn test_take_moves_descriptor() {
        let (mut listener, _) = loopback_listener();
        let fd = listener.descriptor();
        assert!(fd.is_some());

        let moved = listener.take();
        assert_eq!(moved.descriptor(), fd);
        assert!(moved.is_passively_opened());

        assert_eq!(listener.descriptor(), None);
        assert!(!listener.is_passively_opened());
        assert_eq!(listener.config(), &SocketConfig::default());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut listener, _) = loopback_listener();
        listener.close();
        assert_eq!(listener.descriptor(), None);
        assert!(!listener.is_passively_opened());
        assert!(!listener.is_connected());
        listener.close();
        assert_eq!(listener.descriptor(), None);
        assert_eq!(listener.family(), AddressFamily::Ipv4);
    }

    #[test]
    fn test_listen_twice_rejected() {
        let (mut listener, _) = loopback_listener();
        assert!(matches!(
            listener.listen("127.0.0.1", "0"),
            Err(SocketError::IllegalState(_))
        ));
    }

    #[test]
    fn test_connect_on_passive_rejected() {
        let (mut listener, port) = loopback_listener();
        assert!(matches!(
            listener.connect_port("127.0.0.1", port),
            Err(SocketError::IllegalState(_))
        ));
    }

    #[test]
    fn test_accept_requires_passive() {
        let socket = Socket::default();
        assert!(matches!(socket.accept(), Err(SocketError::IllegalState(_))));

        let (client, _server) = connected_pair();
        assert!(matches!(client.accept(), Err(SocketError::IllegalState(_))));
    }

    #[test]
    fn test_accept_yields_connected_socket() {
        let (listener, port) = loopback_listener();
        let mut client = Socket::new(AddressFamily::Ipv4, SocketType::Stream).unwrap();
        client.connect_port("127.0.0.1", port).unwrap();

        let accepted = listener.accept().unwrap();
        assert!(accepted.is_connected());
        assert!(!accepted.is_passively_opened());
        assert_eq!(accepted.family(), AddressFamily::Ipv4);
        assert!(listener.is_passively_opened());
        assert!(!listener.is_connected());

        assert_eq!(
            accepted.remote_address().unwrap(),
            client.local_address().unwrap()
        );
        assert_eq!(accepted.local_address().unwrap().port(), port);
    }

    #[test]
    fn test_listen_skips_failed_candidates() {
        let resolver = mock_resolver(vec![
            "192.0.2.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
        ]);
        let mut socket = Socket::new(AddressFamily::Ipv4, SocketType::Stream)
            .unwrap()
            .with_resolver(resolver);

        socket.listen("ignored", "0").unwrap();
        assert!(socket.is_passively_opened());
        assert_eq!(socket.local_address().unwrap().address(), "127.0.0.1");
    }

    #[test]
    fn test_listen_filters_family() {
        let resolver = mock_resolver(vec![
            "[::1]:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
        ]);
        let mut socket = Socket::new(AddressFamily::Ipv4, SocketType::Stream)
            .unwrap()
            .with_resolver(resolver);

        socket.listen("ignored", "0").unwrap();
        assert!(socket.local_address().unwrap().is_ipv4());
    }

    #[test]
    fn test_listen_exhausts_candidates() {
        let resolver = mock_resolver(vec!["192.0.2.1:0".parse().unwrap()]);
        let mut socket = Socket::default().with_resolver(resolver);

        match socket.listen("ignored", "0") {
            Err(SocketError::Resource(msg)) => assert!(msg.starts_with("listen: ")),
            other => panic!("Expected Resource error, got {:?}", other),
        }
        assert!(!socket.is_passively_opened());
        assert_eq!(socket.descriptor(), None);
    }

    #[test]
    fn test_listen_no_candidates() {
        let resolver = mock_resolver(vec!["[::1]:0".parse().unwrap()]);
        let mut socket = Socket::new(AddressFamily::Ipv4, SocketType::Stream)
            .unwrap()
            .with_resolver(resolver);
        assert!(matches!(
            socket.listen("ignored", "0"),
            Err(SocketError::Resource(_))
        ));
    }

    #[test]
    fn test_resolver_error_propagates() {
        let mut resolver = MockResolve::new();
        resolver
            .expect_resolve()
            .withf(|host, service, family, passive| {
                host.to_string() == "example.invalid"
                    && service.to_string() == "80"
                    && *family == AddressFamily::Ipv6
                    && !*passive
            })
            .times(1)
            .returning(|_, _, _, _| {
                Err(SocketError::Resource(
                    "connect: Name or service not known".to_string(),
                ))
            });

        let mut socket = Socket::new(AddressFamily::Ipv6, SocketType::Stream)
            .unwrap()
            .with_resolver(Arc::new(resolver));
        assert_eq!(
            socket.connect("example.invalid", "80"),
            Err(SocketError::Resource("connect: Name or service not known".to_string()))
        );
        assert!(!socket.is_connected());
    }

    #[test]
    fn test_connect_skips_refused_candidates() {
        let (listener, port) = loopback_listener();
        let refused = closed_port();
        let resolver = mock_resolver(vec![
            SocketAddr::from(([127, 0, 0, 1], refused)),
            SocketAddr::from(([127, 0, 0, 1], port)),
        ]);

        let mut client = Socket::default().with_resolver(resolver);
        client.connect("ignored", "ignored").unwrap();
        assert!(client.is_connected());
        assert_eq!(client.remote_address().unwrap().port(), port);

        let _server = listener.accept().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let mut client = Socket::new(AddressFamily::Ipv4, SocketType::Stream).unwrap();
        let result = client.connect_port("127.0.0.1", closed_port());
        assert!(matches!(result, Err(SocketError::Resource(_))));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_io_requires_connection() {
        let mut socket = Socket::default();
        let mut buf = [0u8; 4];
        let mut vec = vec![1u8, 2, 3];

        assert!(matches!(socket.send(b"x"), Err(SocketError::IllegalState(_))));
        assert!(matches!(socket.send_all(b"x"), Err(SocketError::IllegalState(_))));
        assert!(matches!(socket.send_text("x"), Err(SocketError::IllegalState(_))));
        assert!(matches!(
            socket.packet_error_send(b"x"),
            Err(SocketError::IllegalState(_))
        ));
        assert!(matches!(socket.recv(&mut buf), Err(SocketError::IllegalState(_))));
        assert!(matches!(socket.recv(&mut []), Err(SocketError::IllegalState(_))));
        assert!(matches!(socket.recv_all(&mut buf), Err(SocketError::IllegalState(_))));
        assert!(matches!(
            socket.recv_all_into(&mut vec, None),
            Err(SocketError::IllegalState(_))
        ));
        assert_eq!(vec, vec![1, 2, 3]);
        assert!(matches!(socket.remote_address(), Err(SocketError::IllegalState(_))));
        assert!(matches!(socket.local_address(), Err(SocketError::IllegalState(_))));
    }

    #[test]
    fn test_packet_error_send_always_checks_connection() {
        let mut socket = Socket::default();
        for seed in 0..50 {
            socket.seed_packet_errors(seed);
            assert!(matches!(
                socket.packet_error_send(b"payload"),
                Err(SocketError::IllegalState(_))
            ));
        }
    }

    #[test]
    fn test_transport_failure_surfaces_resource_error() {
        let (mut client, mut server) = connected_pair();
        server.send_all(b"never read").unwrap();
        thread::sleep(Duration::from_millis(50));

        // Closing with unread data resets the connection
        client.close();
        thread::sleep(Duration::from_millis(100));

        let mut buf = [0u8; 16];
        match server.recv(&mut buf) {
            Err(SocketError::Resource(msg)) => assert!(msg.starts_with("recv: "), "{}", msg),
            other => panic!("Expected Resource error, got {:?}", other),
        }
        assert!(server.is_connected());

        match server.send_all(&[0u8; 100_000]) {
            Err(SocketError::Resource(msg)) => assert!(msg.starts_with("send: "), "{}", msg),
            other => panic!("Expected Resource error, got {:?}", other),
        }
        assert!(server.is_connected());
    }

    #[test]
    fn test_oversized_explicit_size_is_capped() {
        let socket = Socket::default();
        assert_eq!(socket.resolve_size(Some(usize::MAX), 0), MAX_CHUNK_SIZE);
        assert_eq!(socket.resolve_size(None, 0), 1400);
    }

    #[test]
    fn test_huge_timeout_enables_deadline() {
        let mut socket = Socket::default();
        socket.set_timeout(1e300).unwrap();
        assert!(socket.timeout_is_set());
        assert_eq!(socket.timeout_duration(), Some(Duration::MAX));
    }

    #[test]
    fn test_zero_length_recv_is_noop() {
        let (_client, mut server) = connected_pair();
        server.set_timeout(0.05).unwrap();
        assert_eq!(server.recv(&mut []).unwrap(), 0);
        assert!(server.is_connected());
    }

    #[test]
    fn test_recv_timeout() {
        let (_client, mut server) = connected_pair();
        server.set_timeout(0.1).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(server.recv(&mut buf), Err(SocketError::Timeout { received: 0 }));
        assert!(server.is_connected());
    }

    #[test]
    fn test_recv_all_timeout_reports_partial() {
        let (client, mut server) = connected_pair();
        server.set_timeout(0.1).unwrap();
        client.send_all(b"abc").unwrap();

        let mut buf = vec![0u8; 10];
        let err = server.recv_all_into(&mut buf, None).unwrap_err();
        assert_eq!(err, SocketError::Timeout { received: 3 });
        assert_eq!(buf, b"abc");
    }

    #[test]
    fn test_peer_close_closes_socket() {
        let (mut client, mut server) = connected_pair();
        client.close();
        assert!(server.is_connected());

        let mut buf = [0u8; 16];
        assert_eq!(server.recv(&mut buf).unwrap(), 0);
        assert!(!server.is_connected());
        assert_eq!(server.descriptor(), None);
    }

    #[test]
    fn test_size_resolution() {
        let (client, mut server) = connected_pair();
        server.set_default_chunk_size(4).unwrap();
        client.send_all(b"0123456789abcdef").unwrap();

        // Explicit size wins
        let mut buf = vec![0u8; 8];
        assert_eq!(server.recv_all_into(&mut buf, Some(2)).unwrap(), 2);
        assert_eq!(buf, b"01");

        // Then the buffer's current length
        let mut buf = vec![0u8; 3];
        assert_eq!(server.recv_all_into(&mut buf, None).unwrap(), 3);
        assert_eq!(buf, b"234");

        // Then the default chunk size
        let mut buf = Vec::new();
        assert_eq!(server.recv_all_into(&mut buf, Some(0)).unwrap(), 4);
        assert_eq!(buf, b"5678");

        let mut text = String::new();
        assert_eq!(server.recv_all_string(&mut text, None).unwrap(), 4);
        assert_eq!(text, "9abc");
    }

    #[test]
    fn test_recv_into_resizes() {
        let (client, mut server) = connected_pair();
        client.send_all(b"hello").unwrap();

        let mut buf = Vec::new();
        let n = server.recv_into(&mut buf, None).unwrap();
        assert!(n > 0 && n <= 5);
        assert_eq!(buf.len(), n);
        assert_eq!(&b"hello"[..n], &buf[..]);
    }

    #[test]
    fn test_send_sized_clips() {
        let (client, mut server) = connected_pair();
        assert_eq!(client.send_sized(b"abcdef", Some(3)).unwrap(), 3);
        assert_eq!(client.send_sized(b"xy", Some(10)).unwrap(), 2);
        assert_eq!(client.send_sized(b"z", None).unwrap(), 1);

        let mut buf = [0u8; 6];
        assert_eq!(server.recv_all(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"abcxyz");
    }

    #[test]
    fn test_text_framing() {
        let (client, mut server) = connected_pair();
        server.set_timeout(1.0).unwrap();
        assert_eq!(client.send_text("first").unwrap(), 6);
        assert_eq!(client.send_text("").unwrap(), 1);
        assert_eq!(client.send_text("third").unwrap(), 6);

        let mut text = String::new();
        assert_eq!(server.recv_text(&mut text).unwrap(), 6);
        assert_eq!(text, "first");
        assert_eq!(server.recv_text(&mut text).unwrap(), 1);
        assert_eq!(text, "");
        assert_eq!(server.recv_text(&mut text).unwrap(), 6);
        assert_eq!(text, "third");
    }

    #[test]
    fn test_text_budget_is_hard_cutoff() {
        let (client, mut server) = connected_pair();
        server.set_default_chunk_size(4).unwrap();
        server.set_timeout(1.0).unwrap();
        client.send_text("abcdefg").unwrap();

        let mut text = String::new();
        assert_eq!(server.recv_text(&mut text).unwrap(), 4);
        assert_eq!(text, "abcd");
        assert_eq!(server.recv_text(&mut text).unwrap(), 4);
        assert_eq!(text, "efg");
    }

    #[test]
    fn test_text_peer_close() {
        let (mut client, mut server) = connected_pair();
        client.send_all(b"partial").unwrap();
        client.close();

        let mut text = String::new();
        assert_eq!(server.recv_text(&mut text).unwrap(), 7);
        assert_eq!(text, "partial");
        assert!(!server.is_connected());
    }

    #[test]
    fn test_text_timeout() {
        let (client, mut server) = connected_pair();
        server.set_timeout(0.1).unwrap();
        client.send_all(b"no-end").unwrap();

        let mut text = String::new();
        let err = server.recv_text(&mut text).unwrap_err();
        assert_eq!(err, SocketError::Timeout { received: 6 });
        assert_eq!(text, "no-end");
    }

    #[test]
    fn test_packet_error_send_reports_full_length() {
        let (mut client, mut server) = connected_pair();
        client.seed_packet_errors(11);
        server.set_timeout(0.2).unwrap();

        let mut reported = 0;
        for _ in 0..200 {
            reported += client.packet_error_send(b"x").unwrap();
        }
        assert_eq!(reported, 200);

        let mut buf = vec![0u8; 200];
        let received = match server.recv_all(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                assert!(e.is_timeout());
                e.received()
            }
        };
        assert!(received < 200);
        assert!(received > 120);
    }

    #[test]
    fn test_sockets_usable_across_threads() {
        let (client, mut server) = connected_pair();
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let sender = thread::spawn(move || client.send_all(&payload).unwrap());
        let mut buf = vec![0u8; expected.len()];
        assert_eq!(server.recv_all(&mut buf).unwrap(), expected.len());
        assert_eq!(buf, expected);
        assert_eq!(sender.join().unwrap(), expected.len());
    }
}
