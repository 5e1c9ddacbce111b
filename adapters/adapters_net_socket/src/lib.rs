//! Adapters Layer: Stream Sockets
//!
//! Provides a connection-oriented stream socket over IPv4/IPv6 built on the
//! `socket2` crate.
//!
//! ## Overview
//!
//! The `adapters_net_socket` crate provides:
//! - **Lifecycle**: listen, connect, accept and close with explicit
//!   passive/connected state
//! - **Completion loops**: `send_all`/`recv_all` transfer exact byte counts
//! - **Text framing**: NUL-terminated messages via `send_text`/`recv_text`
//! - **Receive timeouts**: per-attempt readiness wait reporting partial counts
//! - **Fault injection**: `packet_error_send` drops a fixed share of sends
//!
//! ## Architecture
//!
//! This crate is part of the adapters layer. It depends on:
//! - `entities_net_address`: Endpoint value type returned by address queries
//!
//! Name resolution goes through the [`Resolve`] trait so candidate ordering
//! can be substituted in tests.
//!
//! ## Example
//!
//! ```no_run
//! use adapters_net_socket::{AddressFamily, Socket, SocketType};
//!
//! let mut listener = Socket::new(AddressFamily::Ipv4, SocketType::Stream)?;
//! listener.listen_port(5555)?;
//! let mut peer = listener.accept()?;
//! let mut greeting = String::new();
//! peer.recv_text(&mut greeting)?;
//! peer.send_text("welcome")?;
//! # Ok::<(), adapters_net_socket::SocketError>(())
//! ```

pub mod config;
pub mod error;
pub mod fault;
pub mod readiness;
pub mod resolver;
pub mod socket;

pub use config::{
    AddressFamily, SocketConfig, SocketType, DEFAULT_BACKLOG, DEFAULT_CHUNK_SIZE,
    DEFAULT_DROP_RATE, MAX_CHUNK_SIZE,
};
pub use entities_net_address::Address;
pub use error::{Result, SocketError};
pub use fault::PacketDropper;
pub use resolver::{Resolve, SystemResolver};
pub use socket::{Socket, TEXT_TERMINATOR};
