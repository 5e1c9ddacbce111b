//! Entities Layer: Network Endpoint Addresses
//!
//! Provides the [`Address`] value type, a normalized view over an IPv4 or
//! IPv6 endpoint with:
//! - Port access in host byte order
//! - Textual address access (presentation syntax)
//! - Display as `addr:port` or `[addr]:port`
//! - Conversion to and from the platform socket address structure
//!
//! ## See Also
//!
//! - [`adapters_net_socket`](../adapters_net_socket/index.html): Stream sockets built on this type

pub mod address;

pub use address::{Address, AddressError};
