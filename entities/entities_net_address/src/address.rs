//! Address Module
//!
//! Provides the endpoint address value type used by stream sockets. An
//! [`Address`] always holds a structurally valid IPv4 or IPv6 endpoint; the
//! family tag cannot disagree with the stored content.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use socket2::SockAddr;
use thiserror::Error;

/// Address error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Text or platform structure that is not a valid IPv4/IPv6 endpoint
    #[error("invalid address format: {0}")]
    Format(String),
}

/// Network endpoint address
///
/// Normalizes a platform endpoint structure (IPv4 or IPv6) into port, text
/// and equality operations. Equality compares the family, port and raw
/// address bytes; IPv6 endpoints additionally compare flow info and scope id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    addr: SocketAddr,
}

impl Address {
    /// Create the unspecified IPv4 wildcard address (`0.0.0.0:0`)
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
        }
    }

    /// Create an address from a platform socket address structure
    ///
    /// # Errors
    ///
    /// * `AddressError::Format` - The structure is not an IPv4 or IPv6 endpoint
    pub fn from_sock_addr(addr: &SockAddr) -> Result<Self, AddressError> {
        addr.as_socket().map(Self::from).ok_or_else(|| {
            AddressError::Format(format!(
                "unsupported address family {} in assignment to address",
                addr.family()
            ))
        })
    }

    /// Replace the contents with a platform socket address structure
    ///
    /// On error the address is left unchanged.
    pub fn assign_sock_addr(&mut self, addr: &SockAddr) -> Result<(), AddressError> {
        *self = Self::from_sock_addr(addr)?;
        Ok(())
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// Port in host byte order
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Set the port (host byte order), keeping the family and address
    pub fn set_port(&mut self, port: u16) {
        self.addr.set_port(port);
    }

    /// Address in presentation syntax, without port or brackets
    pub fn address(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Set the address from presentation syntax
    ///
    /// The text is tried as IPv4 first, then IPv6. When the family changes,
    /// every field except the port is reset before the new address is stored.
    /// When the family is unchanged only the address bytes are replaced.
    ///
    /// # Errors
    ///
    /// * `AddressError::Format` - Neither IPv4 nor IPv6 syntax; the address
    ///   is left unmodified
    pub fn set_address(&mut self, text: &str) -> Result<(), AddressError> {
        if let Ok(ip) = text.parse::<Ipv4Addr>() {
            self.addr = match self.addr {
                SocketAddr::V4(mut v4) => {
                    v4.set_ip(ip);
                    SocketAddr::V4(v4)
                }
                SocketAddr::V6(v6) => SocketAddr::V4(SocketAddrV4::new(ip, v6.port())),
            };
            return Ok(());
        }

        if let Ok(ip) = text.parse::<Ipv6Addr>() {
            self.addr = match self.addr {
                SocketAddr::V6(mut v6) => {
                    v6.set_ip(ip);
                    SocketAddr::V6(v6)
                }
                SocketAddr::V4(v4) => SocketAddr::V6(SocketAddrV6::new(ip, v4.port(), 0, 0)),
            };
            return Ok(());
        }

        Err(AddressError::Format(format!(
            "invalid address ({}) in set_address",
            text
        )))
    }

    /// IP address component
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// The endpoint as a standard library socket address
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The endpoint as a platform socket address structure
    pub fn to_sock_addr(&self) -> SockAddr {
        SockAddr::from(self.addr)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new()
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            addr: SocketAddr::V4(addr),
        }
    }
}

impl From<SocketAddrV6> for Address {
    fn from(addr: SocketAddrV6) -> Self {
        Self {
            addr: SocketAddr::V6(addr),
        }
    }
}

impl TryFrom<&SockAddr> for Address {
    type Error = AddressError;

    fn try_from(addr: &SockAddr) -> Result<Self, Self::Error> {
        Self::from_sock_addr(addr)
    }
}

impl TryFrom<SockAddr> for Address {
    type Error = AddressError;

    fn try_from(addr: SockAddr) -> Result<Self, Self::Error> {
        Self::from_sock_addr(&addr)
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        addr.addr
    }
}

impl From<Address> for SockAddr {
    fn from(addr: Address) -> Self {
        addr.to_sock_addr()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>()
            .map(Self::from)
            .map_err(|_| AddressError::Format(format!("invalid endpoint ({})", s)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            SocketAddr::V4(v4) => write!(f, "{}:{}", v4.ip(), v4.port()),
            // Scope ids are not part of the display form
            SocketAddr::V6(v6) => write!(f, "[{}]:{}", v6.ip(), v6.port()),
        }
    }
}
