//! Resolver Module
//!
//! Maps a host/service pair to an ordered list of candidate endpoints. The
//! [`Resolve`] trait is the seam sockets use; [`SystemResolver`] is the
//! platform implementation backed by `getaddrinfo`.

use std::ffi::{CStr, CString};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ptr;

use crate::config::AddressFamily;
use crate::error::{Result, SocketError};

/// Name and service resolution
#[cfg_attr(test, mockall::automock)]
pub trait Resolve: Send + Sync {
    /// Resolve `host` and `service` into candidate stream endpoints
    ///
    /// # Arguments
    ///
    /// * `host` - Host name or numeric address; empty means no node, which
    ///   is the wildcard interface when `passive` is set
    /// * `service` - Service name or numeric port
    /// * `family` - Family restriction for the returned candidates
    /// * `passive` - Whether the endpoints will be bound for listening
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<SocketAddr>)` - Candidates in preference order
    /// * `Err(SocketError::Resource)` - Resolution failed
    fn resolve(
        &self,
        host: &str,
        service: &str,
        family: AddressFamily,
        passive: bool,
    ) -> Result<Vec<SocketAddr>>;
}

/// Platform resolver using `getaddrinfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(
        &self,
        host: &str,
        service: &str,
        family: AddressFamily,
        passive: bool,
    ) -> Result<Vec<SocketAddr>> {
        let op = if passive { "listen" } else { "connect" };
        let node = if host.is_empty() {
            None
        } else {
            Some(to_c_string(op, host)?)
        };
        let service = to_c_string(op, service)?;

        // SAFETY: addrinfo is a plain C struct for which all-zero is a valid
        // "no hints" value
        let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
        hints.ai_family = family.as_raw();
        hints.ai_socktype = libc::SOCK_STREAM;
        hints.ai_protocol = 0;
        hints.ai_flags = if passive { libc::AI_PASSIVE } else { 0 };

        let mut result: *mut libc::addrinfo = ptr::null_mut();
        // SAFETY: node and service are valid NUL-terminated strings (or null
        // for node) that outlive the call; result is an out-pointer
        let rc = unsafe {
            libc::getaddrinfo(
                node.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
                service.as_ptr(),
                &hints,
                &mut result,
            )
        };
        if rc != 0 {
            return Err(SocketError::Resource(format!("{}: {}", op, gai_error(rc))));
        }

        let mut candidates = Vec::new();
        let mut cursor = result;
        while !cursor.is_null() {
            // SAFETY: cursor walks the list returned by getaddrinfo, which
            // stays valid until freeaddrinfo below
            let info = unsafe { &*cursor };
            if let Some(addr) = unsafe { socket_addr_from_raw(info.ai_addr) } {
                candidates.push(addr);
            }
            cursor = info.ai_next;
        }
        // SAFETY: result came from a successful getaddrinfo and is freed once
        unsafe { libc::freeaddrinfo(result) };

        Ok(candidates)
    }
}

fn to_c_string(op: &str, text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| {
        SocketError::Resource(format!("{}: name ({}) contains a NUL byte", op, text.escape_default()))
    })
}

fn gai_error(code: libc::c_int) -> String {
    // SAFETY: gai_strerror returns a pointer to a static message
    unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
        .to_string_lossy()
        .into_owned()
}

/// Read an IPv4/IPv6 endpoint out of a raw `sockaddr`
///
/// # Safety
///
/// `raw` must be null or point to a `sockaddr` whose length matches its
/// family, as returned by `getaddrinfo`.
unsafe fn socket_addr_from_raw(raw: *const libc::sockaddr) -> Option<SocketAddr> {
    if raw.is_null() {
        return None;
    }
    match (*raw).sa_family as libc::c_int {
        libc::AF_INET => {
            let sin = &*(raw as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = &*(raw as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}
