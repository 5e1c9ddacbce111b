//! Readiness Module
//!
//! Bounded readiness wait applied before each receive attempt when a socket
//! has a timeout configured.

use std::os::fd::AsFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};

use crate::error::{Result, SocketError};

/// Wait until `fd` is readable or `timeout` elapses
///
/// End-of-stream and peer hang-up count as readable so the following receive
/// can observe them.
///
/// # Returns
///
/// * `Ok(true)` - Data (or end-of-stream) is ready
/// * `Ok(false)` - The deadline elapsed first
/// * `Err(SocketError::Resource)` - The wait itself failed
pub fn wait_readable<Fd: AsFd>(fd: &Fd, timeout: Duration, op: &str) -> Result<bool> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, poll_timeout_ms(timeout)) {
        Ok(ready) => Ok(ready > 0),
        Err(errno) => Err(SocketError::Resource(format!("{}: {}", op, errno.desc()))),
    }
}

/// Milliseconds for `poll`, rounded up so sub-millisecond deadlines still wait
fn poll_timeout_ms(timeout: Duration) -> libc::c_int {
    let micros = timeout.as_micros();
    let millis = micros / 1000 + u128::from(micros % 1000 != 0);
    libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
}
