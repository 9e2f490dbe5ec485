//! Listener construction.
//!
//! `mio::net::TcpListener::bind` goes through `std::net::TcpListener`, which
//! has no way to set a custom backlog. We build the socket with `socket2`
//! instead (matching the construction-then-handoff-to-mio pattern shown in
//! the sibling reactor example bundled with these references) and convert
//! the result into `mio::net::TcpListener` via `From<std::net::TcpListener>`.

use std::net::{SocketAddr, TcpListener as StdTcpListener};

use mio::net::TcpListener;
use socket2::{Domain, Socket, Type};

use crate::error::{Error, Result};

/// Default backlog used when a caller doesn't have a specific requirement.
pub const DEFAULT_BACKLOG: i32 = 100;

/// Builds a non-blocking, `SO_REUSEADDR` listener bound to `addr` with the
/// given `backlog`, ready to register with a [`mio::Poll`].
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None).map_err(Error::IoAcceptFailed)?;

    socket.set_reuse_address(true).map_err(Error::IoAcceptFailed)?;
    socket.set_nonblocking(true).map_err(Error::IoAcceptFailed)?;
    socket.bind(&addr.into()).map_err(Error::IoAcceptFailed)?;
    socket.listen(backlog).map_err(Error::IoAcceptFailed)?;

    let std_listener: StdTcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

/// Sets `TCP_NODELAY` on an accepted stream. The reactor calls this right
/// after `accept()`, before the connection's handler pipeline ever sees a
/// byte, so latency-sensitive handlers never have to think about Nagle's
/// algorithm.
pub fn disable_nagle(stream: &mio::net::TcpStream) -> Result<()> {
    stream.set_nodelay(true).map_err(Error::IoAcceptFailed)
}
