//! Listening socket setup.
//!
//! Every worker independently binds every configured port with both
//! `SO_REUSEADDR` and `SO_REUSEPORT` set, so the kernel load-balances
//! `accept()`s across the whole pre-forked pool instead of funneling them
//! through a single shared descriptor.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};

/// Binds `0.0.0.0:port`, per §4.2. The configuration's `ip` field is
/// parsed but deliberately not consulted here (SPEC_FULL §3/§6): the
/// original (`SocketUtils.hpp`) always binds `INADDR_ANY` regardless of
/// what's in the config file.
pub fn bind_reuse_port(port: u16) -> io::Result<StdTcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_an_ephemeral_port() {
        let listener = bind_reuse_port(0).expect("bind should succeed");
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn two_workers_can_share_a_port_with_reuseport() {
        let listener = bind_reuse_port(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        // A second bind to the very same port must succeed because of
        // SO_REUSEPORT -- this is exactly the property every pre-forked
        // worker depends on.
        let second = bind_reuse_port(port);
        assert!(second.is_ok());
    }
}
