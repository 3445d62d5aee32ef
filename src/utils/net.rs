//! Listener binding with IPv6-only sockets and port fallback.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};

use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
    SockaddrIn6,
};
use tracing::{debug, info};

fn socket_addr_family(addr: &SocketAddr) -> AddressFamily {
    match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    }
}

/// Bind a non-blocking TCP listener, IPv6-only for IPv6 addresses.
///
/// `SO_REUSEADDR` lets a restarted relay reclaim a port in `TIME_WAIT`; it
/// does not allow sharing a port another socket is listening on.
pub fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = socket_addr_family(&addr);
    let fd = socket::socket(
        domain,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        SockProtocol::Tcp,
    )
    .map_err(io::Error::from)?;

    socket::setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(io::Error::from)?;

    if matches!(addr, SocketAddr::V6(_)) {
        socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true).map_err(io::Error::from)?;
    }

    match addr {
        SocketAddr::V4(v4) => {
            let sockaddr = SockaddrIn::from(v4);
            socket::bind(fd.as_raw_fd(), &sockaddr).map_err(io::Error::from)?;
        }
        SocketAddr::V6(v6) => {
            let sockaddr = SockaddrIn6::from(v6);
            socket::bind(fd.as_raw_fd(), &sockaddr).map_err(io::Error::from)?;
        }
    }
    socket::listen(&fd, Backlog::MAXCONN).map_err(io::Error::from)?;

    let listener = unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) };
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Ports tried in order: preferred, fallbacks, then an ephemeral port.
///
/// A preferred port of 0 means "ephemeral" and skips the fallbacks.
pub fn candidate_ports(preferred: u16, fallbacks: &[u16]) -> Vec<u16> {
    let mut ports = Vec::with_capacity(fallbacks.len() + 2);
    if preferred != 0 {
        ports.push(preferred);
        for &port in fallbacks {
            if port != 0 && !ports.contains(&port) {
                ports.push(port);
            }
        }
    }
    ports.push(0);
    ports
}

/// Bind the first available candidate port on `ip`.
///
/// Fails only when not even an ephemeral port can be bound.
pub fn bind_with_fallback(ip: IpAddr, preferred: u16, fallbacks: &[u16]) -> io::Result<TcpListener> {
    let mut last_err = None;

    for port in candidate_ports(preferred, fallbacks) {
        let addr = SocketAddr::new(ip, port);
        match bind_tcp_listener(addr) {
            Ok(listener) => {
                if preferred != 0 && port != preferred {
                    let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                    info!("Port {} unavailable, bound fallback port {}", preferred, bound);
                }
                return Ok(listener);
            }
            Err(e) => {
                debug!("Failed to bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate ports")
    }))
}
