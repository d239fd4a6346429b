//! TCP reachability probe: "is something listening on host:port".
//!
//! No data is exchanged; the connection is closed as soon as it is
//! established.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Shutdown, SocketAddr, ToSocketAddrs};
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub trait Prober: Send {
    /// `true` iff a TCP connection to `host:port` is established within
    /// the probe timeout. Every error counts as unreachable.
    fn probe(&self, host: &str, port: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct TcpProber {
    timeout: Duration,
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn connect(&self, addr: &SocketAddr) -> bool {
        let socket = match Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP)) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!("socket for {} failed: {}", addr, e);
                return false;
            }
        };

        match socket.connect_timeout(&(*addr).into(), self.timeout) {
            Ok(()) => {
                let _ = socket.shutdown(Shutdown::Both);
                true
            }
            Err(e) => {
                tracing::debug!("connect {} failed: {}", addr, e);
                false
            }
        }
    }
}

impl Prober for TcpProber {
    fn probe(&self, host: &str, port: &str) -> bool {
        let port: u16 = match port.trim().parse() {
            Ok(port) => port,
            Err(_) => {
                tracing::warn!("invalid port '{}' for host {}", port, host);
                return false;
            }
        };

        let addrs = match resolve(host, port) {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::debug!("resolve {}:{} failed: {}", host, port, e);
                return false;
            }
        };

        addrs.iter().any(|addr| self.connect(addr))
    }
}

/// IP literals are used as they are. Host names go through the system
/// resolver, which the probe timeout does not bound.
fn resolve(host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
    let literal = host.trim().trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    Ok((host, port).to_socket_addrs()?.collect())
}
