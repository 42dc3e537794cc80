//! The socket / shared-memory IPC layer (§4.10): the daemon-side half of
//! the datagram-oriented client API, plus shared memory plumbing both
//! sides use.
//!
//! Grounded in `include/nstack_socket.h` (region layout), `src/socket.c`
//! (`nstack_listen`/`nstack_recvfrom`/`nstack_sendto` — the client side,
//! reimplemented in [`client`]) and `src/nstack.c` (`nstack_init`'s static
//! socket table, `nstack_sock_dgram_input` — the daemon side, here on
//! [`SocketTable`]).
//!
//! One finding from reading `socket.c` directly rather than guessing: the
//! wakeup signal the two sides use is **`SIGUSR2`**, not `SIGUSR1` — that
//! one is reserved for the daemon's own external shutdown request (see
//! `nstack.c:main`). The original's `pid_end` ctrl field is renamed
//! `pid_client` here to match this spec's own naming for it.

pub mod client;
pub mod ring;
pub mod shmem;

use crate::error::{Error, Result};
use crate::wire::Ipv4Address;

use shmem::{Direction, Region};

/// An IPv4 address/port pair, as used by both the RIB-adjacent stack code
/// and the socket layer (`struct nstack_sockaddr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockAddr {
    pub addr: Ipv4Address,
    pub port: u16,
}

/// Transport protocol a bound socket speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Udp,
    /// Bound once a TCP connection reaches `Established` (§4.9); keyed by
    /// both endpoints rather than just the local address, since several
    /// concurrent TCP connections can share one local port.
    Tcp { remote: SockAddr },
}

/// The daemon's handle to one client-facing socket: its protocol/address
/// identity and the shared-memory region backing its two rings.
pub struct Socket {
    pub local: SockAddr,
    pub proto: Proto,
    region: Region,
}

impl Socket {
    /// Deliver one datagram into the ingress ring and wake the client, if
    /// one is attached. Matches `nstack_sock_dgram_input`, minus its
    /// busy-wait: a full ring reports [`Error::WouldBlock`] instead of
    /// spinning forever, since this runs on the single-threaded ingress
    /// path and must not stall other traffic.
    pub fn deliver(&self, src: SockAddr, payload: &[u8]) -> Result<()> {
        self.region.push(Direction::Ingress, src, self.local, payload)?;
        let pid_client = self.region.ctrl().pid_client;
        if pid_client != 0 {
            unsafe {
                libc::kill(pid_client, libc::SIGUSR2);
            }
        }
        Ok(())
    }

    /// Pop at most one queued outbound datagram, if any. Matches the
    /// egress thread's per-socket, per-wakeup `queue_peek`/`queue_discard`
    /// pair in `nstack_egress_thread` — one send per socket per tick, not
    /// a full drain, so one slow destination can't starve the others.
    pub fn take_outbound(&self) -> Option<(SockAddr, Vec<u8>)> {
        let (_src, dst, payload) = self.region.peek(Direction::Egress)?;
        self.region.discard(Direction::Egress, 1);
        Some((dst, payload))
    }
}

/// The daemon's set of bound sockets. Populated at startup from static
/// configuration (mirroring `nstack.c`'s `sockets[]` table) and, for TCP,
/// grown as connections are established.
#[derive(Default)]
pub struct SocketTable {
    sockets: Vec<Socket>,
    /// Local addresses a TCP connection may passively open against. There's
    /// no shared-memory region here yet — one is created by
    /// [`SocketTable::bind_tcp`] once a connection actually reaches
    /// `Established` (§4.9).
    tcp_listen: Vec<SockAddr>,
}

impl SocketTable {
    pub fn new() -> SocketTable {
        SocketTable {
            sockets: Vec::new(),
            tcp_listen: Vec::new(),
        }
    }

    /// Mark `local` as accepting passive TCP opens.
    pub fn listen_tcp(&mut self, local: SockAddr) -> Result<()> {
        if local.port > crate::config::NSTACK_SOCK_PORT_MAX {
            return Err(Error::AddressInvalid);
        }
        if self.tcp_listen.contains(&local) {
            return Err(Error::AddressInUse);
        }
        self.tcp_listen.push(local);
        Ok(())
    }

    pub fn is_tcp_listening(&self, local: SockAddr) -> bool {
        self.tcp_listen.contains(&local)
    }

    pub fn unlisten_tcp(&mut self, local: SockAddr) {
        self.tcp_listen.retain(|&l| l != local);
    }

    /// Create the backing shared-memory file at `path` and bind a new UDP
    /// socket to `local`. Fails with [`Error::AddressInUse`] if another UDP
    /// socket already owns that address, and [`Error::AddressInvalid`] if
    /// the port exceeds [`crate::config::NSTACK_SOCK_PORT_MAX`].
    pub fn bind_udp(&mut self, path: &str, local: SockAddr) -> Result<()> {
        if local.port > crate::config::NSTACK_SOCK_PORT_MAX {
            return Err(Error::AddressInvalid);
        }
        if self.find_udp(local).is_some() {
            return Err(Error::AddressInUse);
        }
        let region = Region::create(path)?;
        self.sockets.push(Socket {
            local,
            proto: Proto::Udp,
            region,
        });
        Ok(())
    }

    /// Register a freshly established TCP connection's socket, keyed by
    /// both endpoints.
    pub fn bind_tcp(&mut self, path: &str, local: SockAddr, remote: SockAddr) -> Result<()> {
        let region = Region::create(path)?;
        self.sockets.push(Socket {
            local,
            proto: Proto::Tcp { remote },
            region,
        });
        Ok(())
    }

    pub fn find_udp(&self, local: SockAddr) -> Option<&Socket> {
        self.sockets
            .iter()
            .find(|s| s.proto == Proto::Udp && s.local == local)
    }

    pub fn find_tcp(&self, local: SockAddr, remote: SockAddr) -> Option<&Socket> {
        self.sockets
            .iter()
            .find(|s| s.local == local && s.proto == Proto::Tcp { remote })
    }

    pub fn remove_tcp(&mut self, local: SockAddr, remote: SockAddr) {
        self.sockets
            .retain(|s| !(s.local == local && s.proto == Proto::Tcp { remote }));
    }

    /// Deliver a UDP datagram to whichever socket is bound to `local`, or
    /// `Err(Error::PortUnreachable)` if none is (the caller synthesizes an
    /// ICMP Destination Port Unreachable for that case, per §4.7).
    pub fn deliver_udp(&self, local: SockAddr, src: SockAddr, payload: &[u8]) -> Result<()> {
        self.find_udp(local)
            .ok_or(Error::PortUnreachable)?
            .deliver(src, payload)
    }

    /// Deliver a TCP segment's payload to the socket backing an established
    /// connection. Unlike UDP, an unbound destination isn't an error the
    /// caller needs to answer with ICMP — `tcp`'s own connection state
    /// decides whether a port is reachable.
    pub fn deliver_tcp(&self, local: SockAddr, remote: SockAddr, payload: &[u8]) -> Result<()> {
        self.find_tcp(local, remote)
            .ok_or(Error::InvalidState)?
            .deliver(remote, payload)
    }

    /// One egress pass: for every bound socket, pop at most one queued
    /// outbound datagram. Returns `(local socket address, proto, remote
    /// address, payload)` tuples ready for the transport layer to send.
    pub fn drain_egress(&self) -> Vec<(SockAddr, Proto, SockAddr, Vec<u8>)> {
        self.sockets
            .iter()
            .filter_map(|s| s.take_outbound().map(|(dst, payload)| (s.local, s.proto, dst, payload)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8, port: u16) -> SockAddr {
        SockAddr {
            addr: Ipv4Address::new(10, 0, 0, last),
            port,
        }
    }

    #[test]
    fn bind_then_deliver_and_drain() {
        let path = format!("/tmp/nstack-socket-test-{}", std::process::id());
        let mut table = SocketTable::new();
        table.bind_udp(&path, addr(2, 10)).unwrap();

        table.deliver_udp(addr(2, 10), addr(1, 20), b"ping").unwrap();

        let sock = table.find_udp(addr(2, 10)).unwrap();
        let region = &sock.region;
        let (src, dst, payload) = region.peek(shmem::Direction::Ingress).unwrap();
        assert_eq!(src, addr(1, 20));
        assert_eq!(dst, addr(2, 10));
        assert_eq!(payload, b"ping");

        region.push(shmem::Direction::Egress, addr(2, 10), addr(1, 20), b"pong").unwrap();
        let outbound = table.drain_egress();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].3, b"pong");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn double_bind_is_rejected() {
        let path = format!("/tmp/nstack-socket-test-dup-{}", std::process::id());
        let mut table = SocketTable::new();
        table.bind_udp(&path, addr(2, 10)).unwrap();
        assert_eq!(table.bind_udp(&path, addr(2, 10)), Err(Error::AddressInUse));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn tcp_listen_is_tracked_and_rejects_duplicates() {
        let mut table = SocketTable::new();
        table.listen_tcp(addr(2, 80)).unwrap();
        assert!(table.is_tcp_listening(addr(2, 80)));
        assert_eq!(table.listen_tcp(addr(2, 80)), Err(Error::AddressInUse));
        table.unlisten_tcp(addr(2, 80));
        assert!(!table.is_tcp_listening(addr(2, 80)));
    }

    #[test]
    fn delivery_to_unbound_port_is_reported() {
        let table = SocketTable::new();
        assert_eq!(
            table.deliver_udp(addr(2, 10), addr(1, 1), b"x"),
            Err(Error::PortUnreachable)
        );
    }
}
