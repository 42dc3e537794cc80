//! UDP (§4.8): header validation/emission tied to the socket table.
//!
//! Grounded in `udp.c`: `udp_input` looks a datagram up by `(dst_addr,
//! dst_port)` and calls `nstack_sock_dgram_input` on a hit, or otherwise
//! leaves it to the caller to decide whether to answer with ICMP (matching
//! `ip::mod`'s note that UDP is dispatched directly by `Stack`, not through
//! `ProtocolHandler` — it needs the socket table, which that trait has no
//! slot for). `nstack_udp_send` builds the header with a zeroed checksum
//! (valid per RFC 768 on IPv4) and calls `ip_send` directly; `build_datagram`
//! here is that half, minus the send.

use crate::error::{Error, Result};
use crate::socket::{SockAddr, SocketTable};
use crate::wire::{Ipv4Address, UdpPacket, UdpRepr, UDP_HEADER_LEN};

/// `UDP_MAXLEN` in the original: the largest payload that fits an IPv4
/// datagram's 16-bit total-length field alongside a UDP header.
pub const UDP_MAXLEN: usize = 65507;

/// Outcome of handing an inbound UDP datagram to the socket table.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Delivered to a bound socket's ingress ring.
    Delivered,
    /// No socket is bound to the destination address; the caller
    /// synthesizes an ICMP Destination Port Unreachable (§4.7,
    /// `NSTACK_IP_SEND_HOSTUNREAC`).
    PortUnreachable,
}

/// Validate and deliver one inbound UDP datagram.
pub fn receive(
    sockets: &SocketTable,
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    data: &[u8],
) -> Result<Outcome> {
    let packet = UdpPacket::new_checked(data)?;
    let repr = UdpRepr::parse(&packet, src_addr, dst_addr)?;

    let local = SockAddr { addr: dst_addr, port: repr.dst_port };
    let remote = SockAddr { addr: src_addr, port: repr.src_port };

    match sockets.deliver_udp(local, remote, packet.payload()) {
        Ok(()) => Ok(Outcome::Delivered),
        Err(Error::PortUnreachable) => Ok(Outcome::PortUnreachable),
        Err(e) => Err(e),
    }
}

/// Build a complete UDP datagram (header + payload), ready for
/// [`crate::ip::send`]. Matches `nstack_udp_send`'s zeroed checksum — valid
/// per RFC 768 on IPv4, and cheaper than computing one over a pseudo-header
/// for traffic that never leaves the local link.
pub fn build_datagram(src: SockAddr, dst: SockAddr, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > UDP_MAXLEN - UDP_HEADER_LEN {
        return Err(Error::MessageTooLong);
    }

    let repr = UdpRepr { src_port: src.port, dst_port: dst.port };
    let mut buf = vec![0u8; repr.header_len() + payload.len()];
    let mut packet = UdpPacket::new_unchecked(&mut buf[..]);
    repr.emit(&mut packet, src.addr, dst.addr, payload.len(), |buf| {
        buf.copy_from_slice(payload)
    });
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8, port: u16) -> SockAddr {
        SockAddr { addr: Ipv4Address::new(10, 0, 0, last), port }
    }

    #[test]
    fn datagram_round_trips_through_receive() {
        let src = addr(1, 1234);
        let dst = addr(2, 53);
        let datagram = build_datagram(src, dst, b"query").unwrap();

        let mut sockets = SocketTable::new();
        let path = format!("/tmp/nstack-udp-test-{}", std::process::id());
        sockets.bind_udp(&path, dst).unwrap();

        let outcome = receive(&sockets, src.addr, dst.addr, &datagram).unwrap();
        assert_eq!(outcome, Outcome::Delivered);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unbound_destination_is_port_unreachable() {
        let sockets = SocketTable::new();
        let src = addr(1, 1234);
        let dst = addr(2, 53);
        let datagram = build_datagram(src, dst, b"query").unwrap();

        let outcome = receive(&sockets, src.addr, dst.addr, &datagram).unwrap();
        assert_eq!(outcome, Outcome::PortUnreachable);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let src = addr(1, 1234);
        let dst = addr(2, 53);
        let payload = vec![0u8; UDP_MAXLEN];
        assert_eq!(build_datagram(src, dst, &payload), Err(Error::MessageTooLong));
    }
}
