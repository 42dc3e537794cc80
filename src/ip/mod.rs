//! The IPv4 layer (§4.5): header validation, local-delivery check,
//! fragmentation on send, reassembly on receive.
//!
//! Grounded in `ip.c`'s `ip_input`/`ip_output`/`ip_send` and
//! `ip_fragment.c`. Protocol dispatch itself (ICMP/UDP/TCP) lives in
//! `Stack::dispatch_ip_payload` — it needs the socket and TCP connection
//! tables, which this module has no business touching; `ip::receive` stops
//! at "here is a complete, locally-addressed datagram" and leaves dispatch
//! to the caller, matching §9's "polymorphic handler return values" note
//! (`Outcome` replaces the original's signed-int convention).

pub mod defer;
pub mod reassembly;

use crate::arp;
use crate::config::IP_TTL_DEFAULT;
use crate::error::{Error, Result};
use crate::phy::LinkDevice;
use crate::route::Rib;
use crate::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Address, Ipv4Packet,
    Ipv4Repr, ETHERNET_HEADER_LEN, IPV4_HEADER_LEN,
};

/// Outcome of handing a protocol handler its payload (§9).
#[derive(Debug)]
pub enum HandlerOutcome {
    /// A reply of this many bytes is ready in the caller-supplied buffer.
    Reply(usize),
    /// Consumed, no reply warranted.
    Consumed,
}

/// A stateless IP protocol handler, registered by protocol number.
/// Only ICMP fits this shape without broader stack access (§4.7); UDP and
/// TCP need the socket/connection tables and are dispatched directly by
/// `Stack` instead of through this trait.
pub trait ProtocolHandler {
    fn protocol(&self) -> IpProtocol;

    fn receive(
        &mut self,
        src: Ipv4Address,
        dst: Ipv4Address,
        payload: &[u8],
        reply_buf: &mut [u8],
    ) -> Result<HandlerOutcome>;
}

/// Outcome of handing a complete inbound frame to `ip::send`.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The datagram (or all its fragments) went out on the wire.
    Sent,
    /// No ARP mapping yet; the datagram was queued on the defer queue and
    /// will be retried once a mapping appears (§4.6).
    Deferred,
}

/// Outcome of handing a complete inbound frame to `ip::receive`.
pub enum ReceiveOutcome {
    /// Not addressed to any locally configured interface. `header`/`payload`
    /// are handed back so the caller can decide whether to synthesize an
    /// ICMP Destination Host Unreachable (§4.5, `NSTACK_IP_SEND_HOSTUNREAC`).
    NotLocal(Ipv4Repr, Vec<u8>),
    /// Consumed by the reassembly engine; nothing to deliver yet.
    Fragment,
    /// A complete datagram, ready for protocol dispatch.
    Complete(Ipv4Repr, Vec<u8>),
}

/// Validate, check local delivery, and reassemble if necessary. Does not
/// dispatch by protocol number — see the module doc comment.
pub fn receive(
    rib: &Rib,
    reassembly: &mut reassembly::Reassembly,
    data: &[u8],
) -> Result<ReceiveOutcome> {
    let packet = Ipv4Packet::new_checked(data)?;
    if packet.total_len() as usize != data.len() {
        return Err(Error::BadMessage);
    }
    let header = Ipv4Repr::parse(&packet)?;
    let payload = packet.payload();

    if rib.find_by_iface(header.dst_addr).is_err() {
        return Ok(ReceiveOutcome::NotLocal(header, payload.to_vec()));
    }

    if header.more_fragments || header.frag_offset != 0 {
        match reassembly.input(&header, payload)? {
            Some((full_header, full_payload)) => {
                Ok(ReceiveOutcome::Complete(full_header, full_payload))
            }
            None => Ok(ReceiveOutcome::Fragment),
        }
    } else {
        Ok(ReceiveOutcome::Complete(header, payload.to_vec()))
    }
}

/// Resolve a destination and either hand the datagram straight to the
/// link (fragmenting if it doesn't fit in one frame), or push it onto the
/// defer queue pending ARP resolution (§4.5 step 2).
#[allow(clippy::too_many_arguments)]
pub fn send(
    rib: &Rib,
    arp_cache: &mut arp::Cache,
    defer: &mut defer::DeferQueue,
    device: &mut dyn LinkDevice,
    local_hw_addr: EthernetAddress,
    ip_id: &mut u16,
    dst: Ipv4Address,
    proto: IpProtocol,
    payload: &[u8],
) -> Result<SendOutcome> {
    let route = rib.find_by_network(dst)?;

    let hw_addr = match arp::get_hardware_addr(device, arp_cache, rib, local_hw_addr, route.iface_addr, dst) {
        Ok(hw) => hw,
        Err(Error::HostUnreachable(_)) => {
            defer.push(dst, proto, payload)?;
            return Ok(SendOutcome::Deferred);
        }
        Err(e) => return Err(e),
    };

    emit(device, local_hw_addr, hw_addr, ip_id, route.iface_addr, dst, proto, payload)?;
    Ok(SendOutcome::Sent)
}

/// Assign a fresh `ip_id` and hand `payload` to the link, fragmenting if it
/// doesn't fit the MTU in one frame. Shared by [`send`] (once ARP resolves
/// up front) and [`drain`] (once a deferred entry's ARP resolves later) so
/// both paths fragment and assign real, monotonically increasing
/// identifiers the same way.
#[allow(clippy::too_many_arguments)]
fn emit(
    device: &mut dyn LinkDevice,
    local_hw_addr: EthernetAddress,
    hw_addr: EthernetAddress,
    ip_id: &mut u16,
    src_addr: Ipv4Address,
    dst: Ipv4Address,
    proto: IpProtocol,
    payload: &[u8],
) -> Result<()> {
    if IPV4_HEADER_LEN + payload.len() > u16::MAX as usize {
        return Err(Error::MessageTooLong);
    }

    let ident = *ip_id;
    *ip_id = ip_id.wrapping_add(1);

    let template = Ipv4Repr {
        src_addr,
        dst_addr: dst,
        protocol: proto,
        payload_len: 0,
        ident,
        dont_fragment: false,
        more_fragments: false,
        frag_offset: 0,
        ttl: IP_TTL_DEFAULT,
    };

    let mtu = device
        .max_frame_len()
        .saturating_sub(ETHERNET_HEADER_LEN);
    let max_payload = mtu.saturating_sub(IPV4_HEADER_LEN);

    if payload.len() <= max_payload {
        let mut header = template;
        header.payload_len = payload.len();
        send_datagram(device, local_hw_addr, hw_addr, &header, payload)
    } else {
        fragment_and_send(device, local_hw_addr, hw_addr, &template, payload, max_payload)
    }
}

/// `round_down_to_8` from §4.5's fragmentation policy: fragment payloads
/// (other than the last) must be a multiple of 8 bytes so `frag_offset`
/// (itself counted in 8-byte units on the wire) stays exact.
fn round_down_to_8(n: usize) -> usize {
    n & !7
}

fn fragment_and_send(
    device: &mut dyn LinkDevice,
    local_hw_addr: EthernetAddress,
    dst_hw_addr: EthernetAddress,
    template: &Ipv4Repr,
    payload: &[u8],
    max_payload: usize,
) -> Result<()> {
    let frag_len = round_down_to_8(max_payload);
    if frag_len == 0 {
        return Err(Error::MessageTooLong);
    }

    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + frag_len).min(payload.len());
        let mut header = *template;
        header.payload_len = end - offset;
        header.more_fragments = end < payload.len();
        header.frag_offset = offset as u16;
        send_datagram(device, local_hw_addr, dst_hw_addr, &header, &payload[offset..end])?;
        offset = end;
    }
    Ok(())
}

/// Drain the defer queue from the head: as long as the head entry's
/// destination now resolves in the ARP cache, send it (fragmenting and
/// assigning a real `ip_id` exactly like [`send`], via [`emit`]) and move
/// to the next one. Stop (leaving the rest queued) at the first entry
/// that's still unresolved, bumping its try count, or drop it outright
/// once its try count exceeds [`config::NSTACK_IP_DEFER_MAX_TRIES`].
///
/// Driven by the periodic tick (§4.6), and opportunistically from ARP
/// receive once a mapping the queue was waiting on appears. Sets
/// [`defer::DeferQueue::set_inhibited`] for the duration of the pass so a
/// fresh `ip::send` miss during drain doesn't recursively re-enter the
/// queue; the guard is cleared on every exit path via the labeled loop
/// below — see `ip/defer.rs`'s doc comment for the bug this avoids.
pub fn drain(
    rib: &Rib,
    arp_cache: &mut arp::Cache,
    defer: &mut defer::DeferQueue,
    device: &mut dyn LinkDevice,
    local_hw_addr: EthernetAddress,
    ip_id: &mut u16,
) {
    if defer.is_inhibited() {
        return;
    }
    defer.set_inhibited(true);

    'drain: loop {
        let entry = match defer.peek() {
            Some(entry) => entry,
            None => break 'drain,
        };
        let dst = entry.dst;
        let proto = entry.proto;
        let tries = entry.tries;

        if tries > crate::config::NSTACK_IP_DEFER_MAX_TRIES {
            log::warn!("ip defer: dropping entry for {dst} after {tries} tries");
            defer.drop_head();
            continue 'drain;
        }

        let route = match rib.find_by_network(dst) {
            Ok(route) => route,
            Err(_) => {
                defer.drop_head();
                continue 'drain;
            }
        };

        match arp::get_hardware_addr(device, arp_cache, rib, local_hw_addr, route.iface_addr, dst) {
            Ok(hw_addr) => {
                let payload = defer.peek().unwrap().payload().to_vec();
                let _ = emit(device, local_hw_addr, hw_addr, ip_id, route.iface_addr, dst, proto, &payload);
                defer.drop_head();
            }
            Err(Error::HostUnreachable(_)) => {
                defer.bump_tries_head();
                break 'drain;
            }
            Err(_) => {
                defer.drop_head();
            }
        }
    }

    defer.set_inhibited(false);
}

fn send_datagram(
    device: &mut dyn LinkDevice,
    local_hw_addr: EthernetAddress,
    dst_hw_addr: EthernetAddress,
    header: &Ipv4Repr,
    payload: &[u8],
) -> Result<()> {
    let total_len = ETHERNET_HEADER_LEN + header.buffer_len();
    let mut buf = vec![0u8; total_len];
    {
        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        frame.set_src_addr(local_hw_addr);
        frame.set_dst_addr(dst_hw_addr);
        frame.set_ethertype(EthernetProtocol::Ipv4);
        let mut packet = Ipv4Packet::new_unchecked(frame.payload_mut());
        header.emit(&mut packet);
        packet.payload_mut().copy_from_slice(payload);
    }
    device.send(&buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::LinkDevice;
    use crate::route::Route;
    use crate::time::Duration;
    use crate::wire::EthernetFrame;
    use std::collections::VecDeque;

    struct FakeDevice {
        hw: EthernetAddress,
        mtu: usize,
        sent: VecDeque<Vec<u8>>,
    }

    impl LinkDevice for FakeDevice {
        fn hardware_addr(&self) -> EthernetAddress {
            self.hw
        }
        fn max_frame_len(&self) -> usize {
            self.mtu
        }
        fn receive(&mut self, _timeout: Option<Duration>, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn send(&mut self, frame: &[u8]) -> Result<usize> {
            self.sent.push_back(frame.to_vec());
            Ok(frame.len())
        }
    }

    fn rib_with_route() -> Rib {
        let mut rib = Rib::new();
        rib.update(Route {
            network: Ipv4Address::new(10, 0, 0, 0),
            netmask: Ipv4Address::new(255, 255, 255, 0),
            gateway: Ipv4Address::new(0, 0, 0, 0),
            iface_addr: Ipv4Address::new(10, 0, 0, 2),
            iface_handle: 0,
        })
        .unwrap();
        rib
    }

    #[test]
    fn send_without_arp_entry_defers() {
        let rib = rib_with_route();
        let mut cache = arp::Cache::new();
        let mut defer = defer::DeferQueue::new();
        let mut device = FakeDevice {
            hw: EthernetAddress([1; 6]),
            mtu: 1514,
            sent: VecDeque::new(),
        };
        let mut ip_id = 0u16;

        let outcome = send(
            &rib,
            &mut cache,
            &mut defer,
            &mut device,
            device_hw(&device),
            &mut ip_id,
            Ipv4Address::new(10, 0, 0, 1),
            IpProtocol::Udp,
            b"hi",
        )
        .unwrap();

        assert_eq!(outcome, SendOutcome::Deferred);
        assert_eq!(defer.len(), 1);
        // The ARP request itself went out.
        assert_eq!(device.sent.len(), 1);
    }

    fn device_hw(device: &FakeDevice) -> EthernetAddress {
        device.hw
    }

    #[test]
    fn send_with_resolved_arp_emits_one_frame() {
        let rib = rib_with_route();
        let mut cache = arp::Cache::new();
        cache
            .insert(Ipv4Address::new(10, 0, 0, 1), EthernetAddress([9; 6]), arp::EntryKind::Dynamic)
            .unwrap();
        let mut defer = defer::DeferQueue::new();
        let mut device = FakeDevice {
            hw: EthernetAddress([1; 6]),
            mtu: 1514,
            sent: VecDeque::new(),
        };
        let mut ip_id = 0u16;

        let outcome = send(
            &rib,
            &mut cache,
            &mut defer,
            &mut device,
            device.hw,
            &mut ip_id,
            Ipv4Address::new(10, 0, 0, 1),
            IpProtocol::Udp,
            b"hello",
        )
        .unwrap();

        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(device.sent.len(), 1);
        let frame = EthernetFrame::new_checked(&device.sent[0][..]).unwrap();
        let packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
        assert_eq!(packet.payload(), b"hello");
    }

    #[test]
    fn large_payload_is_fragmented_on_8_byte_boundaries() {
        let rib = rib_with_route();
        let mut cache = arp::Cache::new();
        cache
            .insert(Ipv4Address::new(10, 0, 0, 1), EthernetAddress([9; 6]), arp::EntryKind::Dynamic)
            .unwrap();
        let mut defer = defer::DeferQueue::new();
        let mut device = FakeDevice {
            hw: EthernetAddress([1; 6]),
            mtu: 1514,
            sent: VecDeque::new(),
        };
        let mut ip_id = 0u16;
        let payload = vec![0xaau8; 3000];

        send(
            &rib,
            &mut cache,
            &mut defer,
            &mut device,
            device.hw,
            &mut ip_id,
            Ipv4Address::new(10, 0, 0, 1),
            IpProtocol::Udp,
            &payload,
        )
        .unwrap();

        assert!(device.sent.len() > 1);
        let mut reassembled = Vec::new();
        let mut pool = reassembly::Reassembly::new();
        for frame_bytes in &device.sent {
            let frame = EthernetFrame::new_checked(&frame_bytes[..]).unwrap();
            let packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
            let header = Ipv4Repr::parse(&packet).unwrap();
            if let Some((_, full)) = pool.input(&header, packet.payload()).unwrap() {
                reassembled = full;
            }
        }
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn not_local_destination_is_reported() {
        let rib = rib_with_route();
        let mut pool = reassembly::Reassembly::new();

        let header = Ipv4Repr {
            src_addr: Ipv4Address::new(10, 0, 0, 1),
            dst_addr: Ipv4Address::new(192, 168, 0, 5),
            protocol: IpProtocol::Udp,
            payload_len: 4,
            ident: 1,
            dont_fragment: false,
            more_fragments: false,
            frag_offset: 0,
            ttl: 64,
        };
        let mut buf = vec![0u8; header.buffer_len()];
        header.emit(&mut Ipv4Packet::new_unchecked(&mut buf[..]));
        buf[IPV4_HEADER_LEN..].copy_from_slice(b"ping");

        match receive(&rib, &mut pool, &buf).unwrap() {
            ReceiveOutcome::NotLocal(h, payload) => {
                assert_eq!(h.dst_addr, Ipv4Address::new(192, 168, 0, 5));
                assert_eq!(payload, b"ping");
            }
            _ => panic!("expected NotLocal"),
        }
    }

    #[test]
    fn drain_sends_once_arp_resolves() {
        let rib = rib_with_route();
        let mut cache = arp::Cache::new();
        let mut queue = defer::DeferQueue::new();
        let mut device = FakeDevice {
            hw: EthernetAddress([1; 6]),
            mtu: 1514,
            sent: VecDeque::new(),
        };
        let mut ip_id = 0u16;

        queue.push(Ipv4Address::new(10, 0, 0, 1), IpProtocol::Udp, b"queued").unwrap();

        drain(&rib, &mut cache, &mut queue, &mut device, device.hw, &mut ip_id);
        assert_eq!(queue.len(), 1, "still unresolved, stays queued");
        assert!(!queue.is_inhibited(), "guard must always clear");

        cache
            .insert(Ipv4Address::new(10, 0, 0, 1), EthernetAddress([9; 6]), arp::EntryKind::Dynamic)
            .unwrap();
        drain(&rib, &mut cache, &mut queue, &mut device, device.hw, &mut ip_id);
        assert!(queue.is_empty());
        assert!(!queue.is_inhibited());
    }

    #[test]
    fn drain_drops_entry_only_after_exceeding_max_tries() {
        let rib = rib_with_route();
        let mut cache = arp::Cache::new();
        let mut queue = defer::DeferQueue::new();
        let mut device = FakeDevice {
            hw: EthernetAddress([1; 6]),
            mtu: 1514,
            sent: VecDeque::new(),
        };
        let mut ip_id = 0u16;

        queue.push(Ipv4Address::new(10, 0, 0, 1), IpProtocol::Udp, b"queued").unwrap();

        // Never resolves. One extra retry is granted past
        // NSTACK_IP_DEFER_MAX_TRIES (tries must *exceed* it to drop, per
        // §3/§4.6), so the entry survives this many passes...
        for _ in 0..=crate::config::NSTACK_IP_DEFER_MAX_TRIES {
            drain(&rib, &mut cache, &mut queue, &mut device, device.hw, &mut ip_id);
            assert!(!queue.is_empty());
        }
        // ...and is dropped on the next one.
        drain(&rib, &mut cache, &mut queue, &mut device, device.hw, &mut ip_id);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_fragments_a_deferred_payload_that_exceeds_the_mtu() {
        let rib = rib_with_route();
        let mut cache = arp::Cache::new();
        let mut queue = defer::DeferQueue::new();
        let mut device = FakeDevice {
            hw: EthernetAddress([1; 6]),
            mtu: 1514,
            sent: VecDeque::new(),
        };
        let mut ip_id = 0u16;

        // 1490 bytes fits the defer queue's ETHER_DATA_LEN bound but not a
        // single frame at this MTU (max_payload is 1480 here).
        let payload = vec![0xbbu8; 1490];
        queue.push(Ipv4Address::new(10, 0, 0, 1), IpProtocol::Udp, &payload).unwrap();
        cache
            .insert(Ipv4Address::new(10, 0, 0, 1), EthernetAddress([9; 6]), arp::EntryKind::Dynamic)
            .unwrap();

        drain(&rib, &mut cache, &mut queue, &mut device, device.hw, &mut ip_id);

        assert!(queue.is_empty());
        assert!(device.sent.len() > 1, "oversized deferred datagram must be fragmented");

        let mut pool = reassembly::Reassembly::new();
        let mut reassembled = Vec::new();
        for frame_bytes in &device.sent {
            let frame = EthernetFrame::new_checked(&frame_bytes[..]).unwrap();
            let packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
            let header = Ipv4Repr::parse(&packet).unwrap();
            if let Some((_, full)) = pool.input(&header, packet.payload()).unwrap() {
                reassembled = full;
            }
        }
        assert_eq!(reassembled, payload);
    }
}
