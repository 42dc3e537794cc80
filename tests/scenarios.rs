//! End-to-end scenarios driving a [`nstack::stack::Stack`] (or the bare
//! `ip`/`arp` functions it's built from) the way a real frame, or a real
//! client over the shared-memory socket API, would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use nstack::arp;
use nstack::error::Result;
use nstack::ip;
use nstack::phy::LinkDevice;
use nstack::route::{Rib, Route};
use nstack::socket::{client, SockAddr};
use nstack::stack::Stack;
use nstack::time::Duration;
use nstack::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol, IpProtocol,
    Ipv4Address, Ipv4Packet, Ipv4Repr, TcpControl, TcpPacket, TcpRepr, UdpPacket, UdpRepr,
};

const LOCAL_MAC: EthernetAddress = EthernetAddress([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x02]);
const PEER_MAC: EthernetAddress = EthernetAddress([0xbb, 0xbb, 0xbb, 0xbb, 0xbb, 0x01]);
const LOCAL_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
const PEER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);

/// A [`LinkDevice`] that remembers every frame handed to `send` in a shared
/// queue a test can inspect after the fact, since `Stack` owns its device
/// by value and hands out no accessor for it.
struct FakeDevice {
    hw: EthernetAddress,
    sent: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl LinkDevice for FakeDevice {
    fn hardware_addr(&self) -> EthernetAddress {
        self.hw
    }
    fn max_frame_len(&self) -> usize {
        1514
    }
    fn receive(&mut self, _timeout: Option<Duration>, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }
    fn send(&mut self, frame: &[u8]) -> Result<usize> {
        self.sent.lock().unwrap().push_back(frame.to_vec());
        Ok(frame.len())
    }
}

fn local_route() -> Route {
    Route {
        network: Ipv4Address::new(10, 0, 0, 0),
        netmask: Ipv4Address::new(255, 255, 255, 0),
        gateway: Ipv4Address::new(0, 0, 0, 0),
        iface_addr: LOCAL_IP,
        iface_handle: 0,
    }
}

/// Stand up a [`Stack`] with the interface configured and a handle to its
/// device's captured outbound frames.
fn new_stack() -> (Stack, Arc<Mutex<VecDeque<Vec<u8>>>>) {
    let sent = Arc::new(Mutex::new(VecDeque::new()));
    let device = Box::new(FakeDevice {
        hw: LOCAL_MAC,
        sent: Arc::clone(&sent),
    });
    let mut stack = Stack::new(device);
    stack.configure_interface(local_route()).unwrap();
    sent.lock().unwrap().clear(); // drop the three gratuitous ARPs
    (stack, sent)
}

fn ipv4_frame(src_hw: EthernetAddress, dst_hw: EthernetAddress, header: Ipv4Repr, payload: &[u8]) -> Vec<u8> {
    let mut header = header;
    header.payload_len = payload.len();
    let mut buf = vec![0u8; header.buffer_len()];
    let mut packet = Ipv4Packet::new_unchecked(&mut buf[..]);
    header.emit(&mut packet);
    packet.payload_mut().copy_from_slice(payload);
    ethernet::reply_frame(src_hw, dst_hw, EthernetProtocol::Ipv4, &buf)
}

/// A thin wrapper so this file reads `ethernet::reply_frame` instead of
/// the crate's `ethernet::reply`, which is named for its one caller inside
/// the stack (a reply back to a frame's own sender) but is equally good at
/// building the *inbound* test frames this file needs.
mod ethernet {
    use nstack::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

    pub fn reply_frame(src: EthernetAddress, dst: EthernetAddress, ethertype: EthernetProtocol, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; EthernetFrame::<&[u8]>::header_len() + payload.len()];
        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        frame.set_src_addr(src);
        frame.set_dst_addr(dst);
        frame.set_ethertype(ethertype);
        frame.payload_mut().copy_from_slice(payload);
        buf
    }
}

fn udp_header() -> Ipv4Repr {
    Ipv4Repr {
        src_addr: PEER_IP,
        dst_addr: LOCAL_IP,
        protocol: IpProtocol::Udp,
        payload_len: 0,
        ident: 1,
        dont_fragment: false,
        more_fragments: false,
        frag_offset: 0,
        ttl: 64,
    }
}

fn udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let repr = UdpRepr { src_port, dst_port };
    let mut buf = vec![0u8; repr.header_len() + payload.len()];
    let mut packet = UdpPacket::new_unchecked(&mut buf[..]);
    repr.emit(&mut packet, PEER_IP, LOCAL_IP, payload.len(), |buf| buf.copy_from_slice(payload));
    buf
}

fn tcp_segment(
    src_port: u16,
    dst_port: u16,
    control: TcpControl,
    seq: u32,
    ack: Option<u32>,
    src: Ipv4Address,
    dst: Ipv4Address,
) -> Vec<u8> {
    let repr = TcpRepr {
        src_port,
        dst_port,
        control,
        seq_number: seq,
        ack_number: ack,
        window_len: 4096,
        max_seg_size: Some(1460),
        payload_len: 0,
    };
    let mut buf = vec![0u8; repr.buffer_len()];
    let mut packet = TcpPacket::new_unchecked(&mut buf[..]);
    repr.emit(&mut packet, src, dst, |_| {});
    buf
}

fn last_frame(sent: &Arc<Mutex<VecDeque<Vec<u8>>>>) -> Vec<u8> {
    sent.lock().unwrap().pop_back().expect("a frame was sent")
}

#[test]
fn arp_request_for_the_interface_address_gets_a_reply() {
    let (mut stack, sent) = new_stack();

    let request = ArpRepr {
        operation: ArpOperation::Request,
        source_hardware_addr: PEER_MAC,
        source_protocol_addr: PEER_IP,
        target_hardware_addr: EthernetAddress([0; 6]),
        target_protocol_addr: LOCAL_IP,
    };
    let mut arp_buf = vec![0u8; request.buffer_len()];
    request.emit(&mut ArpPacket::new_unchecked(&mut arp_buf[..]));
    let framed = ethernet::reply_frame(PEER_MAC, LOCAL_MAC, EthernetProtocol::Arp, &arp_buf);

    let outcome = stack.process_frame(&framed).unwrap();
    assert!(matches!(outcome, nstack::ethernet::Outcome::Reply(_)));

    let frame = EthernetFrame::new_checked(last_frame(&sent)).unwrap();
    assert_eq!(frame.src_addr(), LOCAL_MAC);
    assert_eq!(frame.dst_addr(), PEER_MAC);
    let reply = ArpRepr::parse(&ArpPacket::new_checked(frame.payload()).unwrap()).unwrap();
    assert_eq!(reply.operation, ArpOperation::Reply);
    assert_eq!(reply.source_hardware_addr, LOCAL_MAC);
    assert_eq!(reply.source_protocol_addr, LOCAL_IP);
    assert_eq!(reply.target_hardware_addr, PEER_MAC);
    assert_eq!(reply.target_protocol_addr, PEER_IP);
}

/// Seeds the stack's ARP cache the same way a real request/reply exchange
/// would, so the UDP scenarios don't depend on the ARP one having run
/// first and don't need a route into the cache's private fields.
fn warm_up_arp(stack: &mut Stack) {
    let request = ArpRepr {
        operation: ArpOperation::Request,
        source_hardware_addr: PEER_MAC,
        source_protocol_addr: PEER_IP,
        target_hardware_addr: EthernetAddress([0; 6]),
        target_protocol_addr: LOCAL_IP,
    };
    let mut arp_buf = vec![0u8; request.buffer_len()];
    request.emit(&mut ArpPacket::new_unchecked(&mut arp_buf[..]));
    let framed = ethernet::reply_frame(PEER_MAC, LOCAL_MAC, EthernetProtocol::Arp, &arp_buf);
    stack.process_frame(&framed).unwrap();
}

#[test]
fn udp_datagram_arriving_for_a_bound_socket_reaches_the_client() {
    let (mut stack, _sent) = new_stack();
    warm_up_arp(&mut stack);

    let path = format!("/tmp/nstack-scenario-udp-in-{}", std::process::id());
    let local = SockAddr { addr: LOCAL_IP, port: 10 };
    stack.bind_udp(&path, local).unwrap();
    let sock = client::listen(&path).unwrap();

    let datagram = udp_datagram(1000, 10, b"foo");
    let frame = ipv4_frame(PEER_MAC, LOCAL_MAC, udp_header(), &datagram);
    let outcome = stack.process_frame(&frame).unwrap();
    assert!(matches!(outcome, nstack::ethernet::Outcome::Consumed));

    let mut buf = [0u8; 32];
    let (n, src) = sock.recv_from(&mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"foo");
    assert_eq!(src, SockAddr { addr: PEER_IP, port: 1000 });

    std::fs::remove_file(&path).ok();
}

#[test]
fn datagram_sent_by_the_client_goes_out_as_an_ip_udp_frame() {
    let (mut stack, sent) = new_stack();
    warm_up_arp(&mut stack);

    let path = format!("/tmp/nstack-scenario-udp-out-{}", std::process::id());
    let local = SockAddr { addr: LOCAL_IP, port: 10 };
    stack.bind_udp(&path, local).unwrap();
    let sock = client::listen(&path).unwrap();

    sock.send_to(b"bar", SockAddr { addr: PEER_IP, port: 1000 }).unwrap();
    stack.drain_egress().unwrap();

    let frame = EthernetFrame::new_checked(last_frame(&sent)).unwrap();
    assert_eq!(frame.ethertype(), EthernetProtocol::Ipv4);
    let ip_packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
    let ip_header = Ipv4Repr::parse(&ip_packet).unwrap();
    assert_eq!(ip_header.src_addr, LOCAL_IP);
    assert_eq!(ip_header.dst_addr, PEER_IP);
    assert_eq!(ip_header.protocol, IpProtocol::Udp);

    let udp_packet = UdpPacket::new_checked(ip_packet.payload()).unwrap();
    assert_eq!(udp_packet.src_port(), 10);
    assert_eq!(udp_packet.dst_port(), 1000);
    assert_eq!(udp_packet.payload(), b"bar");
    assert!(udp_packet.verify_checksum(LOCAL_IP, PEER_IP));

    std::fs::remove_file(&path).ok();
}

#[test]
fn a_payload_too_big_for_one_frame_is_sent_as_three_fragments() {
    let mut rib = Rib::new();
    rib.update(local_route()).unwrap();
    let mut arp_cache = arp::Cache::new();
    arp_cache.insert(PEER_IP, PEER_MAC, arp::EntryKind::Static).unwrap();
    let mut defer = ip::defer::DeferQueue::new();
    let sent = Arc::new(Mutex::new(VecDeque::new()));
    let mut device = FakeDevice { hw: LOCAL_MAC, sent: Arc::clone(&sent) };
    let mut ip_id = 7u16;

    let payload: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
    let outcome = ip::send(
        &rib,
        &mut arp_cache,
        &mut defer,
        &mut device,
        LOCAL_MAC,
        &mut ip_id,
        PEER_IP,
        IpProtocol::Udp,
        &payload,
    )
    .unwrap();
    assert_eq!(outcome, ip::SendOutcome::Sent);

    let frames: Vec<Vec<u8>> = sent.lock().unwrap().drain(..).collect();
    assert_eq!(frames.len(), 3);

    let mut reassembled = Vec::new();
    let mut offsets = Vec::new();
    let mut more_flags = Vec::new();
    for raw in &frames {
        let eth = EthernetFrame::new_checked(raw.as_slice()).unwrap();
        let packet = Ipv4Packet::new_checked(eth.payload()).unwrap();
        let header = Ipv4Repr::parse(&packet).unwrap();
        assert_eq!(header.ident, 7);
        assert_eq!(header.protocol, IpProtocol::Udp);
        offsets.push(header.frag_offset);
        more_flags.push(header.more_fragments);
        reassembled.extend_from_slice(packet.payload());
    }
    assert_eq!(offsets, vec![0, 1480, 2960]);
    assert_eq!(more_flags, vec![true, true, false]);
    assert_eq!(reassembled, payload);
}

#[test]
fn a_passive_tcp_open_reaches_established() {
    let (mut stack, sent) = new_stack();
    let local = SockAddr { addr: LOCAL_IP, port: 80 };
    let remote = SockAddr { addr: PEER_IP, port: 1234 };
    stack.listen_tcp(local).unwrap();

    let syn = tcp_segment(remote.port, local.port, TcpControl::Syn, 100, None, PEER_IP, LOCAL_IP);
    let header = Ipv4Repr { protocol: IpProtocol::Tcp, ..udp_header() };
    let frame = ipv4_frame(PEER_MAC, LOCAL_MAC, header, &syn);
    let outcome = stack.process_frame(&frame).unwrap();
    assert!(matches!(outcome, nstack::ethernet::Outcome::Reply(_)));

    let reply_eth = EthernetFrame::new_checked(last_frame(&sent)).unwrap();
    let reply_ip = Ipv4Packet::new_checked(reply_eth.payload()).unwrap();
    let reply_tcp = TcpPacket::new_checked(reply_ip.payload()).unwrap();
    let reply_repr = TcpRepr::parse(&reply_tcp, LOCAL_IP, PEER_IP).unwrap();
    assert_eq!(reply_repr.control, TcpControl::Syn);
    assert_eq!(reply_repr.ack_number, Some(101));
    let server_iss = reply_repr.seq_number;

    assert_eq!(stack.conns.get(local, remote).unwrap().state, nstack::tcp::State::SynRcvd);

    let ack = tcp_segment(
        remote.port,
        local.port,
        TcpControl::None,
        101,
        Some(server_iss.wrapping_add(1)),
        PEER_IP,
        LOCAL_IP,
    );
    let header = Ipv4Repr { protocol: IpProtocol::Tcp, ..udp_header() };
    let frame = ipv4_frame(PEER_MAC, LOCAL_MAC, header, &ack);
    let outcome = stack.process_frame(&frame).unwrap();
    assert!(matches!(outcome, nstack::ethernet::Outcome::Consumed));

    assert_eq!(stack.conns.get(local, remote).unwrap().state, nstack::tcp::State::Established);
}

#[test]
fn a_syn_to_an_unbound_tcp_port_gets_reset() {
    let (mut stack, sent) = new_stack();
    let local = SockAddr { addr: LOCAL_IP, port: 99 };
    let remote = SockAddr { addr: PEER_IP, port: 2000 };

    let syn = tcp_segment(remote.port, local.port, TcpControl::Syn, 500, None, PEER_IP, LOCAL_IP);
    let header = Ipv4Repr { protocol: IpProtocol::Tcp, ..udp_header() };
    let frame = ipv4_frame(PEER_MAC, LOCAL_MAC, header, &syn);
    let outcome = stack.process_frame(&frame).unwrap();
    assert!(matches!(outcome, nstack::ethernet::Outcome::Reply(_)));

    let reply_eth = EthernetFrame::new_checked(last_frame(&sent)).unwrap();
    let reply_ip = Ipv4Packet::new_checked(reply_eth.payload()).unwrap();
    let reply_tcp = TcpPacket::new_checked(reply_ip.payload()).unwrap();
    let reply_repr = TcpRepr::parse(&reply_tcp, LOCAL_IP, PEER_IP).unwrap();
    assert_eq!(reply_repr.control, TcpControl::Rst);
    assert_eq!(reply_repr.ack_number, Some(501));

    assert!(stack.conns.get(local, remote).is_none());
}
