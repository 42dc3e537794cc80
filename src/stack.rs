//! The daemon's mutable context (§5): one place holding the ARP cache, RIB,
//! fragment pool, defer queue, socket table and TCP connection table that
//! every layer below needed as a process-wide global in the original.
//!
//! Grounded in `nstack.c`'s static globals (`arp_cache`, `ip_rib`,
//! `sockets[]`, the single ingress/egress thread pair) — this struct is
//! what replaces them, threaded explicitly instead of reached for by file
//! scope. `process_frame` is the direct-dispatch match `ethernet`'s module
//! doc comment describes: ARP and IP/ICMP/UDP/TCP each need a different
//! slice of this struct's fields, which is exactly the shape a
//! `Box<dyn FrameHandler>` registry can't hold onto.

use crate::arp;
use crate::config::NSTACK_IP_SEND_HOSTUNREAC;
use crate::error::Result;
use crate::ethernet;
use crate::icmp;
use crate::ip;
use crate::ip::ProtocolHandler;
use crate::phy::LinkDevice;
use crate::route::{Rib, Route};
use crate::socket::{SockAddr, SocketTable};
use crate::tcp;
use crate::time::Instant;
use crate::udp;
use crate::wire::{
    ArpPacket, EthernetAddress, EthernetFrame, EthernetProtocol, Icmpv4DstUnreachable, IpProtocol,
    Ipv4Address,
};

/// Everything the protocol layers share, bundled so `daemon` can own one of
/// these instead of a fistful of loose tables.
pub struct Stack {
    local_hw_addr: EthernetAddress,
    device: Box<dyn LinkDevice + Send>,
    rib: Rib,
    arp_cache: arp::Cache,
    defer: ip::defer::DeferQueue,
    reassembly: ip::reassembly::Reassembly,
    ip_id: u16,
    icmp: icmp::Handler,
    pub sockets: SocketTable,
    pub conns: tcp::ConnTable,
}

impl Stack {
    pub fn new(device: Box<dyn LinkDevice + Send>) -> Stack {
        let local_hw_addr = device.hardware_addr();
        Stack {
            local_hw_addr,
            device,
            rib: Rib::new(),
            arp_cache: arp::Cache::new(),
            defer: ip::defer::DeferQueue::new(),
            reassembly: ip::reassembly::Reassembly::new(),
            ip_id: 0,
            icmp: icmp::Handler,
            sockets: SocketTable::new(),
            conns: tcp::ConnTable::new(),
        }
    }

    pub fn local_hw_addr(&self) -> EthernetAddress {
        self.local_hw_addr
    }

    /// Install a route and announce it with three gratuitous ARPs, matching
    /// `ip_config`'s bring-up sequence.
    pub fn configure_interface(&mut self, route: Route) -> Result<()> {
        self.rib.update(route)?;
        for _ in 0..3 {
            arp::send_gratuitous(&mut *self.device, self.local_hw_addr, route.iface_addr)?;
        }
        Ok(())
    }

    /// Block for up to `timeout` on the link and hand whatever arrives to
    /// [`Stack::process_frame`]. Returns `Ok(())` on a timeout with nothing
    /// to do, matching the ingress worker's per-tick shape in `nstack.c`.
    pub fn poll(&mut self, timeout: Option<crate::time::Duration>, buf: &mut [u8]) -> Result<()> {
        let n = self.device.receive(timeout, buf)?;
        if n == 0 {
            return Ok(());
        }
        self.process_frame(&buf[..n])?;
        Ok(())
    }

    /// Dispatch one inbound Ethernet frame by ethertype (`ether_input`).
    pub fn process_frame(&mut self, data: &[u8]) -> Result<ethernet::Outcome> {
        let frame = EthernetFrame::new_checked(data)?;
        match frame.ethertype() {
            EthernetProtocol::Arp => self.process_arp(&frame),
            EthernetProtocol::Ipv4 => self.process_ipv4(frame.src_addr(), frame.payload()),
            EthernetProtocol::Unknown(_) => Ok(ethernet::Outcome::Unsupported),
        }
    }

    /// `arp_input`: update the cache, then — matching the original's
    /// "check for deferred IP packet transmissions" step, run right after
    /// the cache insert rather than waiting for the next periodic tick —
    /// give the defer queue one drain pass before answering any REQUEST.
    fn process_arp(&mut self, frame: &EthernetFrame<&[u8]>) -> Result<ethernet::Outcome> {
        let outcome = arp::receive(&mut self.arp_cache, &self.rib, self.local_hw_addr, frame)?;

        ip::drain(&self.rib, &mut self.arp_cache, &mut self.defer, &mut *self.device, self.local_hw_addr, &mut self.ip_id);

        match outcome {
            arp::Outcome::Consumed => Ok(ethernet::Outcome::Consumed),
            arp::Outcome::Reply(repr) => {
                let mut arp_buf = vec![0u8; repr.buffer_len()];
                repr.emit(&mut ArpPacket::new_unchecked(&mut arp_buf[..]));
                let framed = ethernet::reply(self.local_hw_addr, frame.src_addr(), EthernetProtocol::Arp, &arp_buf);
                let n = self.device.send(&framed)?;
                Ok(ethernet::Outcome::Reply(n))
            }
        }
    }

    fn process_ipv4(&mut self, src_hw: EthernetAddress, data: &[u8]) -> Result<ethernet::Outcome> {
        let (header, payload) = match ip::receive(&self.rib, &mut self.reassembly, data)? {
            ip::ReceiveOutcome::Fragment => return Ok(ethernet::Outcome::Consumed),
            ip::ReceiveOutcome::Complete(header, payload) => (header, payload),
            ip::ReceiveOutcome::NotLocal(header, payload) => {
                if !NSTACK_IP_SEND_HOSTUNREAC {
                    return Ok(ethernet::Outcome::Consumed);
                }
                let mut out = [0u8; 128];
                let len = icmp::generate_dest_unreachable(
                    &header,
                    &payload,
                    Icmpv4DstUnreachable::HostUnreachable,
                    &mut out,
                )?;
                self.send_ip(header.src_addr, IpProtocol::Icmp, &out[..len])?;
                return Ok(ethernet::Outcome::Reply(len));
            }
        };

        let src_addr = header.src_addr;
        let dst_addr = header.dst_addr;

        let reply = match header.protocol {
            IpProtocol::Icmp => {
                let mut reply_buf = vec![0u8; payload.len().max(128)];
                match self.icmp.receive(src_addr, dst_addr, &payload, &mut reply_buf)? {
                    ip::HandlerOutcome::Consumed => None,
                    ip::HandlerOutcome::Reply(len) => Some((IpProtocol::Icmp, reply_buf[..len].to_vec())),
                }
            }
            IpProtocol::Udp => match udp::receive(&self.sockets, src_addr, dst_addr, &payload)? {
                udp::Outcome::Delivered => None,
                udp::Outcome::PortUnreachable => {
                    if NSTACK_IP_SEND_HOSTUNREAC {
                        let mut out = [0u8; 128];
                        let len = icmp::generate_dest_unreachable(
                            &header,
                            &payload,
                            Icmpv4DstUnreachable::PortUnreachable,
                            &mut out,
                        )?;
                        Some((IpProtocol::Icmp, out[..len].to_vec()))
                    } else {
                        None
                    }
                }
            },
            IpProtocol::Tcp => {
                let isn: u32 = rand::random();
                match tcp::receive(&mut self.conns, &mut self.sockets, src_addr, dst_addr, &payload, Instant::now(), isn)? {
                    tcp::Outcome::Consumed => None,
                    tcp::Outcome::Reply(_dst, bytes) => Some((IpProtocol::Tcp, bytes)),
                }
            }
            IpProtocol::Unknown(_) => None,
        };

        match reply {
            Some((proto, bytes)) => {
                self.send_ip(src_addr, proto, &bytes)?;
                Ok(ethernet::Outcome::Reply(bytes.len()))
            }
            None => Ok(ethernet::Outcome::Consumed),
        }
    }

    /// Hand a complete payload to [`ip::send`], swallowing a successful
    /// defer (the defer queue will retry it once ARP resolves) the same way
    /// the original's `ip_send` swallows `EWOULDBLOCK`.
    fn send_ip(&mut self, dst: Ipv4Address, proto: IpProtocol, payload: &[u8]) -> Result<()> {
        ip::send(
            &self.rib,
            &mut self.arp_cache,
            &mut self.defer,
            &mut *self.device,
            self.local_hw_addr,
            &mut self.ip_id,
            dst,
            proto,
            payload,
        )?;
        Ok(())
    }

    /// One egress pass (`nstack_egress_thread`'s body): for every bound
    /// socket, pop at most one queued datagram and send it. UDP payloads
    /// are framed as-is; TCP payloads are handed to the connection's
    /// outstanding-segment machinery, which may buffer them instead of
    /// sending immediately.
    pub fn drain_egress(&mut self) -> Result<()> {
        for (local, proto, dst, payload) in self.sockets.drain_egress() {
            match proto {
                crate::socket::Proto::Udp => {
                    let datagram = udp::build_datagram(local, dst, &payload)?;
                    self.send_ip(dst.addr, IpProtocol::Udp, &datagram)?;
                }
                crate::socket::Proto::Tcp { remote } => {
                    if let Some((addr, segment)) = tcp::send(&mut self.conns, local, remote, &payload)? {
                        self.send_ip(addr, IpProtocol::Tcp, &segment)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The periodic slow tick (`eval_timer`/`run_periodic_tasks`): age the
    /// ARP cache, retry the defer queue, expire stale fragments and run the
    /// TCP retransmission/2MSL timers.
    pub fn run_periodic_tasks(&mut self) -> Result<()> {
        self.arp_cache.age_tick();
        ip::drain(&self.rib, &mut self.arp_cache, &mut self.defer, &mut *self.device, self.local_hw_addr, &mut self.ip_id);
        self.reassembly.tick(crate::config::NSTACK_PERIODIC_EVENT_SEC as u32);

        for (dst, segment) in tcp::slow_timer_tick(&mut self.conns, &mut self.sockets) {
            self.send_ip(dst, IpProtocol::Tcp, &segment)?;
        }
        Ok(())
    }

    /// Listen for passive TCP opens on `local`, matching a row of the
    /// original's static `sockets[]` table with `SOCK_STREAM` type.
    pub fn listen_tcp(&mut self, local: SockAddr) -> Result<()> {
        self.sockets.listen_tcp(local)
    }

    /// Bind a UDP socket at startup, the other kind of row in that table.
    pub fn bind_udp(&mut self, path: &str, local: SockAddr) -> Result<()> {
        self.sockets.bind_udp(path, local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Duration;
    use crate::wire::{ArpOperation, ArpRepr, EthernetFrame};
    use std::collections::VecDeque;

    struct FakeDevice {
        hw: EthernetAddress,
        sent: VecDeque<Vec<u8>>,
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
            self.sent.push_back(frame.to_vec());
            Ok(frame.len())
        }
    }

    fn new_stack() -> (Stack, EthernetAddress) {
        let hw = EthernetAddress([2; 6]);
        let device = Box::new(FakeDevice { hw, sent: VecDeque::new() });
        (Stack::new(device), hw)
    }

    #[test]
    fn configure_interface_sends_three_gratuitous_arps() {
        let (mut stack, hw) = new_stack();
        stack
            .configure_interface(Route {
                network: Ipv4Address::new(10, 0, 0, 0),
                netmask: Ipv4Address::new(255, 255, 255, 0),
                gateway: Ipv4Address::new(0, 0, 0, 0),
                iface_addr: Ipv4Address::new(10, 0, 0, 2),
                iface_handle: 0,
            })
            .unwrap();

        let device = unsafe { &*(&*stack.device as *const dyn LinkDevice as *const FakeDevice) };
        assert_eq!(device.sent.len(), 3);
        assert_eq!(device.hw, hw);
    }

    #[test]
    fn an_arp_reply_drains_the_matching_deferred_packet_immediately() {
        let (mut stack, hw) = new_stack();
        stack
            .configure_interface(Route {
                network: Ipv4Address::new(10, 0, 0, 0),
                netmask: Ipv4Address::new(255, 255, 255, 0),
                gateway: Ipv4Address::new(0, 0, 0, 0),
                iface_addr: Ipv4Address::new(10, 0, 0, 2),
                iface_handle: 0,
            })
            .unwrap();

        let peer = Ipv4Address::new(10, 0, 0, 9);
        stack.send_ip(peer, IpProtocol::Udp, b"hi").unwrap();
        assert!(stack.defer.len() > 0, "no ARP entry yet, send must defer");

        let frames_before = {
            let device = unsafe { &*(&*stack.device as *const dyn LinkDevice as *const FakeDevice) };
            device.sent.len()
        };

        let peer_mac = EthernetAddress([9; 6]);
        let reply = ArpRepr {
            operation: ArpOperation::Reply,
            source_hardware_addr: peer_mac,
            source_protocol_addr: peer,
            target_hardware_addr: hw,
            target_protocol_addr: Ipv4Address::new(10, 0, 0, 2),
        };
        let mut arp_buf = vec![0u8; reply.buffer_len()];
        reply.emit(&mut ArpPacket::new_unchecked(&mut arp_buf[..]));
        let framed = ethernet::reply(peer_mac, hw, EthernetProtocol::Arp, &arp_buf);

        let outcome = stack.process_frame(&framed).unwrap();
        assert!(matches!(outcome, ethernet::Outcome::Consumed));

        assert!(stack.defer.is_empty(), "drain must run synchronously on ARP receive");
        let device = unsafe { &*(&*stack.device as *const dyn LinkDevice as *const FakeDevice) };
        assert!(device.sent.len() > frames_before, "the deferred UDP datagram must have gone out");
    }

    #[test]
    fn arp_request_for_local_address_gets_answered() {
        let (mut stack, hw) = new_stack();
        stack
            .configure_interface(Route {
                network: Ipv4Address::new(10, 0, 0, 0),
                netmask: Ipv4Address::new(255, 255, 255, 0),
                gateway: Ipv4Address::new(0, 0, 0, 0),
                iface_addr: Ipv4Address::new(10, 0, 0, 2),
                iface_handle: 0,
            })
            .unwrap();

        let request = ArpRepr {
            operation: ArpOperation::Request,
            source_hardware_addr: EthernetAddress([9; 6]),
            source_protocol_addr: Ipv4Address::new(10, 0, 0, 9),
            target_hardware_addr: EthernetAddress([0; 6]),
            target_protocol_addr: Ipv4Address::new(10, 0, 0, 2),
        };
        let mut arp_buf = vec![0u8; request.buffer_len()];
        request.emit(&mut ArpPacket::new_unchecked(&mut arp_buf[..]));
        let framed = ethernet::reply(EthernetAddress([9; 6]), hw, EthernetProtocol::Arp, &arp_buf);

        let outcome = stack.process_frame(&framed).unwrap();
        assert!(matches!(outcome, ethernet::Outcome::Reply(_)));
    }
}
