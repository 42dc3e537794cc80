//! TCP (§4.9): a pragmatic subset of RFC 793 sitting on top of the
//! datagram socket table.
//!
//! Grounded in `tcp.c`/`tcp.h`, with one deliberate departure: the original
//! `tcp_fsm` is a crude, timer-less switch (`LISTEN` only ever produces a
//! `SYN_RCVD`, `nstack_tcp_send` is a stub returning `-1`), but `tcp.h`
//! already declares the full 4.3BSD timer-index and Jacobson/Karn RTT
//! constants (`TCP_RTT_SHIFT`, `TCP_TV_REXMTMAX`, the four `TCP_T_*` timer
//! slots) without ever wiring them up. This module wires them up: real
//! retransmission, backoff and a 2MSL `TimeWait`, built the way the
//! constants were clearly meant to be used. `State`'s variant order matches
//! `enum tcp_state` exactly so the two stay easy to compare side by side.
//!
//! The original has no application-initiated `close()` over the datagram
//! socket API (data only ever flows as already-connected datagrams,
//! §4.10), so there is no trigger for an active close here either: a
//! passively-accepted connection runs until the peer sends a `FIN`, at
//! which point `CloseWait` is a momentary state rather than something an
//! application program extends — once any data queued before the `FIN`
//! has drained, the connection answers with its own `FIN` and moves to
//! `LastAck`. This is this module's resolution of that open question.

use std::collections::{HashMap, VecDeque};

use crate::config::{
    TCP_DEFAULT_MSS, TCP_MAXRXTSHIFT, TCP_RTTVAR_SHIFT, TCP_RTT_SHIFT, TCP_TV_2MSL, TCP_TV_MIN,
    TCP_TV_REXMTMAX, TCP_TV_SRTTBASE, TCP_TV_SRTTDFLT,
};
use crate::error::{Error, Result};
use crate::socket::{SockAddr, SocketTable};
use crate::time::Instant;
use crate::wire::{Ipv4Address, TcpControl, TcpPacket, TcpRepr};

/// `enum tcp_state` in the original. `Closed` and `Listen` are never the
/// state of a live [`Tcb`] — a closed connection has no entry in
/// [`ConnTable`], and a listening address is tracked separately by
/// [`SocketTable::is_tcp_listening`] rather than by a `Tcb`. They're kept
/// here so this enum still lines up with the original one variant for
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynRcvd,
    SynSent,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// `TCP_T_REXMT`/`_PERSIST`/`_KEEP`/`_2MSL` in the original: four
/// independent per-connection timers, each either armed with a tick count
/// or idle.
mod timer {
    pub const REXMT: usize = 0;
    pub const PERSIST: usize = 1;
    pub const KEEP: usize = 2;
    pub const TWOMSL: usize = 3;
    pub const COUNT: usize = 4;
}

/// One outstanding (unacknowledged) segment: a control segment (SYN/FIN)
/// carries no payload, a data segment carries one chunk of `unsent`.
#[derive(Debug, Clone)]
struct Pending {
    seq: u32,
    control: TcpControl,
    payload: Vec<u8>,
    /// Set when this is the first, non-retransmitted send of `seq`, so its
    /// round trip can be timed (Karn's rule: a retransmitted segment's ack
    /// is ambiguous about which transmission it answers, so it must not
    /// produce an RTT sample).
    timed_at: Option<Instant>,
}

impl Pending {
    fn len(&self) -> u32 {
        self.control.len() as u32 + self.payload.len() as u32
    }
}

/// A single connection's control block (`struct tcp_conn_tcb`).
#[derive(Debug)]
pub struct Tcb {
    pub local: SockAddr,
    pub remote: SockAddr,
    pub state: State,

    send_una: u32,
    send_nxt: u32,
    send_wnd: u16,
    iss: u32,

    rcv_nxt: u32,
    rcv_wnd: u16,
    irs: u32,

    mss: u16,

    rtt_est: i32,
    rtt_var: i32,
    rto: u32,
    backoff: u32,

    timers: [Option<u32>; timer::COUNT],

    unsent: VecDeque<u8>,
    unacked: Option<Pending>,

    /// Whether [`SocketTable::bind_tcp`] has created this connection's
    /// shared-memory region yet (done once, on entering `Established`).
    bound: bool,
}

impl Tcb {
    fn rexmtval(&self) -> u32 {
        let val = (self.rtt_est >> TCP_RTT_SHIFT) + self.rtt_var;
        (val.max(0) as u32).clamp(TCP_TV_MIN, TCP_TV_REXMTMAX)
    }

    fn arm_rexmt(&mut self) {
        self.timers[timer::REXMT] = Some(self.rto);
    }

    fn sample_rtt(&mut self, ticks: i32) {
        if self.rtt_est != TCP_TV_SRTTBASE {
            let delta = ticks - (self.rtt_est >> TCP_RTT_SHIFT);
            self.rtt_est += delta;
            let delta = delta.abs() - (self.rtt_var >> TCP_RTTVAR_SHIFT);
            self.rtt_var += delta;
        } else {
            self.rtt_est = ticks << TCP_RTT_SHIFT;
            self.rtt_var = ticks << 1;
        }
        self.backoff = 0;
        self.rto = self.rexmtval();
    }
}

/// `ConnKey` doubles as the original's RB-tree key: both endpoints, since a
/// listening local address can be shared by many simultaneous connections.
pub type ConnKey = (SockAddr, SockAddr);

/// The daemon's live connections (the original's RB-tree of
/// `tcp_conn_tcb`s).
#[derive(Default)]
pub struct ConnTable {
    conns: HashMap<ConnKey, Tcb>,
}

impl ConnTable {
    pub fn new() -> ConnTable {
        ConnTable { conns: HashMap::new() }
    }

    pub fn get(&self, local: SockAddr, remote: SockAddr) -> Option<&Tcb> {
        self.conns.get(&(local, remote))
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }
}

/// Outcome of handing an inbound segment, or a timer tick, to this module.
#[derive(Debug)]
pub enum Outcome {
    /// A segment is ready to send to `Ipv4Address`.
    Reply(Ipv4Address, Vec<u8>),
    Consumed,
}

fn shmem_path(local: SockAddr, remote: SockAddr) -> String {
    format!(
        "/tmp/nstack-tcp-{}-{}-{}-{}.sock",
        local.addr, local.port, remote.addr, remote.port
    )
}

fn build_segment(
    local: SockAddr,
    remote: SockAddr,
    control: TcpControl,
    seq: u32,
    ack: Option<u32>,
    window_len: u16,
    max_seg_size: Option<u16>,
    payload: &[u8],
) -> Vec<u8> {
    let repr = TcpRepr {
        src_port: local.port,
        dst_port: remote.port,
        control,
        seq_number: seq,
        ack_number: ack,
        window_len,
        max_seg_size,
        payload_len: payload.len(),
    };
    let mut buf = vec![0u8; repr.buffer_len()];
    let mut packet = TcpPacket::new_unchecked(&mut buf[..]);
    repr.emit(&mut packet, local.addr, remote.addr, |buf| buf.copy_from_slice(payload));
    buf
}

fn reset_for(local: SockAddr, remote: SockAddr, repr: &TcpRepr) -> Vec<u8> {
    let seq = repr.ack_number.unwrap_or(0);
    let ack = Some(repr.seq_number.wrapping_add(repr.control.len() as u32 + repr.payload_len as u32));
    build_segment(local, remote, TcpControl::Rst, seq, ack, 0, None, &[])
}

/// Handle one inbound TCP segment addressed to a local interface.
pub fn receive(
    conns: &mut ConnTable,
    sockets: &mut SocketTable,
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    data: &[u8],
    now: Instant,
    isn: u32,
) -> Result<Outcome> {
    let packet = TcpPacket::new_checked(data)?;
    let repr = TcpRepr::parse(&packet, src_addr, dst_addr)?;

    let local = SockAddr { addr: dst_addr, port: repr.dst_port };
    let remote = SockAddr { addr: src_addr, port: repr.src_port };
    let key = (local, remote);

    if !conns.conns.contains_key(&key) {
        if repr.control == TcpControl::Syn && sockets.is_tcp_listening(local) {
            let tcb = Tcb {
                local,
                remote,
                state: State::SynRcvd,
                send_una: isn,
                send_nxt: isn.wrapping_add(1),
                send_wnd: repr.window_len,
                iss: isn,
                rcv_nxt: repr.seq_number.wrapping_add(1),
                rcv_wnd: crate::config::NSTACK_DATAGRAM_BUF_SIZE as u16,
                irs: repr.seq_number,
                mss: repr.max_seg_size.unwrap_or(TCP_DEFAULT_MSS).min(TCP_DEFAULT_MSS),
                rtt_est: TCP_TV_SRTTBASE,
                rtt_var: (TCP_TV_SRTTDFLT as i32) << (TCP_RTTVAR_SHIFT - 1),
                rto: TCP_TV_SRTTDFLT as u32,
                backoff: 0,
                timers: [None; timer::COUNT],
                unsent: VecDeque::new(),
                unacked: None,
                bound: false,
            };
            let seg = build_segment(
                local,
                remote,
                TcpControl::Syn,
                tcb.iss,
                Some(tcb.rcv_nxt),
                tcb.rcv_wnd,
                Some(tcb.mss),
                &[],
            );
            let mut tcb = tcb;
            tcb.unacked = Some(Pending {
                seq: tcb.iss,
                control: TcpControl::Syn,
                payload: Vec::new(),
                timed_at: Some(now),
            });
            tcb.arm_rexmt();
            conns.conns.insert(key, tcb);
            return Ok(Outcome::Reply(remote.addr, seg));
        }

        if repr.control == TcpControl::Rst {
            return Ok(Outcome::Consumed);
        }
        return Ok(Outcome::Reply(remote.addr, reset_for(local, remote, &repr)));
    }

    let tcb = conns.conns.get_mut(&key).expect("checked above");

    if repr.control == TcpControl::Rst {
        conns.conns.remove(&key);
        sockets.remove_tcp(local, remote);
        return Ok(Outcome::Consumed);
    }

    let outcome = step(tcb, sockets, &repr, packet.payload(), now);

    // A connection that has run its course is dropped from the table; the
    // matching shared-memory socket (if one was ever bound) goes with it.
    if matches!(tcb.state, State::Closed) {
        conns.conns.remove(&key);
        sockets.remove_tcp(local, remote);
    }

    outcome
}

/// Apply one inbound segment to a connection already past the handshake's
/// first leg, per `tcp_fsm`'s switch, with the timer/RTT bookkeeping the
/// original never added.
fn step(tcb: &mut Tcb, sockets: &mut SocketTable, repr: &TcpRepr, payload: &[u8], now: Instant) -> Result<Outcome> {
    // Advance send_una / RTT sample / retransmit timer on any ack that
    // covers our last outstanding segment.
    if let Some(ack) = repr.ack_number {
        if ack.wrapping_sub(tcb.send_una) as i32 > 0 || ack == tcb.send_nxt {
            tcb.send_una = ack;
            if let Some(pending) = &tcb.unacked {
                if ack == pending.seq.wrapping_add(pending.len()) {
                    if let Some(sent_at) = pending.timed_at {
                        let ticks = (now - sent_at).total_millis() as i32
                            / crate::config::TCP_SLOW_TICK_MS as i32;
                        tcb.sample_rtt(ticks.max(1));
                    }
                    tcb.unacked = None;
                    tcb.timers[timer::REXMT] = None;
                }
            }
        }
        tcb.send_wnd = repr.window_len;
    }

    match tcb.state {
        State::SynRcvd => {
            if repr.ack_number == Some(tcb.send_nxt) {
                tcb.state = State::Established;
                sockets.bind_tcp(&shmem_path(tcb.local, tcb.remote), tcb.local, tcb.remote)?;
                tcb.bound = true;
                if !payload.is_empty() && repr.seq_number == tcb.rcv_nxt {
                    sockets.deliver_tcp(tcb.local, tcb.remote, payload)?;
                    tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(payload.len() as u32);
                    let ack = build_segment(tcb.local, tcb.remote, TcpControl::None, tcb.send_nxt, Some(tcb.rcv_nxt), tcb.rcv_wnd, None, &[]);
                    return Ok(Outcome::Reply(tcb.remote.addr, ack));
                }
                return Ok(Outcome::Consumed);
            }
            // Not yet acking our SYN-ACK; let the retransmit timer resend it.
            Ok(Outcome::Consumed)
        }

        State::Established => {
            if repr.control == TcpControl::Fin {
                tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(1);
                tcb.state = State::CloseWait;
                return close_wait_advance(tcb);
            }
            if !payload.is_empty() && repr.seq_number == tcb.rcv_nxt {
                sockets.deliver_tcp(tcb.local, tcb.remote, payload)?;
                tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(payload.len() as u32);
                let ack = build_segment(tcb.local, tcb.remote, TcpControl::None, tcb.send_nxt, Some(tcb.rcv_nxt), tcb.rcv_wnd, None, &[]);
                return Ok(Outcome::Reply(tcb.remote.addr, ack));
            }
            Ok(Outcome::Consumed)
        }

        State::FinWait1 => {
            let our_fin_acked = repr.ack_number == Some(tcb.send_nxt);
            if repr.control == TcpControl::Fin {
                tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(1);
                tcb.state = if our_fin_acked { State::TimeWait } else { State::Closing };
                if tcb.state == State::TimeWait {
                    tcb.timers[timer::TWOMSL] = Some(TCP_TV_2MSL);
                }
                let ack = build_segment(tcb.local, tcb.remote, TcpControl::None, tcb.send_nxt, Some(tcb.rcv_nxt), tcb.rcv_wnd, None, &[]);
                return Ok(Outcome::Reply(tcb.remote.addr, ack));
            }
            if our_fin_acked {
                tcb.state = State::FinWait2;
            }
            Ok(Outcome::Consumed)
        }

        State::FinWait2 => {
            if repr.control == TcpControl::Fin {
                tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(1);
                tcb.state = State::TimeWait;
                tcb.timers[timer::TWOMSL] = Some(TCP_TV_2MSL);
                let ack = build_segment(tcb.local, tcb.remote, TcpControl::None, tcb.send_nxt, Some(tcb.rcv_nxt), tcb.rcv_wnd, None, &[]);
                return Ok(Outcome::Reply(tcb.remote.addr, ack));
            }
            Ok(Outcome::Consumed)
        }

        State::Closing => {
            if repr.ack_number == Some(tcb.send_nxt) {
                tcb.state = State::TimeWait;
                tcb.timers[timer::TWOMSL] = Some(TCP_TV_2MSL);
            }
            Ok(Outcome::Consumed)
        }

        State::LastAck => {
            if repr.ack_number == Some(tcb.send_nxt) {
                tcb.state = State::Closed;
            }
            Ok(Outcome::Consumed)
        }

        State::TimeWait => {
            // A retransmitted FIN after we've already acked it; restart the
            // 2MSL clock and re-ack, per RFC 793.
            tcb.timers[timer::TWOMSL] = Some(TCP_TV_2MSL);
            let ack = build_segment(tcb.local, tcb.remote, TcpControl::None, tcb.send_nxt, Some(tcb.rcv_nxt), tcb.rcv_wnd, None, &[]);
            Ok(Outcome::Reply(tcb.remote.addr, ack))
        }

        State::Closed | State::Listen | State::SynSent => Ok(Outcome::Consumed),
    }
}

/// `CloseWait` is momentary here (see the module doc comment): once there's
/// no application data left to drain, answer with our own `FIN`.
fn close_wait_advance(tcb: &mut Tcb) -> Result<Outcome> {
    if !tcb.unsent.is_empty() || tcb.unacked.is_some() {
        return Ok(Outcome::Consumed);
    }
    let seg = build_segment(tcb.local, tcb.remote, TcpControl::Fin, tcb.send_nxt, Some(tcb.rcv_nxt), tcb.rcv_wnd, None, &[]);
    tcb.unacked = Some(Pending {
        seq: tcb.send_nxt,
        control: TcpControl::Fin,
        payload: Vec::new(),
        timed_at: None,
    });
    tcb.send_nxt = tcb.send_nxt.wrapping_add(1);
    tcb.state = State::LastAck;
    tcb.arm_rexmt();
    Ok(Outcome::Reply(tcb.remote.addr, seg))
}

/// Queue application data (from the egress ring) for an established
/// connection, sending it immediately if nothing else is outstanding.
pub fn send(conns: &mut ConnTable, local: SockAddr, remote: SockAddr, payload: &[u8]) -> Result<Option<(Ipv4Address, Vec<u8>)>> {
    let tcb = conns
        .conns
        .get_mut(&(local, remote))
        .filter(|t| t.state == State::Established)
        .ok_or(Error::InvalidState)?;

    tcb.unsent.extend(payload.iter().copied());
    Ok(flush_one(tcb))
}

/// Pop the connection's retransmit timer's worth of unsent bytes into a new
/// outstanding segment, if none is already in flight.
fn flush_one(tcb: &mut Tcb) -> Option<(Ipv4Address, Vec<u8>)> {
    if tcb.unacked.is_some() || tcb.unsent.is_empty() {
        return None;
    }
    let chunk_len = tcb.unsent.len().min(tcb.mss as usize).min(tcb.send_wnd as usize).max(1);
    let chunk: Vec<u8> = tcb.unsent.drain(..chunk_len).collect();
    let seq = tcb.send_nxt;
    let seg = build_segment(tcb.local, tcb.remote, TcpControl::None, seq, Some(tcb.rcv_nxt), tcb.rcv_wnd, None, &chunk);
    tcb.send_nxt = tcb.send_nxt.wrapping_add(chunk.len() as u32);
    tcb.unacked = Some(Pending {
        seq,
        control: TcpControl::None,
        payload: chunk,
        timed_at: Some(Instant::now()),
    });
    tcb.arm_rexmt();
    Some((tcb.remote.addr, seg))
}

/// The slow timer (`TCP_SLOW_TICK_MS`): retransmission backoff and the
/// 2MSL `TimeWait` drain. Returns the segments that need to go back out on
/// the wire.
pub fn slow_timer_tick(conns: &mut ConnTable, sockets: &mut SocketTable) -> Vec<(Ipv4Address, Vec<u8>)> {
    let mut out = Vec::new();
    let mut drop_keys = Vec::new();

    for (key, tcb) in conns.conns.iter_mut() {
        if let Some(ticks) = tcb.timers[timer::TWOMSL].as_mut() {
            if *ticks <= 1 {
                drop_keys.push(*key);
                continue;
            }
            *ticks -= 1;
        }

        if let Some(ticks) = tcb.timers[timer::REXMT].as_mut() {
            if *ticks > 1 {
                *ticks -= 1;
                continue;
            }

            if tcb.backoff >= TCP_MAXRXTSHIFT {
                drop_keys.push(*key);
                continue;
            }
            tcb.backoff += 1;
            tcb.rto = (tcb.rto << 1).min(TCP_TV_REXMTMAX).max(TCP_TV_MIN);

            if let Some(pending) = &mut tcb.unacked {
                // Karn's rule: a retransmission can't be used for an RTT sample.
                pending.timed_at = None;
                let seg = build_segment(
                    tcb.local,
                    tcb.remote,
                    pending.control,
                    pending.seq,
                    Some(tcb.rcv_nxt),
                    tcb.rcv_wnd,
                    if pending.control == TcpControl::Syn { Some(tcb.mss) } else { None },
                    &pending.payload,
                );
                out.push((tcb.remote.addr, seg));
            }
            tcb.arm_rexmt();
        }
    }

    for key in drop_keys {
        if let Some(tcb) = conns.conns.remove(&key) {
            if tcb.bound {
                sockets.remove_tcp(tcb.local, tcb.remote);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::SocketTable;

    fn addr(last: u8, port: u16) -> SockAddr {
        SockAddr { addr: Ipv4Address::new(10, 0, 0, last), port }
    }

    fn syn(local: SockAddr, remote: SockAddr, seq: u32) -> Vec<u8> {
        build_segment(remote, local, TcpControl::Syn, seq, None, 8192, Some(1460), &[])
    }

    #[test]
    fn passive_open_completes_the_three_way_handshake() {
        let local = addr(2, 80);
        let remote = addr(1, 4000);
        let mut conns = ConnTable::new();
        let mut sockets = SocketTable::new();
        sockets.listen_tcp(local).unwrap();

        let request = syn(local, remote, 1000);
        let outcome = receive(&mut conns, &mut sockets, remote.addr, local.addr, &request, Instant::ZERO, 5000).unwrap();
        let synack = match outcome {
            Outcome::Reply(dst, bytes) => {
                assert_eq!(dst, remote.addr);
                bytes
            }
            _ => panic!("expected SYN-ACK"),
        };

        let packet = TcpPacket::new_checked(&synack[..]).unwrap();
        let repr = TcpRepr::parse(&packet, local.addr, remote.addr).unwrap();
        assert_eq!(repr.control, TcpControl::Syn);
        assert_eq!(repr.ack_number, Some(1001));
        assert_eq!(conns.get(local, remote).unwrap().state, State::SynRcvd);

        let ack = build_segment(remote, local, TcpControl::None, 1001, Some(5001), 8192, None, &[]);
        let outcome = receive(&mut conns, &mut sockets, remote.addr, local.addr, &ack, Instant::ZERO, 0).unwrap();
        assert!(matches!(outcome, Outcome::Consumed));
        assert_eq!(conns.get(local, remote).unwrap().state, State::Established);
    }

    #[test]
    fn syn_with_no_listener_is_reset() {
        let local = addr(2, 80);
        let remote = addr(1, 4000);
        let mut conns = ConnTable::new();
        let mut sockets = SocketTable::new();

        let request = syn(local, remote, 1000);
        let outcome = receive(&mut conns, &mut sockets, remote.addr, local.addr, &request, Instant::ZERO, 5000).unwrap();
        match outcome {
            Outcome::Reply(dst, bytes) => {
                assert_eq!(dst, remote.addr);
                let packet = TcpPacket::new_checked(&bytes[..]).unwrap();
                let repr = TcpRepr::parse(&packet, local.addr, remote.addr).unwrap();
                assert_eq!(repr.control, TcpControl::Rst);
            }
            _ => panic!("expected RST"),
        }
        assert_eq!(conns.len(), 0);
    }

    #[test]
    fn established_data_is_delivered_and_acked() {
        let local = addr(2, 80);
        let remote = addr(1, 4000);
        let mut conns = ConnTable::new();
        let mut sockets = SocketTable::new();
        sockets.listen_tcp(local).unwrap();

        receive(&mut conns, &mut sockets, remote.addr, local.addr, &syn(local, remote, 1000), Instant::ZERO, 5000).unwrap();
        let ack = build_segment(remote, local, TcpControl::None, 1001, Some(5001), 8192, None, &[]);
        receive(&mut conns, &mut sockets, remote.addr, local.addr, &ack, Instant::ZERO, 0).unwrap();

        let data = build_segment(remote, local, TcpControl::None, 1001, Some(5001), 8192, None, b"hi");
        let outcome = receive(&mut conns, &mut sockets, remote.addr, local.addr, &data, Instant::ZERO, 0).unwrap();
        match outcome {
            Outcome::Reply(_, bytes) => {
                let packet = TcpPacket::new_checked(&bytes[..]).unwrap();
                let repr = TcpRepr::parse(&packet, local.addr, remote.addr).unwrap();
                assert_eq!(repr.ack_number, Some(1003));
            }
            _ => panic!("expected ack"),
        }
    }

    #[test]
    fn peer_fin_moves_through_close_wait_to_last_ack() {
        let local = addr(2, 80);
        let remote = addr(1, 4000);
        let mut conns = ConnTable::new();
        let mut sockets = SocketTable::new();
        sockets.listen_tcp(local).unwrap();

        receive(&mut conns, &mut sockets, remote.addr, local.addr, &syn(local, remote, 1000), Instant::ZERO, 5000).unwrap();
        let ack = build_segment(remote, local, TcpControl::None, 1001, Some(5001), 8192, None, &[]);
        receive(&mut conns, &mut sockets, remote.addr, local.addr, &ack, Instant::ZERO, 0).unwrap();

        let fin = build_segment(remote, local, TcpControl::Fin, 1001, Some(5001), 8192, None, &[]);
        let outcome = receive(&mut conns, &mut sockets, remote.addr, local.addr, &fin, Instant::ZERO, 0).unwrap();
        assert!(matches!(outcome, Outcome::Reply(..)));
        assert_eq!(conns.get(local, remote).unwrap().state, State::LastAck);

        let last_ack = build_segment(remote, local, TcpControl::None, 1002, Some(5002), 8192, None, &[]);
        receive(&mut conns, &mut sockets, remote.addr, local.addr, &last_ack, Instant::ZERO, 0).unwrap();
        assert!(conns.get(local, remote).is_none());
    }

    #[test]
    fn unacked_syn_ack_is_retransmitted_with_backoff() {
        let local = addr(2, 80);
        let remote = addr(1, 4000);
        let mut conns = ConnTable::new();
        let mut sockets = SocketTable::new();
        sockets.listen_tcp(local).unwrap();

        receive(&mut conns, &mut sockets, remote.addr, local.addr, &syn(local, remote, 1000), Instant::ZERO, 5000).unwrap();
        let initial_rto = conns.get(local, remote).unwrap().rto;

        let mut sent = Vec::new();
        for _ in 0..=initial_rto {
            sent = slow_timer_tick(&mut conns, &mut sockets);
            if !sent.is_empty() {
                break;
            }
        }
        assert_eq!(sent.len(), 1);
        assert!(conns.get(local, remote).unwrap().rto > initial_rto);
    }
}
