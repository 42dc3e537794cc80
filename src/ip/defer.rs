//! The IP defer queue (§4.6): a bounded FIFO of outbound datagrams waiting
//! on ARP resolution.
//!
//! Grounded in `ip_defer.c`'s `struct ip_defer`/`ip_defer_push`/
//! `ip_defer_peek`/`ip_defer_drop`. Two bugs in that file are fixed here
//! rather than carried over:
//!
//! - the original's per-entry buffer is `uint8_t buf[ETHER_ALEN]` — six
//!   bytes, clearly a copy-paste of the MAC address type rather than a
//!   payload bound. This queue sizes each entry's buffer to
//!   [`ETHER_DATA_LEN`], the actual link MTU.
//! - `ip_defer_handler`'s `defer_inhibit = 0;` sits right after an
//!   unconditional `while (1)` with no `break`, so it never runs and the
//!   queue wedges shut on the first drain. The drain routine in
//!   [`super::drain`] uses a labeled loop with explicit exits so the clear
//!   always happens.

use heapless::Deque;

use crate::config::{ETHER_DATA_LEN, NSTACK_IP_DEFER_MAX};
use crate::error::{Error, Result};
use crate::wire::{IpProtocol, Ipv4Address};

pub struct Entry {
    pub dst: Ipv4Address,
    pub proto: IpProtocol,
    pub tries: u8,
    buf: [u8; ETHER_DATA_LEN],
    len: usize,
}

impl Entry {
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Bounded FIFO of datagrams waiting for ARP resolution, plus the
/// reentrancy guard that rejects pushes made from inside a drain pass.
pub struct DeferQueue {
    entries: Deque<Entry, NSTACK_IP_DEFER_MAX>,
    inhibited: bool,
}

impl DeferQueue {
    pub fn new() -> DeferQueue {
        DeferQueue {
            entries: Deque::new(),
            inhibited: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_inhibited(&self) -> bool {
        self.inhibited
    }

    /// Enqueue `payload` for retransmission to `dst`. Rejected while a drain
    /// pass is in progress, while full, or if `payload` exceeds the
    /// per-entry bound.
    pub fn push(&mut self, dst: Ipv4Address, proto: IpProtocol, payload: &[u8]) -> Result<()> {
        if self.inhibited {
            return Err(Error::AlreadyInProgress);
        }
        if payload.len() > ETHER_DATA_LEN {
            return Err(Error::MessageTooLong);
        }

        let mut buf = [0u8; ETHER_DATA_LEN];
        buf[..payload.len()].copy_from_slice(payload);
        let entry = Entry {
            dst,
            proto,
            tries: 0,
            buf,
            len: payload.len(),
        };
        self.entries.push_back(entry).map_err(|_| Error::RingFull)
    }

    pub(super) fn peek(&self) -> Option<&Entry> {
        self.entries.front()
    }

    pub(super) fn drop_head(&mut self) {
        self.entries.pop_front();
    }

    pub(super) fn bump_tries_head(&mut self) {
        if let Some(entry) = self.entries.front_mut() {
            entry.tries += 1;
        }
    }

    pub(super) fn set_inhibited(&mut self, value: bool) {
        self.inhibited = value;
    }
}

impl Default for DeferQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> Ipv4Address {
        Ipv4Address::new(10, 0, 0, last)
    }

    #[test]
    fn push_then_peek_and_drop() {
        let mut queue = DeferQueue::new();
        queue.push(ip(1), IpProtocol::Udp, b"hello").unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().payload(), b"hello");
        queue.drop_head();
        assert!(queue.is_empty());
    }

    #[test]
    fn push_while_inhibited_is_rejected() {
        let mut queue = DeferQueue::new();
        queue.set_inhibited(true);
        assert_eq!(
            queue.push(ip(1), IpProtocol::Udp, b"hello"),
            Err(Error::AlreadyInProgress)
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut queue = DeferQueue::new();
        let big = vec![0u8; ETHER_DATA_LEN + 1];
        assert_eq!(queue.push(ip(1), IpProtocol::Udp, &big), Err(Error::MessageTooLong));
    }

    #[test]
    fn full_queue_is_rejected() {
        let mut queue = DeferQueue::new();
        for i in 0..NSTACK_IP_DEFER_MAX {
            queue.push(ip(i as u8), IpProtocol::Udp, b"x").unwrap();
        }
        assert_eq!(queue.push(ip(200), IpProtocol::Udp, b"x"), Err(Error::RingFull));
    }

    #[test]
    fn bump_tries_affects_only_head() {
        let mut queue = DeferQueue::new();
        queue.push(ip(1), IpProtocol::Udp, b"a").unwrap();
        queue.push(ip(2), IpProtocol::Udp, b"b").unwrap();
        queue.bump_tries_head();
        assert_eq!(queue.peek().unwrap().tries, 1);
        queue.drop_head();
        assert_eq!(queue.peek().unwrap().tries, 0);
    }
}
