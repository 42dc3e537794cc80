//! IPv4 fragment reassembly (§3, §4.5).
//!
//! Grounded in `ip_fragment.c`: a fixed pool of reassembly slots keyed by
//! `(src, dst, proto, ident)` (RFC 791's "bufid"), each holding a bitmap
//! with one bit per 8-byte unit of the reassembled datagram. The original
//! indexes the pool with a red-black tree and an atomic test-and-set on
//! `reserved`; this stack is single-writer (§5), so a linear scan over the
//! small fixed pool is simpler and does the same job without the tree.

use crate::config::{NSTACK_IP_FRAGMENT_BUF, NSTACK_IP_FRAGMENT_TLB, IP_MAX_BYTES};
use crate::error::{Error, Result};
use crate::wire::{IpProtocol, Ipv4Address, Ipv4Repr};

const FRAG_MAP_WORDS: usize = (IP_MAX_BYTES / 8 + 31) / 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FragmentKey {
    src: Ipv4Address,
    dst: Ipv4Address,
    proto: IpProtocol,
    ident: u16,
}

struct Slot {
    reserved: bool,
    timer: u32,
    key: Option<FragmentKey>,
    /// Total reassembled length, known once the final (`MF=0`) fragment
    /// arrives; `0` until then, matching the original's `ip_len == 0`
    /// sentinel.
    total_len: usize,
    ttl: u8,
    bitmap: Vec<u32>,
    payload: Vec<u8>,
}

impl Slot {
    fn empty() -> Slot {
        Slot {
            reserved: false,
            timer: 0,
            key: None,
            total_len: 0,
            ttl: 0,
            bitmap: vec![0; FRAG_MAP_WORDS],
            payload: vec![0; IP_MAX_BYTES],
        }
    }
}

fn fragmap_set(map: &mut [u32], unit: usize) {
    map[unit >> 5] |= 1 << (unit & 0x1f);
}

fn fragmap_test(map: &[u32], unit: usize) -> bool {
    map[unit >> 5] & (1 << (unit & 0x1f)) != 0
}

/// The fixed-capacity fragment reassembly pool.
pub struct Reassembly {
    slots: Vec<Slot>,
}

impl Reassembly {
    pub fn new() -> Reassembly {
        Reassembly {
            slots: (0..NSTACK_IP_FRAGMENT_BUF).map(|_| Slot::empty()).collect(),
        }
    }

    fn find_or_alloc(&mut self, key: FragmentKey) -> Option<usize> {
        if let Some(idx) = self.slots.iter().position(|s| s.reserved && s.key == Some(key)) {
            return Some(idx);
        }
        let idx = self.slots.iter().position(|s| !s.reserved)?;
        let slot = &mut self.slots[idx];
        slot.reserved = true;
        slot.key = Some(key);
        slot.timer = NSTACK_IP_FRAGMENT_TLB;
        slot.total_len = 0;
        slot.bitmap.iter_mut().for_each(|word| *word = 0);
        Some(idx)
    }

    fn release(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        slot.reserved = false;
        slot.key = None;
    }

    /// Feed one fragment into the pool. `header` is the fragment's own
    /// (already-validated) IPv4 header; `fragment_payload` is the bytes
    /// after it. Returns the reassembled header and payload once every
    /// fragment up to the final one has arrived.
    pub fn input(&mut self, header: &Ipv4Repr, fragment_payload: &[u8]) -> Result<Option<(Ipv4Repr, Vec<u8>)>> {
        let offset = header.frag_offset as usize;
        if offset > IP_MAX_BYTES {
            return Err(Error::MessageTooLong);
        }

        let key = FragmentKey {
            src: header.src_addr,
            dst: header.dst_addr,
            proto: header.protocol,
            ident: header.ident,
        };

        let idx = self.find_or_alloc(key).ok_or(Error::NoFragmentBuffer)?;
        let slot = &mut self.slots[idx];

        let end = offset + fragment_payload.len();
        if end > slot.payload.len() {
            self.release(idx);
            return Err(Error::MessageTooLong);
        }
        slot.payload[offset..end].copy_from_slice(fragment_payload);

        let first_unit = offset >> 3;
        let unit_count = (fragment_payload.len() + 7) >> 3;
        for unit in first_unit..first_unit + unit_count {
            fragmap_set(&mut slot.bitmap, unit);
        }

        if offset == 0 {
            slot.ttl = header.ttl;
        }
        if !header.more_fragments {
            slot.total_len = end;
        }

        if slot.total_len != 0 {
            let units_needed = (slot.total_len + 7) >> 3;
            let complete = (0..units_needed).all(|unit| fragmap_test(&slot.bitmap, unit));
            if complete {
                let total_len = slot.total_len;
                let out = slot.payload[..total_len].to_vec();
                let ttl = slot.ttl;
                self.release(idx);

                let repr = Ipv4Repr {
                    src_addr: key.src,
                    dst_addr: key.dst,
                    protocol: key.proto,
                    payload_len: total_len,
                    ident: key.ident,
                    dont_fragment: false,
                    more_fragments: false,
                    frag_offset: 0,
                    ttl,
                };
                return Ok(Some((repr, out)));
            }
        }

        Ok(None)
    }

    /// Age every reserved slot by `delta_secs`; release any whose timer has
    /// run out. `delta_secs` is the periodic tick interval
    /// (`NSTACK_PERIODIC_EVENT_SEC`).
    pub fn tick(&mut self, delta_secs: u32) {
        for slot in self.slots.iter_mut() {
            if !slot.reserved {
                continue;
            }
            if delta_secs >= slot.timer {
                slot.reserved = false;
                slot.key = None;
            } else {
                slot.timer -= delta_secs;
            }
        }
    }
}

impl Default for Reassembly {
    fn default() -> Self {
        Self::new()
    }
}
