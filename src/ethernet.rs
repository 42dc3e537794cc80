//! Ethernet-level frame dispatch (§4.2, §4.4).
//!
//! Grounded in `ether.c`'s `ether_input`/`ether_output_reply`: a frame is
//! looked at only for its ethertype, handed to whichever protocol owns that
//! number, and a positive return value means "send this many bytes back to
//! the frame's source". `ether_input` fans out through a `SET_FOREACH`
//! linker-set registry of bare function pointers — each one (`arp_input`,
//! `ip_input`) reaches its own file-scope globals directly, so there's
//! nothing to pass it beyond the frame itself.
//!
//! That shape doesn't survive the port: ARP needs the cache and RIB, IP
//! needs those plus the fragment pool, defer queue and device handle to
//! answer ICMP/UDP/TCP — state a `Box<dyn FrameHandler>` can't reach without
//! smuggling it through a `RefCell`. [`crate::stack::Stack::process_frame`]
//! matches on [`crate::wire::EthernetProtocol`] directly instead, for the
//! same reason `ip::mod` dispatches UDP/TCP directly rather than through
//! `ProtocolHandler`. What does survive, and live here, is the outcome
//! shape both paths produce and the framing helper every reply uses.

use crate::error::Result;
use crate::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

/// Outcome of handing one inbound frame's payload to the protocol it names.
#[derive(Debug)]
pub enum Outcome {
    /// `len` bytes are ready in the caller's reply buffer; wrap them in a
    /// frame addressed back to the sender with [`reply`].
    Reply(usize),
    /// Handled, no reply warranted.
    Consumed,
    /// No protocol in this stack's scope claims this ethertype
    /// (`errno = EPROTONOSUPPORT` in the original).
    Unsupported,
}

/// Wrap `payload` in a frame of `ethertype`, addressed from `local_hw_addr`
/// to `dst_hw_addr` — the send half of `ether_output_reply`.
pub fn reply(
    local_hw_addr: EthernetAddress,
    dst_hw_addr: EthernetAddress,
    ethertype: EthernetProtocol,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = vec![0u8; EthernetFrame::<&[u8]>::header_len() + payload.len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
    frame.set_src_addr(local_hw_addr);
    frame.set_dst_addr(dst_hw_addr);
    frame.set_ethertype(ethertype);
    frame.payload_mut().copy_from_slice(payload);
    buf
}
