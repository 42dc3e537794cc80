//! ICMP echo handling and Destination Unreachable synthesis (§4.7).
//!
//! Grounded in `icmp.c`: `icmp_input` only answers Echo Request (anything
//! else is logged and dropped) and `icmp_generate_dest_unreachable` quotes
//! the offending IP header plus up to 8 bytes of its payload back at the
//! sender.

use crate::error::{Error, Result};
use crate::ip::{HandlerOutcome, ProtocolHandler};
use crate::wire::{Icmpv4DstUnreachable, Icmpv4Packet, Icmpv4Repr, IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr, IPV4_HEADER_LEN};

/// Bytes of the original datagram's payload quoted back in a Destination
/// Unreachable message (`msg->data` in the original).
const QUOTE_LEN: usize = 8;

/// The ICMP protocol handler, registered against `IpProtocol::Icmp` in the
/// stack's dispatch table.
#[derive(Debug, Default)]
pub struct Handler;

impl ProtocolHandler for Handler {
    fn protocol(&self) -> IpProtocol {
        IpProtocol::Icmp
    }

    fn receive(
        &mut self,
        _src: Ipv4Address,
        _dst: Ipv4Address,
        payload: &[u8],
        reply_buf: &mut [u8],
    ) -> Result<HandlerOutcome> {
        let packet = Icmpv4Packet::new_checked(payload)?;
        match Icmpv4Repr::parse(&packet)? {
            Icmpv4Repr::EchoRequest { ident, seq_no, data } => {
                let reply = Icmpv4Repr::EchoReply { ident, seq_no, data };
                let len = reply.buffer_len();
                if len > reply_buf.len() {
                    return Err(Error::MessageTooLong);
                }
                reply.emit(&mut Icmpv4Packet::new_unchecked(&mut reply_buf[..len]));
                Ok(HandlerOutcome::Reply(len))
            }
            // Echo replies and unreachable messages addressed to us carry no
            // listening client in this stack's scope; log and drop.
            Icmpv4Repr::EchoReply { .. } | Icmpv4Repr::DstUnreachable { .. } => Ok(HandlerOutcome::Consumed),
        }
    }
}

/// Build a Destination Unreachable message quoting `header` (the offending
/// datagram's own header, host-order) and the first bytes of its payload.
/// Returns the number of bytes written to `out`; the caller (the IP layer)
/// still has to wrap this in a reply IP header addressed back to the
/// original sender.
pub fn generate_dest_unreachable(
    header: &Ipv4Repr,
    orig_payload: &[u8],
    code: Icmpv4DstUnreachable,
    out: &mut [u8],
) -> Result<usize> {
    let quote_len = orig_payload.len().min(QUOTE_LEN);

    let mut quoted_header = [0u8; IPV4_HEADER_LEN];
    header.emit(&mut Ipv4Packet::new_unchecked(&mut quoted_header[..]));

    let mut quote = Vec::with_capacity(IPV4_HEADER_LEN + quote_len);
    quote.extend_from_slice(&quoted_header);
    quote.extend_from_slice(&orig_payload[..quote_len]);

    let repr = Icmpv4Repr::DstUnreachable {
        reason: code,
        data: &quote,
    };
    let len = repr.buffer_len();
    if len > out.len() {
        return Err(Error::MessageTooLong);
    }
    repr.emit(&mut Icmpv4Packet::new_unchecked(&mut out[..len]));
    Ok(len)
}
