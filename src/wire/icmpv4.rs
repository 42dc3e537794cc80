use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{Error, Result};
use crate::wire::checksum as inet_checksum;

enum_with_unknown! {
    /// ICMPv4 message type.
    pub enum Message(u8) {
        EchoReply = 0,
        DstUnreachable = 3,
        EchoRequest = 8,
    }
}

enum_with_unknown! {
    /// Subtype carried by a Destination Unreachable message.
    pub enum DstUnreachable(u8) {
        NetUnreachable = 0,
        HostUnreachable = 1,
        ProtoUnreachable = 2,
        PortUnreachable = 3,
        FragRequired = 4,
    }
}

mod field {
    use crate::wire::field::*;

    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: Field = 2..4;
    // Echo request/reply.
    pub const ECHO_IDENT: Field = 4..6;
    pub const ECHO_SEQNO: Field = 6..8;
    // Destination unreachable: 4 bytes unused, then as much of the offending
    // IP datagram as fits.
    pub const UNUSED: Field = 4..8;
    pub const ECHO_PAYLOAD: Rest = 8..;
}

pub const HEADER_LEN: usize = field::ECHO_PAYLOAD.start;

/// A read/write wrapper around an ICMPv4 message buffer.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < HEADER_LEN {
            Err(Error::BadMessage)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn msg_type(&self) -> Message {
        Message::from(self.buffer.as_ref()[field::TYPE])
    }

    pub fn msg_code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn echo_ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::ECHO_IDENT])
    }

    pub fn echo_seq_no(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::ECHO_SEQNO])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[field::ECHO_PAYLOAD]
    }

    pub fn verify_checksum(&self) -> bool {
        inet_checksum(self.buffer.as_ref(), &[]) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_msg_type(&mut self, value: Message) {
        self.buffer.as_mut()[field::TYPE] = value.into();
    }

    pub fn set_msg_code(&mut self, value: u8) {
        self.buffer.as_mut()[field::CODE] = value;
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_echo_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ECHO_IDENT], value);
    }

    pub fn set_echo_seq_no(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ECHO_SEQNO], value);
    }

    pub fn clear_unused(&mut self) {
        for b in &mut self.buffer.as_mut()[field::UNUSED] {
            *b = 0;
        }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::ECHO_PAYLOAD]
    }

    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let sum = inet_checksum(self.buffer.as_ref(), &[]);
        self.set_checksum(sum);
    }
}

/// A high-level representation of an ICMPv4 message.
///
/// Only the message kinds this stack originates or consumes are represented
/// (§4.8): echo request/reply, and destination unreachable carrying as much
/// of the offending datagram as the ICMP quoting rule preserves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repr<'a> {
    EchoRequest {
        ident: u16,
        seq_no: u16,
        data: &'a [u8],
    },
    EchoReply {
        ident: u16,
        seq_no: u16,
        data: &'a [u8],
    },
    DstUnreachable {
        reason: DstUnreachable,
        data: &'a [u8],
    },
}

impl<'a> Repr<'a> {
    pub fn parse(packet: &Packet<&'a [u8]>) -> Result<Repr<'a>> {
        if !packet.verify_checksum() {
            return Err(Error::BadMessage);
        }
        match (packet.msg_type(), packet.msg_code()) {
            (Message::EchoRequest, 0) => Ok(Repr::EchoRequest {
                ident: packet.echo_ident(),
                seq_no: packet.echo_seq_no(),
                data: packet.payload(),
            }),
            (Message::EchoReply, 0) => Ok(Repr::EchoReply {
                ident: packet.echo_ident(),
                seq_no: packet.echo_seq_no(),
                data: packet.payload(),
            }),
            (Message::DstUnreachable, code) => Ok(Repr::DstUnreachable {
                reason: DstUnreachable::from(code),
                data: packet.payload(),
            }),
            _ => Err(Error::UnsupportedMessageType),
        }
    }

    pub fn buffer_len(&self) -> usize {
        match self {
            Repr::EchoRequest { data, .. } | Repr::EchoReply { data, .. } => {
                HEADER_LEN + data.len()
            }
            Repr::DstUnreachable { data, .. } => HEADER_LEN + data.len(),
        }
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        match *self {
            Repr::EchoRequest {
                ident,
                seq_no,
                data,
            } => {
                packet.set_msg_type(Message::EchoRequest);
                packet.set_msg_code(0);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
                packet.payload_mut().copy_from_slice(data);
            }
            Repr::EchoReply {
                ident,
                seq_no,
                data,
            } => {
                packet.set_msg_type(Message::EchoReply);
                packet.set_msg_code(0);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
                packet.payload_mut().copy_from_slice(data);
            }
            Repr::DstUnreachable { reason, data } => {
                packet.set_msg_type(Message::DstUnreachable);
                packet.set_msg_code(reason.into());
                packet.clear_unused();
                packet.payload_mut().copy_from_slice(data);
            }
        }
        packet.fill_checksum();
    }
}
