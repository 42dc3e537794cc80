use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::{IpProtocol, Ipv4Address};
use crate::error::{Error, Result};
use crate::wire::checksum as inet_checksum;

/// Which of SYN/FIN/RST a segment carries, for sequence-space bookkeeping
/// (SYN and FIN each consume one sequence number; at most one may be set,
/// per the pragmatic FSM subset this stack implements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    None,
    Syn,
    Fin,
    Rst,
}

impl Control {
    pub fn len(self) -> usize {
        match self {
            Control::Syn | Control::Fin => 1,
            Control::None | Control::Rst => 0,
        }
    }
}

/// The raw flag bits of a TCP segment (byte 13 of the header).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl Flags {
    const FIN: u8 = 0x01;
    const SYN: u8 = 0x02;
    const RST: u8 = 0x04;
    const PSH: u8 = 0x08;
    const ACK: u8 = 0x10;
    const URG: u8 = 0x20;

    fn from_raw(raw: u8) -> Flags {
        Flags {
            fin: raw & Self::FIN != 0,
            syn: raw & Self::SYN != 0,
            rst: raw & Self::RST != 0,
            psh: raw & Self::PSH != 0,
            ack: raw & Self::ACK != 0,
            urg: raw & Self::URG != 0,
        }
    }

    fn to_raw(self) -> u8 {
        let mut raw = 0;
        if self.fin {
            raw |= Self::FIN;
        }
        if self.syn {
            raw |= Self::SYN;
        }
        if self.rst {
            raw |= Self::RST;
        }
        if self.psh {
            raw |= Self::PSH;
        }
        if self.ack {
            raw |= Self::ACK;
        }
        if self.urg {
            raw |= Self::URG;
        }
        raw
    }

    /// The control bit a segment carries, for sequence-space accounting.
    /// RST takes priority, then SYN, then FIN; at most one of these is
    /// expected to be set by this stack's own segment generation.
    pub fn control(self) -> Control {
        if self.rst {
            Control::Rst
        } else if self.syn {
            Control::Syn
        } else if self.fin {
            Control::Fin
        } else {
            Control::None
        }
    }
}

/// A TCP option. Only the subset this stack negotiates is represented
/// (§1 Non-goals exclude window scaling, SACK and timestamps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    Unknown { kind: u8 },
}

impl TcpOption {
    fn parse(buffer: &[u8]) -> Result<(&[u8], TcpOption)> {
        let (length, option);
        match *buffer.first().ok_or(Error::InvalidHeader)? {
            0 => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            1 => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *buffer.get(1).ok_or(Error::InvalidHeader)? as usize;
                let data = buffer.get(2..length).ok_or(Error::InvalidHeader)?;
                option = match (kind, length) {
                    (2, 4) => TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (_, _) => TcpOption::Unknown { kind },
                };
            }
        }
        Ok((&buffer[length..], option))
    }

    fn buffer_len(&self) -> usize {
        match *self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::Unknown { .. } => 0,
        }
    }

    fn emit<'a>(&self, buffer: &'a mut [u8]) -> &'a mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length = 1;
                buffer[0] = 0;
            }
            TcpOption::NoOperation => {
                length = 1;
                buffer[0] = 1;
            }
            TcpOption::MaxSegmentSize(value) => {
                length = 4;
                buffer[0] = 2;
                buffer[1] = 4;
                NetworkEndian::write_u16(&mut buffer[2..4], value);
            }
            TcpOption::Unknown { .. } => length = 0,
        }
        &mut buffer[length..]
    }
}

mod field {
    use crate::wire::field::*;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM: Field = 4..8;
    pub const ACK_NUM: Field = 8..12;
    pub const FLAGS: Field = 12..14;
    pub const WIN_SIZE: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;

    pub const fn OPTIONS(data_offset: u8) -> Field {
        URGENT.end..(data_offset as usize * 4)
    }
}

pub const HEADER_LEN: usize = field::URGENT.end;

fn pseudo_header(src_addr: Ipv4Address, dst_addr: Ipv4Address, len: u16) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&src_addr.octets());
    buf[4..8].copy_from_slice(&dst_addr.octets());
    buf[8] = 0;
    buf[9] = IpProtocol::Tcp.into();
    NetworkEndian::write_u16(&mut buf[10..12], len);
    buf
}

/// A read/write wrapper around a TCP segment buffer.
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
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error::BadMessage);
        }
        let data_offset = self.data_offset();
        if !(5..=15).contains(&data_offset) {
            return Err(Error::InvalidHeader);
        }
        if len < data_offset as usize * 4 {
            return Err(Error::InvalidHeader);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    pub fn seq_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::SEQ_NUM])
    }

    pub fn ack_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::ACK_NUM])
    }

    pub fn data_offset(&self) -> u8 {
        self.buffer.as_ref()[field::FLAGS.start] >> 4
    }

    pub fn flags(&self) -> Flags {
        Flags::from_raw(self.buffer.as_ref()[field::FLAGS.start + 1])
    }

    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::WIN_SIZE])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::URGENT])
    }

    pub fn header_len(&self) -> usize {
        self.data_offset() as usize * 4
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[field::OPTIONS(self.data_offset())]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }

    pub fn verify_checksum(&self, src_addr: Ipv4Address, dst_addr: Ipv4Address) -> bool {
        let header = pseudo_header(src_addr, dst_addr, self.buffer.as_ref().len() as u16);
        inet_checksum(self.buffer.as_ref(), &header) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value);
    }

    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value);
    }

    pub fn set_seq_number(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::SEQ_NUM], value);
    }

    pub fn set_ack_number(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::ACK_NUM], value);
    }

    pub fn set_data_offset(&mut self, value: u8) {
        let byte = &mut self.buffer.as_mut()[field::FLAGS.start];
        *byte = (value << 4) | (*byte & 0x0f);
    }

    pub fn set_flags(&mut self, value: Flags) {
        self.buffer.as_mut()[field::FLAGS.start + 1] = value.to_raw();
    }

    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::WIN_SIZE], value);
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], value);
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        let range = field::OPTIONS(self.data_offset());
        &mut self.buffer.as_mut()[range]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.buffer.as_mut()[header_len..]
    }

    pub fn fill_checksum(&mut self, src_addr: Ipv4Address, dst_addr: Ipv4Address) {
        self.set_checksum(0);
        let header = pseudo_header(src_addr, dst_addr, self.buffer.as_ref().len() as u16);
        let sum = inet_checksum(self.buffer.as_ref(), &header);
        self.set_checksum(sum);
    }
}

/// A high-level representation of a TCP segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub control: Control,
    pub seq_number: u32,
    pub ack_number: Option<u32>,
    pub window_len: u16,
    pub max_seg_size: Option<u16>,
    pub payload_len: usize,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]> + ?Sized>(
        packet: &Packet<&T>,
        src_addr: Ipv4Address,
        dst_addr: Ipv4Address,
    ) -> Result<Repr> {
        packet.check_len()?;
        if packet.dst_port() == 0 {
            return Err(Error::AddressInvalid);
        }
        if !packet.verify_checksum(src_addr, dst_addr) {
            return Err(Error::BadMessage);
        }

        let flags = packet.flags();
        let control = flags.control();
        let ack_number = if flags.ack {
            Some(packet.ack_number())
        } else {
            None
        };

        let mut max_seg_size = None;
        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::MaxSegmentSize(value) => max_seg_size = Some(value),
                TcpOption::NoOperation | TcpOption::Unknown { .. } => (),
            }
            options = next_options;
        }

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            control,
            seq_number: packet.seq_number(),
            ack_number,
            window_len: packet.window_len(),
            max_seg_size,
            payload_len: packet.payload().len(),
        })
    }

    pub fn header_len(&self) -> usize {
        let mut length = HEADER_LEN;
        if self.max_seg_size.is_some() {
            length += 4;
        }
        // Round up to a multiple of 4, as the data offset field requires.
        (length + 3) / 4 * 4
    }

    pub fn buffer_len(&self) -> usize {
        self.header_len() + self.payload_len
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(
        &self,
        packet: &mut Packet<T>,
        src_addr: Ipv4Address,
        dst_addr: Ipv4Address,
        emit_payload: impl FnOnce(&mut [u8]),
    ) {
        let header_len = self.header_len();
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(0));
        packet.set_data_offset((header_len / 4) as u8);
        packet.set_flags(Flags {
            fin: self.control == Control::Fin,
            syn: self.control == Control::Syn,
            rst: self.control == Control::Rst,
            psh: self.payload_len > 0,
            ack: self.ack_number.is_some(),
            urg: false,
        });
        packet.set_window_len(self.window_len);
        packet.set_urgent_at(0);

        {
            let mut options = &mut packet.options_mut()[..];
            if let Some(mss) = self.max_seg_size {
                options = TcpOption::MaxSegmentSize(mss).emit(options);
            }
            for byte in options.iter_mut() {
                *byte = 0;
            }
        }

        emit_payload(packet.payload_mut());
        packet.fill_checksum(src_addr, dst_addr);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TCP src={} dst={} seq={} ack={:?} ctl={:?} len={}",
            self.src_port, self.dst_port, self.seq_number, self.ack_number, self.control, self.payload_len
        )
    }
}
