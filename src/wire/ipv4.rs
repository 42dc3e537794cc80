use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

pub use core::net::Ipv4Addr as Address;

use crate::error::{Error, Result};
use crate::wire::checksum;

pub const ADDR_SIZE: usize = 4;

/// A specification of an IPv4 CIDR block: an address plus a variable-length
/// subnet masking prefix length. Used by the route table (§2) to represent
/// `network`/`netmask` pairs compactly.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Cidr {
    address: Address,
    prefix_len: u8,
}

impl Cidr {
    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// # Panics
    /// Panics if `prefix_len` is larger than 32.
    pub const fn new(address: Address, prefix_len: u8) -> Cidr {
        assert!(prefix_len <= 32);
        Cidr {
            address,
            prefix_len,
        }
    }

    pub fn netmask(&self) -> Address {
        if self.prefix_len == 0 {
            return Address::new(0, 0, 0, 0);
        }
        let number = 0xffffffffu32 << (32 - self.prefix_len);
        Address::from_bits(number)
    }

    pub fn contains_addr(&self, addr: &Address) -> bool {
        let mask = u32::from(self.netmask());
        u32::from(self.address) & mask == u32::from(*addr) & mask
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

pub(crate) trait AddressExt {
    /// # Panics
    /// Panics if `data` is not four octets long.
    fn from_bytes(data: &[u8]) -> Self;

    fn x_is_unicast(&self) -> bool;

    /// If `self` is a CIDR-compatible subnet mask, return `Some(prefix_len)`.
    fn to_prefix_len(&self) -> Option<u8>;
}

impl AddressExt for Address {
    fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; ADDR_SIZE];
        bytes.copy_from_slice(data);
        Address::from_bits(u32::from_be_bytes(bytes))
    }

    fn x_is_unicast(&self) -> bool {
        !(self.is_broadcast() || self.is_multicast() || self.is_unspecified())
    }

    fn to_prefix_len(&self) -> Option<u8> {
        let mut ones = true;
        let mut prefix_len = 0;
        for byte in self.octets() {
            let mut mask = 0x80;
            for _ in 0..8 {
                let one = byte & mask != 0;
                if ones {
                    if one {
                        prefix_len += 1;
                    } else {
                        ones = false;
                    }
                } else if one {
                    return None;
                }
                mask >>= 1;
            }
        }
        Some(prefix_len)
    }
}

enum_with_unknown! {
    /// The protocol carried in an IPv4 datagram, as used by the protocol
    /// dispatch table in `ip::mod` (§2.3).
    pub enum Protocol(u8) {
        Icmp = 1,
        Tcp = 6,
        Udp = 17,
    }
}

/// The flags carried in the combined flags/fragment-offset field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub dont_fragment: bool,
    pub more_fragments: bool,
}

mod field {
    use crate::wire::field::*;

    pub const VER_IHL: usize = 0;
    pub const DSCP_ECN: usize = 1;
    pub const LENGTH: Field = 2..4;
    pub const IDENT: Field = 4..6;
    pub const FLG_OFF: Field = 6..8;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: Field = 10..12;
    pub const SRC_ADDR: Field = 12..16;
    pub const DST_ADDR: Field = 16..20;
}

/// Minimum IPv4 header length, in bytes (no options).
pub const HEADER_LEN: usize = field::DST_ADDR.end;

/// A read/write wrapper around an IPv4 packet buffer.
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

    /// Validates the fixed header fits, the header length is internally
    /// consistent and the total length doesn't exceed the buffer.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error::BadMessage);
        }
        let header_len = self.header_len() as usize;
        if header_len < HEADER_LEN || header_len > len {
            return Err(Error::InvalidHeader);
        }
        if (self.total_len() as usize) > len {
            return Err(Error::InvalidHeader);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    pub fn header_len(&self) -> u8 {
        (self.buffer.as_ref()[field::VER_IHL] & 0x0f) * 4
    }

    pub fn dscp(&self) -> u8 {
        self.buffer.as_ref()[field::DSCP_ECN] >> 2
    }

    pub fn total_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    pub fn ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IDENT])
    }

    pub fn flags(&self) -> Flags {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]);
        Flags {
            dont_fragment: raw & 0x4000 != 0,
            more_fragments: raw & 0x2000 != 0,
        }
    }

    pub fn frag_offset(&self) -> u16 {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]);
        (raw & 0x1fff) * 8
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from(self.buffer.as_ref()[field::PROTOCOL])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::SRC_ADDR])
    }

    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::DST_ADDR])
    }

    /// Verify the header checksum. Per spec §9, this is done unconditionally
    /// on receive (the original left the equivalent check commented out).
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.buffer.as_ref()[..self.header_len() as usize], &[]) == 0
    }

    pub fn payload(&self) -> &[u8] {
        let range = self.header_len() as usize..self.total_len() as usize;
        &self.buffer.as_ref()[range]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_version(&mut self, value: u8) {
        let ihl = self.buffer.as_mut()[field::VER_IHL] & 0x0f;
        self.buffer.as_mut()[field::VER_IHL] = (value << 4) | ihl;
    }

    pub fn set_header_len(&mut self, value: u8) {
        let version = self.buffer.as_mut()[field::VER_IHL] & 0xf0;
        self.buffer.as_mut()[field::VER_IHL] = version | (value / 4);
    }

    pub fn set_dscp(&mut self, value: u8) {
        self.buffer.as_mut()[field::DSCP_ECN] = value << 2;
    }

    pub fn set_total_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], value);
    }

    pub fn set_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IDENT], value);
    }

    pub fn set_flags_and_frag_offset(&mut self, flags: Flags, frag_offset: u16) {
        let mut raw = frag_offset / 8;
        if flags.dont_fragment {
            raw |= 0x4000;
        }
        if flags.more_fragments {
            raw |= 0x2000;
        }
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLG_OFF], raw);
    }

    pub fn set_ttl(&mut self, value: u8) {
        self.buffer.as_mut()[field::TTL] = value;
    }

    pub fn set_protocol(&mut self, value: Protocol) {
        self.buffer.as_mut()[field::PROTOCOL] = value.into();
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_src_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::SRC_ADDR].copy_from_slice(&value.octets());
    }

    pub fn set_dst_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::DST_ADDR].copy_from_slice(&value.octets());
    }

    /// Recompute and store the header checksum. Must be called after every
    /// other field has been set, with the checksum field itself zeroed.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let header_len = self.header_len() as usize;
        let sum = checksum(&self.buffer.as_ref()[..header_len], &[]);
        self.set_checksum(sum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        let total_len = self.total_len() as usize;
        &mut self.buffer.as_mut()[header_len..total_len]
    }
}

/// A high-level representation of an IPv4 header (no options).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub protocol: Protocol,
    pub payload_len: usize,
    pub ident: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    pub frag_offset: u16,
    pub ttl: u8,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Result<Repr> {
        if packet.version() != 4 {
            return Err(Error::UnsupportedProtocol);
        }
        if !packet.verify_checksum() {
            return Err(Error::BadMessage);
        }
        let flags = packet.flags();
        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            protocol: packet.protocol(),
            payload_len: packet.payload().len(),
            ident: packet.ident(),
            dont_fragment: flags.dont_fragment,
            more_fragments: flags.more_fragments,
            frag_offset: packet.frag_offset(),
            ttl: packet.ttl(),
        })
    }

    pub const fn buffer_len(&self) -> usize {
        HEADER_LEN + self.payload_len
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        packet.set_version(4);
        packet.set_header_len(HEADER_LEN as u8);
        packet.set_dscp(0);
        packet.set_total_len((HEADER_LEN + self.payload_len) as u16);
        packet.set_ident(self.ident);
        packet.set_flags_and_frag_offset(
            Flags {
                dont_fragment: self.dont_fragment,
                more_fragments: self.more_fragments,
            },
            self.frag_offset,
        );
        packet.set_ttl(self.ttl);
        packet.set_protocol(self.protocol);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
        packet.fill_checksum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repr() -> Repr {
        Repr {
            src_addr: Address::new(192, 168, 1, 1),
            dst_addr: Address::new(192, 168, 1, 2),
            protocol: Protocol::Udp,
            payload_len: 8,
            ident: 0x1234,
            dont_fragment: true,
            more_fragments: false,
            frag_offset: 0,
            ttl: 64,
        }
    }

    #[test]
    fn parse_emit_roundtrip() {
        let repr = repr();
        let mut buf = vec![0u8; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buf[..]);
        repr.emit(&mut packet);

        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert!(packet.verify_checksum());
        assert_eq!(Repr::parse(&packet).unwrap(), repr);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let repr = repr();
        let mut buf = vec![0u8; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buf[..]);
        repr.emit(&mut packet);
        buf[field::TTL] ^= 0xff;

        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert!(!packet.verify_checksum());
        assert_eq!(Repr::parse(&packet), Err(Error::BadMessage));
    }

    #[test]
    fn cidr_contains_addr() {
        let cidr = Cidr::new(Address::new(192, 168, 1, 0), 24);
        assert!(cidr.contains_addr(&Address::new(192, 168, 1, 200)));
        assert!(!cidr.contains_addr(&Address::new(192, 168, 2, 1)));
    }
}
