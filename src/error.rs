//! Error taxonomy (spec §7).
//!
//! A plain enum with `Display`, matching the teacher's `wire::Error` shape
//! rather than pulling in `anyhow`/`thiserror` — none of the teacher's
//! compiling code depends on either.

use core::fmt;
use core::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Resource exhaustion
    NoMemory,
    NoSlot,
    RingFull,
    NoFragmentBuffer,

    // Addressing
    NoRouteToHost(Ipv4Addr),
    HostUnreachable(Ipv4Addr),
    PortUnreachable,
    ProtocolUnreachable,
    AddressInUse,
    AddressInvalid,

    // Message
    BadMessage,
    MessageTooLong,

    // Protocol
    UnsupportedProtocol,
    UnsupportedMessageType,
    InvalidState,
    InvalidHeader,

    // Transient
    WouldBlock,
    AlreadyInProgress,

    // Link I/O (the device driver itself is an external collaborator; this
    // only wraps failures surfaced through the `phy::LinkDevice` boundary).
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err.kind())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoMemory => write!(f, "no memory"),
            Error::NoSlot => write!(f, "no free slot"),
            Error::RingFull => write!(f, "ring full"),
            Error::NoFragmentBuffer => write!(f, "out of fragment buffers"),
            Error::NoRouteToHost(a) => write!(f, "no route to host {a}"),
            Error::HostUnreachable(a) => write!(f, "host unreachable: {a}"),
            Error::PortUnreachable => write!(f, "port unreachable"),
            Error::ProtocolUnreachable => write!(f, "protocol unreachable"),
            Error::AddressInUse => write!(f, "address already in use"),
            Error::AddressInvalid => write!(f, "invalid address"),
            Error::BadMessage => write!(f, "bad message"),
            Error::MessageTooLong => write!(f, "message too long"),
            Error::UnsupportedProtocol => write!(f, "unsupported protocol"),
            Error::UnsupportedMessageType => write!(f, "unsupported message type"),
            Error::InvalidState => write!(f, "invalid state"),
            Error::InvalidHeader => write!(f, "invalid header"),
            Error::WouldBlock => write!(f, "would block"),
            Error::AlreadyInProgress => write!(f, "already in progress"),
            Error::Io(kind) => write!(f, "i/o error: {kind}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
