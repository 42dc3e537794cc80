//! A user-space TCP/IP stack that attaches to a raw Ethernet interface and
//! exposes a datagram socket API to client processes over shared memory.
//!
//! Layering follows the wire: [`wire`] is pure packet representation,
//! [`phy`] is the link-layer device, and `arp`/`route`/`ip`/`icmp`/`udp`/`tcp`
//! build the protocol stack proper on top. [`socket`] is the shared-memory
//! IPC surface clients see; [`stack`] bundles the mutable tables every layer
//! needs (ARP cache, RIB, fragment pool, socket tables, ...) into one context
//! instead of process-wide globals. `daemon` drives the whole thing from the
//! `inetd` binary.

#[macro_use]
mod macros; // this should be previous than the mod phy; fuck rust

pub mod config;
pub mod error;
pub mod time;
pub mod wire;

pub mod phy;

pub mod arp;
pub mod route;

pub mod icmp;
pub mod ip;
pub mod udp;

pub mod tcp;

pub mod socket;

pub mod ethernet;
pub mod stack;

pub mod daemon;

pub use error::{Error, Result};
