//! Compile-time configuration constants (§6).
//!
//! Names follow the original `config.h` (`NSTACK_*`) so the grounding in
//! `DESIGN.md` stays traceable.

/// Maximum datagram payload a client may submit through `sendto`.
pub const NSTACK_DATAGRAM_SIZE_MAX: usize = 4096;

/// Size, in bytes, of each ring's data area.
pub const NSTACK_DATAGRAM_BUF_SIZE: usize = 16384;

/// Period, in seconds, of the slow periodic tick (ARP aging, defer drain,
/// fragment timeout).
pub const NSTACK_PERIODIC_EVENT_SEC: u64 = 10;

/// ARP cache capacity, in entries.
pub const NSTACK_ARP_CACHE_SIZE: usize = 50;

/// ARP dynamic-entry age ceiling, in ticks of the periodic event
/// (20 * 60 * 60 one-second ticks, expressed in `NSTACK_PERIODIC_EVENT_SEC`
/// units it is still referred to by the spec as "72000 ticks").
pub const NSTACK_ARP_AGE_MAX: u32 = 20 * 60 * 60;

/// RIB capacity, in entries.
pub const NSTACK_IP_RIB_SIZE: usize = 5;

/// IP defer queue capacity, in entries.
pub const NSTACK_IP_DEFER_MAX: usize = 20;

/// Whether to synthesize ICMP Destination Host Unreachable for undeliverable
/// local traffic (`NSTACK_IP_SEND_HOSTUNREAC` in the original).
pub const NSTACK_IP_SEND_HOSTUNREAC: bool = true;

/// Number of fragment-reassembly buffers.
pub const NSTACK_IP_FRAGMENT_BUF: usize = 4;

/// Fragment reassembly timeout lower bound, in seconds (RFC 791).
pub const NSTACK_IP_FRAGMENT_TLB: u32 = 15;

/// Maximum bytes addressable in a reassembled IPv4 datagram.
pub const IP_MAX_BYTES: usize = 65536;

/// Maximum number of retries for an IP defer-queue entry before it's dropped.
pub const NSTACK_IP_DEFER_MAX_TRIES: u8 = 3;

/// Default TCP maximum segment size advertised in the MSS option.
pub const TCP_DEFAULT_MSS: u16 = 1460;

/// TCP slow-timer period, in milliseconds.
pub const TCP_SLOW_TICK_MS: u64 = 500;

/// Connection-establishment / keepalive initial timer value, in slow-ticks.
pub const TCP_TV_KEEP_INIT: u32 = 150;

/// Minimum retransmission timeout, in slow-ticks.
pub const TCP_TV_MIN: u32 = 2;

/// Maximum retransmission timeout, in slow-ticks.
pub const TCP_TV_REXMTMAX: u32 = 128;

/// 2MSL timer value, in slow-ticks.
pub const TCP_TV_MSL: u32 = 60;

/// RTT estimator fixed-point shift (SRTT is stored as `srtt << RTT_SHIFT`).
pub const TCP_RTT_SHIFT: u32 = 3;

/// RTT variance fixed-point shift.
pub const TCP_RTTVAR_SHIFT: u32 = 2;

/// Maximum socket port number (`NSTACK_SOCK_PORT_MAX`).
pub const NSTACK_SOCK_PORT_MAX: u16 = 49151;

/// Ethernet link MTU assumed for the attached interface (payload only, not
/// counting the 14-byte Ethernet header).
pub const ETHER_DATA_LEN: usize = 1500;

/// Default TTL stamped on datagrams this stack originates.
pub const IP_TTL_DEFAULT: u8 = 64;

/// Sentinel for "no RTT measurement taken yet" (`rtt_est == 0`).
pub const TCP_TV_SRTTBASE: i32 = 0;

/// Smoothed RTT, in slow-ticks, assumed before the first real measurement.
pub const TCP_TV_SRTTDFLT: i32 = 6;

/// Consecutive unacknowledged retransmissions after which a connection is
/// abandoned; also caps the exponential backoff shift applied to the RTO.
pub const TCP_MAXRXTSHIFT: u32 = 12;

/// Number of slow-ticks a connection stays in `TimeWait` before its TCB is
/// dropped (`2 * TCP_TV_MSL`).
pub const TCP_TV_2MSL: u32 = 2 * TCP_TV_MSL;
