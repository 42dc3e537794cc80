//! The link layer: a raw Ethernet device the rest of the stack reads
//! frames from and writes frames to.
//!
//! The actual frame I/O driver is an external collaborator (§6) — this
//! crate only needs *some* device to run the daemon binary against, so it
//! trades the teacher's token-based, zero-copy `Device`/`RxToken`/`TxToken`
//! traits (built for a non-blocking poll loop) for a small blocking trait
//! that matches how the ingress worker actually drives it: block for at
//! most a timeout, return the number of bytes received.

use crate::error::Result;
use crate::time::Duration;
use crate::wire::EthernetAddress;

pub mod tap;

/// A raw Ethernet device.
///
/// `receive` blocks for up to `timeout` (or indefinitely if `None`) and
/// returns the number of bytes written into `buffer`, or `0` on timeout.
/// `send` transmits a single frame and returns the number of bytes written.
pub trait LinkDevice {
    /// The hardware address burned into (or configured for) this device.
    fn hardware_addr(&self) -> EthernetAddress;

    /// The largest Ethernet frame, including the 14-byte header, this
    /// device will hand to or accept from the stack.
    fn max_frame_len(&self) -> usize;

    /// Block until a frame arrives or `timeout` elapses, then copy it into
    /// `buffer`. Returns `Ok(0)` on timeout, `Ok(n)` with `n > 0` otherwise.
    fn receive(&mut self, timeout: Option<Duration>, buffer: &mut [u8]) -> Result<usize>;

    /// Transmit `frame` as a single Ethernet frame.
    fn send(&mut self, frame: &[u8]) -> Result<usize>;
}
