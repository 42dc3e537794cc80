//! Monotonic time, milliseconds since an arbitrary epoch.
//!
//! The teacher's `phy`/`iface` fragments reference `crate::time::{Instant,
//! Duration}` throughout but the module itself was never checked in; this is
//! a from-scratch reconstruction in the same spirit (a thin newtype over
//! `i64` milliseconds, no wall-clock dependency baked into the type so the
//! stack can be driven by tests with synthetic time).

use core::fmt;
use core::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Instant(i64);

impl Instant {
    pub const ZERO: Instant = Instant(0);

    pub const fn from_millis(millis: i64) -> Instant {
        Instant(millis)
    }

    pub const fn from_secs(secs: i64) -> Instant {
        Instant(secs * 1000)
    }

    pub const fn total_millis(&self) -> i64 {
        self.0
    }

    pub fn now() -> Instant {
        use std::time::SystemTime;
        let dur = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        Instant(dur.as_millis() as i64)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(u64);

impl Duration {
    pub const fn from_millis(millis: u64) -> Duration {
        Duration(millis)
    }

    pub const fn from_secs(secs: u64) -> Duration {
        Duration(secs * 1000)
    }

    pub const fn total_millis(&self) -> u64 {
        self.0
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + rhs.0 as i64)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        Duration((self.0 - rhs.0).max(0) as u64)
    }
}
