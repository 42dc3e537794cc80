//! SPSC ring index arithmetic, mirroring `include/queue_r.h`'s `queue_cb_t`.
//!
//! This only tracks which slot index the next `alloc`/`peek` should use —
//! no memory is touched here. [`super::shmem::Region`] owns the actual
//! byte copying in and out of the slot a given index names, and its
//! `RawRing` delegates every index computation to this type (`from_raw`
//! round-trips `RawRing`'s `u64` fields, which are sized the way they are
//! so the on-disk layout is portable across a 32-/64-bit client, through
//! this type's `usize` arithmetic). Kept separate so the indexing logic
//! (and the fact that `write`/`read` wrap at `len`, one slot always left
//! empty to distinguish full from empty) can be tested without a real mmap
//! behind it.

#[derive(Debug, Clone, Copy)]
pub struct RingControl {
    block_size: usize,
    len: usize,
    write: usize,
    read: usize,
}

impl RingControl {
    /// `array_size` is the total data-area size in bytes; the number of
    /// slots is `array_size / block_size`, per `queue_create`.
    pub const fn new(block_size: usize, array_size: usize) -> RingControl {
        RingControl {
            block_size,
            len: array_size / block_size,
            write: 0,
            read: 0,
        }
    }

    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of slots the ring holds, i.e. `array_size / block_size`.
    pub const fn slot_count(&self) -> usize {
        self.len
    }

    /// Reconstruct a `RingControl` from already-known field values, e.g.
    /// the `u64`s `RawRing` keeps in the mapped region.
    pub const fn from_raw(block_size: usize, slot_count: usize, write: usize, read: usize) -> RingControl {
        RingControl {
            block_size,
            len: slot_count,
            write,
            read,
        }
    }

    pub const fn write(&self) -> usize {
        self.write
    }

    pub const fn read(&self) -> usize {
        self.read
    }

    /// Byte offset of the next slot to write into, or `None` if full.
    pub fn alloc(&self) -> Option<usize> {
        let next = (self.write + 1) % self.len;
        if next == self.read {
            None
        } else {
            Some(self.write * self.block_size)
        }
    }

    /// Commit the slot handed out by the last successful `alloc`.
    pub fn commit(&mut self) {
        self.write = (self.write + 1) % self.len;
    }

    /// Byte offset of the next slot to read from, or `None` if empty.
    pub fn peek(&self) -> Option<usize> {
        if self.read == self.write {
            None
        } else {
            Some(self.read * self.block_size)
        }
    }

    /// Advance the read cursor past up to `n` slots; returns how many were
    /// actually available to discard.
    pub fn discard(&mut self, n: usize) -> usize {
        let mut count = 0;
        while count < n {
            if self.read == self.write {
                break;
            }
            self.read = (self.read + 1) % self.len;
            count += 1;
        }
        count
    }

    /// Safe to call only from the producer side.
    pub fn clear_from_producer(&mut self) {
        self.write = self.read;
    }

    /// Safe to call only from the consumer side.
    pub fn clear_from_consumer(&mut self) {
        self.read = self.write;
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn is_full(&self) -> bool {
        (self.write + 1) % self.len == self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_commit_then_peek_discard_roundtrip() {
        let mut ring = RingControl::new(16, 64);
        assert!(ring.is_empty());
        let offset = ring.alloc().unwrap();
        assert_eq!(offset, 0);
        ring.commit();
        assert!(!ring.is_empty());

        assert_eq!(ring.peek(), Some(0));
        assert_eq!(ring.discard(1), 1);
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_reports_full_one_slot_early() {
        // 4 slots; one is always sacrificed to disambiguate full from empty.
        let mut ring = RingControl::new(16, 64);
        for _ in 0..3 {
            ring.alloc().unwrap();
            ring.commit();
        }
        assert!(ring.is_full());
        assert_eq!(ring.alloc(), None);
    }

    #[test]
    fn discard_past_available_stops_at_write_cursor() {
        let mut ring = RingControl::new(16, 64);
        ring.alloc().unwrap();
        ring.commit();
        assert_eq!(ring.discard(5), 1);
    }

    #[test]
    fn clear_from_consumer_catches_up_read_to_write() {
        let mut ring = RingControl::new(16, 64);
        ring.alloc().unwrap();
        ring.commit();
        ring.alloc().unwrap();
        ring.commit();
        ring.clear_from_consumer();
        assert!(ring.is_empty());
    }
}
