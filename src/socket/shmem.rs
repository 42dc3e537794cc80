//! The mmap'd shared-memory region backing one socket: a control block
//! plus two SPSC rings (ingress: daemon to client, egress: client to
//! daemon), laid out the way `include/nstack_socket.h`'s `NSTACK_*_ADDR`
//! macros compute offsets into a single backing file.
//!
//! Like the original, the ring control blocks are mutated in place with
//! no atomics: by the ring's own invariant (`include/queue_r.h`), the
//! producer side only ever touches `write` and the consumer side only
//! ever touches `read`, so the two processes never race on the same
//! field. `#[repr(C)]` plus raw pointer arithmetic is used instead of
//! `bytemuck`/`zerocopy`, matching the teacher's `phy::tap` style of
//! driving `libc` directly rather than reaching for a crate abstraction.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::config::{NSTACK_DATAGRAM_BUF_SIZE, NSTACK_DATAGRAM_SIZE_MAX};
use crate::error::{Error, Result};
use crate::wire::Ipv4Address;

use super::ring::RingControl;
use super::SockAddr;

/// `struct nstack_sock_ctrl`: the PIDs the two sides signal on wakeup.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Ctrl {
    pub pid_inetd: libc::pid_t,
    pub pid_client: libc::pid_t,
}

/// In-memory twin of `struct queue_cb`, laid out so it can live directly in
/// the mapped region. The index arithmetic itself is
/// [`RingControl`]'s — this just round-trips its `usize`s through the
/// fixed-width `u64` fields the mapped file actually stores.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RawRing {
    block_size: u64,
    len: u64,
    write: u64,
    read: u64,
}

impl RawRing {
    fn init(block_size: usize, array_size: usize) -> RawRing {
        let ctl = RingControl::new(block_size, array_size);
        RawRing {
            block_size: ctl.block_size() as u64,
            len: ctl.slot_count() as u64,
            write: 0,
            read: 0,
        }
    }

    fn control(&self) -> RingControl {
        RingControl::from_raw(self.block_size as usize, self.len as usize, self.write as usize, self.read as usize)
    }

    fn alloc(&self) -> Option<usize> {
        self.control().alloc()
    }

    fn commit(&mut self) {
        let mut ctl = self.control();
        ctl.commit();
        self.write = ctl.write() as u64;
    }

    fn peek(&self) -> Option<usize> {
        self.control().peek()
    }

    fn discard(&mut self, n: usize) -> usize {
        let mut ctl = self.control();
        let discarded = ctl.discard(n);
        self.read = ctl.read() as u64;
        discarded
    }

    fn is_empty(&self) -> bool {
        self.control().is_empty()
    }
}

const DGRAM_HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8;
/// Max payload a slot can carry. The block holds the header *plus* a full
/// [`NSTACK_DATAGRAM_SIZE_MAX`]-byte datagram rather than packing the header
/// into that budget, so a 4096-byte `sendto` (the documented upper
/// boundary, §8) actually fits in one slot.
const DGRAM_BUF_CAP: usize = NSTACK_DATAGRAM_SIZE_MAX;
const DGRAM_BLOCK_LEN: usize = DGRAM_HEADER_LEN + NSTACK_DATAGRAM_SIZE_MAX;

/// One ring slot: matches `struct nstack_dgram`'s field order, sized to
/// [`DGRAM_BLOCK_LEN`] (header plus a full-size datagram) so a ring built
/// with that block size holds exactly one record per slot.
#[repr(C)]
struct DgramBlock {
    src_addr: u32,
    src_port: i32,
    dst_addr: u32,
    dst_port: i32,
    buf_size: u64,
    buf: [u8; DGRAM_BUF_CAP],
}

const _: () = assert!(mem::size_of::<DgramBlock>() == DGRAM_BLOCK_LEN);

fn sockaddr_to_raw(addr: SockAddr) -> (u32, i32) {
    (u32::from(addr.addr), addr.port as i32)
}

fn sockaddr_from_raw(addr: u32, port: i32) -> SockAddr {
    SockAddr {
        addr: Ipv4Address::from_bits(addr),
        port: port as u16,
    }
}

const CTRL_LEN: usize = mem::size_of::<Ctrl>();
const RING_LEN: usize = mem::size_of::<RawRing>();

/// Total region size for one socket, matching `NSTACK_SHMEM_SIZE`.
pub const REGION_LEN: usize =
    CTRL_LEN + 2 * RING_LEN + 2 * NSTACK_DATAGRAM_BUF_SIZE;

const INGRESS_RING_OFFSET: usize = CTRL_LEN;
const INGRESS_DATA_OFFSET: usize = INGRESS_RING_OFFSET + RING_LEN;
const EGRESS_RING_OFFSET: usize = INGRESS_DATA_OFFSET + NSTACK_DATAGRAM_BUF_SIZE;
const EGRESS_DATA_OFFSET: usize = EGRESS_RING_OFFSET + RING_LEN;

/// Which of the two rings an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Daemon producer, client consumer.
    Ingress,
    /// Client producer, daemon consumer.
    Egress,
}

impl Direction {
    fn ring_offset(self) -> usize {
        match self {
            Direction::Ingress => INGRESS_RING_OFFSET,
            Direction::Egress => EGRESS_RING_OFFSET,
        }
    }

    fn data_offset(self) -> usize {
        match self {
            Direction::Ingress => INGRESS_DATA_OFFSET,
            Direction::Egress => EGRESS_DATA_OFFSET,
        }
    }
}

/// A socket's mmap'd shared-memory region. Either side — daemon or client —
/// opens the same backing file and maps the same layout over it; only the
/// side that creates it zeroes and initializes the control block and rings.
pub struct Region {
    fd: RawFd,
    base: *mut u8,
}

impl Region {
    fn ring_ptr(&self, dir: Direction) -> *mut RawRing {
        unsafe { self.base.add(dir.ring_offset()) as *mut RawRing }
    }

    fn block_ptr(&self, dir: Direction, offset: usize) -> *mut DgramBlock {
        unsafe { self.base.add(dir.data_offset() + offset) as *mut DgramBlock }
    }

    fn map(fd: RawFd) -> Result<*mut u8> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                REGION_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        Ok(ptr as *mut u8)
    }

    /// Create and size the backing file, map it, and initialize the
    /// control block and both rings. This is the daemon side of what the
    /// original's `nstack_init` does inline in `main`.
    pub fn create(path: &str) -> Result<Region> {
        let cpath = CString::new(path).map_err(|_| Error::AddressInvalid)?;
        let fd = unsafe {
            libc::open(
                cpath.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
                0o600,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error().into());
        }
        if unsafe { libc::ftruncate(fd, REGION_LEN as libc::off_t) } == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        let base = match Self::map(fd) {
            Ok(base) => base,
            Err(err) => {
                unsafe { libc::close(fd) };
                return Err(err);
            }
        };

        let region = Region { fd, base };
        unsafe {
            ptr::write_bytes(base, 0, REGION_LEN);
            ptr::write(
                base as *mut Ctrl,
                Ctrl {
                    pid_inetd: libc::getpid(),
                    pid_client: 0,
                },
            );
            ptr::write(
                region.ring_ptr(Direction::Ingress),
                RawRing::init(DGRAM_BLOCK_LEN, NSTACK_DATAGRAM_BUF_SIZE),
            );
            ptr::write(
                region.ring_ptr(Direction::Egress),
                RawRing::init(DGRAM_BLOCK_LEN, NSTACK_DATAGRAM_BUF_SIZE),
            );
        }
        Ok(region)
    }

    /// Attach to an already-initialized region and record this process's
    /// PID as the client, matching `nstack_listen`.
    pub fn open_client(path: &str) -> Result<Region> {
        let cpath = CString::new(path).map_err(|_| Error::AddressInvalid)?;
        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR) };
        if fd == -1 {
            return Err(io::Error::last_os_error().into());
        }
        let base = match Self::map(fd) {
            Ok(base) => base,
            Err(err) => {
                unsafe { libc::close(fd) };
                return Err(err);
            }
        };
        let region = Region { fd, base };
        unsafe {
            (*(base as *mut Ctrl)).pid_client = libc::getpid();
        }
        Ok(region)
    }

    pub fn ctrl(&self) -> Ctrl {
        unsafe { ptr::read(self.base as *const Ctrl) }
    }

    pub fn set_pid_client(&self, pid: libc::pid_t) {
        unsafe {
            (*(self.base as *mut Ctrl)).pid_client = pid;
        }
    }

    /// Copy `payload` into the next free slot of `dir` and commit it,
    /// addressed `src -> dst`. Returns `Err(WouldBlock)` if the ring is
    /// full, matching the original's busy-wait loops being replaced by a
    /// single non-blocking attempt (the caller decides whether to retry).
    pub fn push(&self, dir: Direction, src: SockAddr, dst: SockAddr, payload: &[u8]) -> Result<()> {
        if payload.len() > DGRAM_BUF_CAP {
            return Err(Error::MessageTooLong);
        }
        let ring = unsafe { &mut *self.ring_ptr(dir) };
        let offset = ring.alloc().ok_or(Error::WouldBlock)?;
        let block = unsafe { &mut *self.block_ptr(dir, offset) };

        let (src_addr, src_port) = sockaddr_to_raw(src);
        let (dst_addr, dst_port) = sockaddr_to_raw(dst);
        block.src_addr = src_addr;
        block.src_port = src_port;
        block.dst_addr = dst_addr;
        block.dst_port = dst_port;
        block.buf_size = payload.len() as u64;
        block.buf[..payload.len()].copy_from_slice(payload);

        ring.commit();
        Ok(())
    }

    /// Peek the oldest queued datagram in `dir` without discarding it.
    pub fn peek(&self, dir: Direction) -> Option<(SockAddr, SockAddr, Vec<u8>)> {
        let ring = unsafe { &*self.ring_ptr(dir) };
        let offset = ring.peek()?;
        let block = unsafe { &*self.block_ptr(dir, offset) };
        let src = sockaddr_from_raw(block.src_addr, block.src_port);
        let dst = sockaddr_from_raw(block.dst_addr, block.dst_port);
        let len = (block.buf_size as usize).min(DGRAM_BUF_CAP);
        Some((src, dst, block.buf[..len].to_vec()))
    }

    pub fn discard(&self, dir: Direction, n: usize) -> usize {
        let ring = unsafe { &mut *self.ring_ptr(dir) };
        ring.discard(n)
    }

    pub fn is_empty(&self, dir: Direction) -> bool {
        let ring = unsafe { &*self.ring_ptr(dir) };
        ring.is_empty()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, REGION_LEN);
            libc::close(self.fd);
        }
    }
}

// `Region` wraps a raw mmap'd pointer that this process alone dereferences
// through `&self`/`&mut` borrows scoped to each call; sharing it across
// threads is the caller's responsibility (the daemon drives it from the
// ingress/egress workers under the same synchronization the original's
// `nstack_sock` array relies on: one ring direction per thread).
unsafe impl Send for Region {}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8, port: u16) -> SockAddr {
        SockAddr {
            addr: Ipv4Address::new(10, 0, 0, last),
            port,
        }
    }

    #[test]
    fn create_then_push_and_peek_roundtrip() {
        let path = format!("/tmp/nstack-shmem-test-{}", std::process::id());
        let region = Region::create(&path).unwrap();
        assert_eq!(region.ctrl().pid_inetd, unsafe { libc::getpid() });

        region
            .push(Direction::Ingress, addr(1, 10), addr(2, 20), b"hello")
            .unwrap();
        let (src, dst, payload) = region.peek(Direction::Ingress).unwrap();
        assert_eq!(src, addr(1, 10));
        assert_eq!(dst, addr(2, 20));
        assert_eq!(payload, b"hello");

        assert_eq!(region.discard(Direction::Ingress, 1), 1);
        assert!(region.is_empty(Direction::Ingress));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let path = format!("/tmp/nstack-shmem-test-oversize-{}", std::process::id());
        let region = Region::create(&path).unwrap();
        let big = vec![0u8; DGRAM_BUF_CAP + 1];
        assert_eq!(
            region.push(Direction::Egress, addr(1, 1), addr(2, 2), &big),
            Err(Error::MessageTooLong)
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn a_full_size_datagram_fits_in_one_slot() {
        let path = format!("/tmp/nstack-shmem-test-fullsize-{}", std::process::id());
        let region = Region::create(&path).unwrap();
        let full = vec![0x42u8; NSTACK_DATAGRAM_SIZE_MAX];
        region
            .push(Direction::Egress, addr(1, 1), addr(2, 2), &full)
            .unwrap();
        let (_, _, payload) = region.peek(Direction::Egress).unwrap();
        assert_eq!(payload.len(), NSTACK_DATAGRAM_SIZE_MAX);
        std::fs::remove_file(&path).ok();
    }
}
