//! The client side of the socket API: what a process talking to `inetd`
//! links against. Reimplements `nstack_listen`/`nstack_recvfrom`/
//! `nstack_sendto` from `src/socket.c`.

use std::mem::MaybeUninit;
use std::time::Duration as StdDuration;

use crate::error::{Error, Result};

use super::shmem::{Direction, Region};
use super::SockAddr;

/// Set on `recvfrom` to return the queued datagram without discarding it.
pub const MSG_PEEK: i32 = 0x1;

/// A socket handle from the client side: the mmap'd region plus the
/// signal mask `recvfrom` waits on.
pub struct ClientSocket {
    region: Region,
}

fn block_sigusr2() -> Result<()> {
    unsafe {
        let mut sigset = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(sigset.as_mut_ptr());
        libc::sigaddset(sigset.as_mut_ptr(), libc::SIGUSR2);
        if libc::pthread_sigmask(libc::SIG_BLOCK, sigset.as_ptr(), std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}

/// Attach to the socket whose shared-memory file lives at `socket_path`.
/// Blocks `SIGUSR2` for the calling thread, matching the original so the
/// signal doesn't terminate the process by default before `recvfrom` gets
/// a chance to wait on it.
pub fn listen(socket_path: &str) -> Result<ClientSocket> {
    let region = Region::open_client(socket_path)?;
    block_sigusr2()?;
    Ok(ClientSocket { region })
}

impl ClientSocket {
    /// Wait (up to `NSTACK_PERIODIC_EVENT_SEC` per attempt, matching the
    /// original's `sigtimedwait` timeout) for a datagram and copy up to
    /// `buffer.len()` bytes of it into `buffer`. Returns the number of
    /// bytes copied and the sender's address.
    pub fn recv_from(&self, buffer: &mut [u8], flags: i32) -> Result<(usize, SockAddr)> {
        let timeout = libc::timespec {
            tv_sec: crate::config::NSTACK_PERIODIC_EVENT_SEC as libc::time_t,
            tv_nsec: 0,
        };

        loop {
            if let Some((src, _dst, payload)) = self.region.peek(Direction::Ingress) {
                let n = buffer.len().min(payload.len());
                buffer[..n].copy_from_slice(&payload[..n]);
                if flags & MSG_PEEK == 0 {
                    self.region.discard(Direction::Ingress, 1);
                }
                return Ok((n, src));
            }

            unsafe {
                let mut sigset = MaybeUninit::<libc::sigset_t>::uninit();
                libc::sigemptyset(sigset.as_mut_ptr());
                libc::sigaddset(sigset.as_mut_ptr(), libc::SIGUSR2);
                libc::sigtimedwait(sigset.as_ptr(), std::ptr::null_mut(), &timeout);
            }
        }
    }

    /// Enqueue `buffer` for the daemon to transmit to `dest`. The egress
    /// ring is drained by the daemon's egress worker, not synchronously by
    /// this call. Unlike the original's unbounded `while (queue_alloc() ==
    /// -1);` spin, a full ring is retried with a short sleep between
    /// attempts rather than burning a core solid.
    pub fn send_to(&self, buffer: &[u8], dest: SockAddr) -> Result<usize> {
        if buffer.len() > crate::config::NSTACK_DATAGRAM_SIZE_MAX {
            return Err(Error::MessageTooLong);
        }

        let zero = SockAddr {
            addr: crate::wire::Ipv4Address::new(0, 0, 0, 0),
            port: 0,
        };
        loop {
            match self.region.push(Direction::Egress, zero, dest, buffer) {
                Ok(()) => break,
                Err(Error::WouldBlock) => std::thread::sleep(StdDuration::from_millis(1)),
                Err(err) => return Err(err),
            }
        }

        let pid_inetd = self.region.ctrl().pid_inetd;
        unsafe {
            libc::kill(pid_inetd, libc::SIGUSR2);
        }
        Ok(buffer.len())
    }
}
