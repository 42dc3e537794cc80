//! The daemon scheduler (§4.11, §5): the ingress/egress worker pair that
//! drives a [`Stack`] from the `inetd` binary.
//!
//! Grounded in `nstack.c`'s `nstack_ingress_thread`/`nstack_egress_thread`/
//! `nstack_start`/`nstack_stop`: the ingress worker blocks on the link with
//! a timeout that doubles as the periodic-tick pulse, the egress worker
//! blocks on `SIGUSR2` (the same signal client `sendto` raises) with the
//! same timeout, and both poll a shared state variable between operations
//! to notice a shutdown request. The original's static globals
//! (`nstack_state`, `ether_handle`, the `sockets[]` table) become fields
//! threaded through `Arc`/`Mutex` here instead, per §9's "mutable global
//! tables" note — nothing stops a test from standing up two `Daemon`s.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::config::NSTACK_PERIODIC_EVENT_SEC;
use crate::error::Result;
use crate::phy::LinkDevice;
use crate::route::Route;
use crate::socket::SockAddr;
use crate::stack::Stack;
use crate::time::{Duration, Instant};

/// The largest frame the ingress worker will ever read in one `receive`
/// call. The original sizes `rx_buffer` to `ETHER_MAXLEN`; this is the same
/// idea with headroom for a jumbogram-free Ethernet II frame.
const RX_BUFFER_LEN: usize = 65536;

/// Mirrors `enum nstack_state`: whether the ingress/egress workers are
/// running. Stored as a plain `u8` behind an `AtomicU8` so both worker
/// threads and the owning `Daemon` can read/write it without a `Mutex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Running = 1,
    Dying = 2,
}

impl From<u8> for RunState {
    fn from(value: u8) -> RunState {
        match value {
            0 => RunState::Stopped,
            1 => RunState::Running,
            _ => RunState::Dying,
        }
    }
}

/// Owns a [`Stack`] and the two worker threads that drive it. `Daemon`
/// itself is the single-process equivalent of `nstack_start`/`nstack_stop`:
/// callers configure the stack (routes, bound sockets) before [`Daemon::start`],
/// then run until a shutdown signal calls [`Daemon::stop`].
pub struct Daemon {
    stack: Arc<Mutex<Stack>>,
    state: Arc<AtomicU8>,
    ingress: Option<JoinHandle<()>>,
    egress: Option<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(device: Box<dyn LinkDevice + Send>) -> Daemon {
        Daemon {
            stack: Arc::new(Mutex::new(Stack::new(device))),
            state: Arc::new(AtomicU8::new(RunState::Stopped as u8)),
            ingress: None,
            egress: None,
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from(self.state.load(Ordering::SeqCst))
    }

    /// Install the interface's route and announce it, matching `ip_config`'s
    /// call in `main` before `nstack_start`.
    pub fn configure_interface(&self, route: Route) -> Result<()> {
        self.stack.lock().unwrap().configure_interface(route)
    }

    /// Bind a UDP socket's shared-memory file, matching a `XIP_PROTO_UDP`
    /// row of the original's static `sockets[]` table.
    pub fn bind_udp(&self, path: &str, local: SockAddr) -> Result<()> {
        self.stack.lock().unwrap().bind_udp(path, local)
    }

    /// Mark `local` as accepting passive TCP opens.
    pub fn listen_tcp(&self, local: SockAddr) -> Result<()> {
        self.stack.lock().unwrap().listen_tcp(local)
    }

    /// Spawn the ingress and egress workers, matching `nstack_start`.
    /// Fails with [`crate::error::Error::AlreadyInProgress`] if the daemon
    /// is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != RunState::Stopped {
            return Err(crate::error::Error::AlreadyInProgress);
        }

        let tick = Duration::from_secs(NSTACK_PERIODIC_EVENT_SEC);

        let ingress_stack = Arc::clone(&self.stack);
        let ingress_state = Arc::clone(&self.state);
        self.ingress = Some(std::thread::spawn(move || {
            run_ingress(ingress_stack, ingress_state, tick)
        }));

        let egress_stack = Arc::clone(&self.stack);
        let egress_state = Arc::clone(&self.state);
        self.egress = Some(std::thread::spawn(move || {
            run_egress(egress_stack, egress_state, tick)
        }));

        self.state.store(RunState::Running as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Request shutdown and block until both workers have exited, matching
    /// `nstack_stop`.
    pub fn stop(&mut self) {
        self.state.store(RunState::Dying as u8, Ordering::SeqCst);

        if let Some(handle) = self.ingress.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.egress.take() {
            let _ = handle.join();
        }

        self.state.store(RunState::Stopped as u8, Ordering::SeqCst);
    }
}

/// `nstack_ingress_thread`: block on the link, process whatever arrives,
/// and run the periodic tasks once `tick` has elapsed since the last run.
fn run_ingress(stack: Arc<Mutex<Stack>>, state: Arc<AtomicU8>, tick: Duration) {
    let mut rx_buffer = vec![0u8; RX_BUFFER_LEN];
    let mut last_tick = Instant::now();

    loop {
        log::debug!("ingress: waiting for rx");
        {
            let mut guard = stack.lock().unwrap();
            match guard.poll(Some(tick), &mut rx_buffer) {
                Ok(()) => {}
                Err(err) => log::error!("ingress: rx failed: {err}"),
            }

            let now = Instant::now();
            if now - last_tick >= tick {
                log::debug!("ingress: tick");
                if let Err(err) = guard.run_periodic_tasks() {
                    log::error!("ingress: periodic task failed: {err}");
                }
                last_tick = now;
            }
        }

        if RunState::from(state.load(Ordering::SeqCst)) == RunState::Dying {
            break;
        }
    }
}

/// `nstack_egress_thread`: block on `SIGUSR2` (with the tick period as a
/// timeout so a shutdown request is noticed promptly even with no traffic),
/// then drain every bound socket's egress queue.
fn run_egress(stack: Arc<Mutex<Stack>>, state: Arc<AtomicU8>, tick: Duration) {
    if let Err(err) = block_sigusr2() {
        log::error!("egress: unable to block SIGUSR2: {err}");
        return;
    }

    loop {
        wait_sigusr2(tick);

        {
            let mut guard = stack.lock().unwrap();
            if let Err(err) = guard.drain_egress() {
                log::error!("egress: failed to send a datagram: {err}");
            }
        }

        if RunState::from(state.load(Ordering::SeqCst)) == RunState::Dying {
            break;
        }
    }
}

fn block_sigusr2() -> std::io::Result<()> {
    unsafe {
        let mut sigset = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(sigset.as_mut_ptr());
        libc::sigaddset(sigset.as_mut_ptr(), libc::SIGUSR2);
        if libc::pthread_sigmask(libc::SIG_BLOCK, sigset.as_ptr(), std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Waits for `SIGUSR2` for up to `timeout`, matching the original's
/// `sigtimedwait`. The return value (signal caught, or timed out) doesn't
/// matter to the caller: either way it's time to check the egress rings
/// again.
fn wait_sigusr2(timeout: Duration) {
    unsafe {
        let mut sigset = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(sigset.as_mut_ptr());
        libc::sigaddset(sigset.as_mut_ptr(), libc::SIGUSR2);

        let spec = libc::timespec {
            tv_sec: (timeout.total_millis() / 1000) as libc::time_t,
            tv_nsec: ((timeout.total_millis() % 1000) * 1_000_000) as libc::c_long,
        };
        libc::sigtimedwait(sigset.as_ptr(), std::ptr::null_mut(), &spec);
    }
}
