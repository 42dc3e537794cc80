//! The `inetd` daemon binary (§6 CLI surface).
//!
//! Grounded in `nstack.c:main`: block `SIGUSR1` for the whole process
//! before spinning up any threads, bring up the link device and its IP
//! configuration, start the daemon's two workers, then `sigwaitinfo` for
//! the shutdown signal before tearing everything down.

use std::mem::MaybeUninit;
use std::process;

use getopts::Options;

use nstack::daemon::Daemon;
use nstack::phy::tap::TapDevice;
use nstack::route::Route;
use nstack::socket::SockAddr;
use nstack::wire::Ipv4Address;

/// The interface address/netmask and UDP socket this daemon brings up,
/// matching `nstack.c`'s hardcoded `ip_config(handle, 167772162,
/// 4294967040)` call and its single `sockets[]` entry (`10.0.0.2:10`,
/// `/tmp/unetcat.sock`).
const IFACE_ADDR: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
const IFACE_NETMASK: Ipv4Address = Ipv4Address::new(255, 255, 255, 0);
const UDP_SOCK_ADDR: SockAddr = SockAddr {
    addr: IFACE_ADDR,
    port: 10,
};
const UDP_SOCK_PATH: &str = "/tmp/nstack-unetcat.sock";

fn usage(program: &str, opts: &Options) -> String {
    opts.usage(&format!("Usage: {program} INTERFACE"))
}

/// Blocks `SIGUSR1` for every thread this process will ever spawn (the
/// mask is inherited by `std::thread::spawn`), matching `main`'s
/// `sigprocmask(SIG_SETMASK, &sigset, NULL)` call before `nstack_start`.
fn block_sigusr1() -> std::io::Result<libc::sigset_t> {
    unsafe {
        let mut sigset = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(sigset.as_mut_ptr());
        libc::sigaddset(sigset.as_mut_ptr(), libc::SIGUSR1);
        let sigset = sigset.assume_init();
        if libc::sigprocmask(libc::SIG_SETMASK, &sigset, std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(sigset)
    }
}

fn wait_for_sigusr1(sigset: &libc::sigset_t) {
    unsafe {
        libc::sigwaitinfo(sigset, std::ptr::null_mut());
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{err}");
            eprint!("{}", usage(&program, &opts));
            process::exit(1);
        }
    };

    if matches.opt_present("h") || matches.free.is_empty() {
        eprint!("{}", usage(&program, &opts));
        process::exit(1);
    }
    let interface = &matches.free[0];

    let sigset = match block_sigusr1() {
        Ok(sigset) => sigset,
        Err(err) => {
            eprintln!("Failed to block SIGUSR1: {err}");
            process::exit(1);
        }
    };

    let device = match TapDevice::open(interface) {
        Ok(device) => device,
        Err(err) => {
            eprintln!("Failed to init {interface}: {err}");
            process::exit(1);
        }
    };

    let mut daemon = Daemon::new(Box::new(device));

    let network = Ipv4Address::from_bits(u32::from(IFACE_ADDR) & u32::from(IFACE_NETMASK));
    let route = Route {
        network,
        netmask: IFACE_NETMASK,
        gateway: Ipv4Address::new(0, 0, 0, 0),
        iface_addr: IFACE_ADDR,
        iface_handle: 0,
    };
    if let Err(err) = daemon.configure_interface(route) {
        eprintln!("Failed to config IP: {err}");
        process::exit(1);
    }
    if let Err(err) = daemon.bind_udp(UDP_SOCK_PATH, UDP_SOCK_ADDR) {
        eprintln!("Failed to bind a socket: {err}");
        process::exit(1);
    }

    if let Err(err) = daemon.start() {
        eprintln!("Failed to start the IP stack: {err}");
        process::exit(1);
    }

    wait_for_sigusr1(&sigset);

    eprintln!("Stopping the IP stack...");
    daemon.stop();
}
