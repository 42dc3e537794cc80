//! A TAP-device `LinkDevice`, adapted from the teacher's
//! `phy::sys::tuntap_interface` (open `/dev/net/tun`, `TUNSETIFF`,
//! `SIOCGIFMTU`, `SIOCSIFFLAGS`) and its `phy::sys::wait` helper, collapsed
//! from the non-blocking token API into the blocking `LinkDevice` shape.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, RawFd};
use std::{mem, ptr};

use crate::error::{Error, Result};
use crate::time::Duration;
use crate::wire::{EthernetAddress, EthernetFrame};

use super::LinkDevice;

#[derive(Debug)]
pub struct TapDevice {
    fd: libc::c_int,
    mtu: usize,
    hardware_addr: EthernetAddress,
}

impl AsRawFd for TapDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

fn ifreq_for(name: &str) -> Result<libc::ifreq> {
    if name.len() >= libc::IF_NAMESIZE {
        return Err(Error::AddressInvalid);
    }
    let mut ifr = unsafe { MaybeUninit::<libc::ifreq>::zeroed().assume_init() };
    for (i, byte) in name.as_bytes().iter().enumerate() {
        ifr.ifr_name[i] = *byte as libc::c_char;
    }
    Ok(ifr)
}

fn ifreq_add_flags(ifr: &mut libc::ifreq, flags: &[libc::c_int]) {
    unsafe {
        ifr.ifr_ifru.ifru_flags = 0;
        for flag in flags {
            ifr.ifr_ifru.ifru_flags |= *flag as libc::c_short;
        }
    }
}

fn ifreq_ioctl(fd: libc::c_int, ifr: &mut libc::ifreq, cmd: libc::c_ulong) -> io::Result<libc::c_int> {
    let res = unsafe { libc::ioctl(fd, cmd as _, ifr as *mut libc::ifreq) };
    if res == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(res)
}

fn udp_control_socket() -> io::Result<libc::c_int> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_IP) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

impl TapDevice {
    /// Opens (or attaches to) the named TAP interface, brings it up and
    /// reads back its MTU.
    pub fn open(name: &str) -> Result<TapDevice> {
        let fd = unsafe {
            let fd = libc::open(
                "/dev/net/tun\0".as_ptr() as *const libc::c_char,
                libc::O_RDWR,
            );
            if fd == -1 {
                return Err(io::Error::last_os_error().into());
            }
            fd
        };

        let mut ifr = ifreq_for(name)?;
        ifreq_add_flags(&mut ifr, &[libc::IFF_TAP, libc::IFF_NO_PI]);
        if let Err(err) = ifreq_ioctl(fd, &mut ifr, libc::TUNSETIFF) {
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        let ctrl = udp_control_socket()?;
        let ip_mtu = match ifreq_ioctl(ctrl, &mut ifr, libc::SIOCGIFMTU) {
            Ok(mtu) => mtu as usize,
            Err(err) => {
                unsafe {
                    libc::close(ctrl);
                    libc::close(fd);
                }
                return Err(err.into());
            }
        };

        ifreq_add_flags(&mut ifr, &[libc::IFF_UP, libc::IFF_RUNNING]);
        let up = ifreq_ioctl(ctrl, &mut ifr, libc::SIOCSIFFLAGS);
        unsafe { libc::close(ctrl) };
        if let Err(err) = up {
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        let mtu = ip_mtu + EthernetFrame::<&[u8]>::header_len();
        let hardware_addr = Self::read_hardware_addr(name)?;

        Ok(TapDevice {
            fd,
            mtu,
            hardware_addr,
        })
    }

    fn read_hardware_addr(name: &str) -> Result<EthernetAddress> {
        let mut ifr = ifreq_for(name)?;
        let ctrl = udp_control_socket()?;
        let res = ifreq_ioctl(ctrl, &mut ifr, libc::SIOCGIFHWADDR);
        unsafe { libc::close(ctrl) };
        res?;
        let data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
        Ok(EthernetAddress([
            data[0] as u8,
            data[1] as u8,
            data[2] as u8,
            data[3] as u8,
            data[4] as u8,
            data[5] as u8,
        ]))
    }

    /// Blocks on `select()` for up to `timeout`, or indefinitely if `None`.
    fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        unsafe {
            let mut readfds = {
                let mut readfds = mem::MaybeUninit::<libc::fd_set>::uninit();
                libc::FD_ZERO(readfds.as_mut_ptr());
                libc::FD_SET(self.fd, readfds.as_mut_ptr());
                readfds.assume_init()
            };

            let mut timeout_val = libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            };
            let timeout_ptr = if let Some(duration) = timeout {
                let millis = duration.total_millis();
                timeout_val.tv_sec = (millis / 1000) as libc::time_t;
                timeout_val.tv_usec = ((millis % 1000) * 1_000) as libc::suseconds_t;
                &mut timeout_val as *mut _
            } else {
                ptr::null_mut()
            };

            let res = libc::select(
                self.fd + 1,
                &mut readfds,
                ptr::null_mut(),
                ptr::null_mut(),
                timeout_ptr,
            );
            if res == -1 {
                return Err(io::Error::last_os_error().into());
            }
            if res == 0 {
                return Err(Error::WouldBlock);
            }
            Ok(())
        }
    }
}

impl LinkDevice for TapDevice {
    fn hardware_addr(&self) -> EthernetAddress {
        self.hardware_addr
    }

    fn max_frame_len(&self) -> usize {
        self.mtu
    }

    fn receive(&mut self, timeout: Option<Duration>, buffer: &mut [u8]) -> Result<usize> {
        match self.wait(timeout) {
            Ok(()) => {}
            Err(Error::WouldBlock) => return Ok(0),
            Err(err) => return Err(err),
        }
        let len = unsafe {
            libc::read(
                self.fd,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };
        if len == -1 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(len as usize)
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize> {
        let len = unsafe {
            libc::write(self.fd, frame.as_ptr() as *const libc::c_void, frame.len())
        };
        if len == -1 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(len as usize)
    }
}

impl Drop for TapDevice {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
