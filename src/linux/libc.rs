//! Thin wrappers over the system calls behind a TAP device.
//!
//! `ifreq` is handled as a plain byte buffer with accessors for the fields
//! this crate touches rather than as an overlaid C struct.

use std::io;
use std::time::Duration;

use byteorder::{
    ByteOrder,
    NativeEndian,
};

pub const IFF_UP: libc::c_short = 0x0001;

pub const IFF_TAP: libc::c_short = 0x0002;

pub const IFF_NO_PI: libc::c_short = 0x1000;

pub const TUNSETIFF: libc::c_ulong = 0x400454CA;

pub const SIOCGIFFLAGS: libc::c_ulong = 0x8913;

pub const SIOCSIFFLAGS: libc::c_ulong = 0x8914;

pub const SIOCGIFMTU: libc::c_ulong = 0x8921;

pub const SIOCGIFHWADDR: libc::c_ulong = 0x8927;

pub const ARPHRD_ETHER: u16 = 1;

/// [https://linux.die.net/man/7/netdevice](https://linux.die.net/man/7/netdevice)
mod fields {
    use std::ops::Range;

    pub const NAME: Range<usize> = 0 .. 16;

    /// ifr_flags, a short.
    pub const FLAGS: Range<usize> = 16 .. 18;

    /// ifr_mtu, an int sharing the union with ifr_flags.
    pub const MTU: Range<usize> = 16 .. 20;

    /// sa_family of ifr_hwaddr.
    pub const HW_FAMILY: Range<usize> = 16 .. 18;

    /// First six bytes of sa_data of ifr_hwaddr.
    pub const HW_ADDR: Range<usize> = 18 .. 24;
}

/// A `struct ifreq` as raw bytes.
#[derive(Clone, Copy)]
pub struct IfReq([u8; IfReq::LEN]);

impl IfReq {
    pub const LEN: usize = 40;

    /// Creates a request for an interface name, which must leave room for the
    /// terminating NUL.
    pub fn with_name(name: &str) -> io::Result<IfReq> {
        if name.is_empty() || name.len() >= libc::IF_NAMESIZE || name.contains('\0') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid interface name {:?}", name),
            ));
        }

        let mut ifreq = IfReq([0; IfReq::LEN]);
        ifreq.0[fields::NAME][.. name.len()].copy_from_slice(name.as_bytes());
        Ok(ifreq)
    }

    pub fn name(&self) -> String {
        let name = &self.0[fields::NAME];
        let len = name.iter().position(|c| *c == 0).unwrap_or(name.len());
        String::from_utf8_lossy(&name[.. len]).into_owned()
    }

    pub fn flags(&self) -> libc::c_short {
        NativeEndian::read_i16(&self.0[fields::FLAGS])
    }

    pub fn set_flags(&mut self, flags: libc::c_short) {
        NativeEndian::write_i16(&mut self.0[fields::FLAGS], flags);
    }

    pub fn mtu(&self) -> libc::c_int {
        NativeEndian::read_i32(&self.0[fields::MTU])
    }

    pub fn hw_family(&self) -> u16 {
        NativeEndian::read_u16(&self.0[fields::HW_FAMILY])
    }

    pub fn hw_addr(&self) -> [u8; 6] {
        let mut addr = [0; 6];
        addr.copy_from_slice(&self.0[fields::HW_ADDR]);
        addr
    }

    fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.0.as_mut_ptr() as *mut libc::c_void
    }
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Opens the TUN/TAP clone device in non-blocking mode.
pub fn open_tun() -> io::Result<libc::c_int> {
    cvt(unsafe {
        libc::open(
            "/dev/net/tun\0".as_ptr() as *const libc::c_char,
            libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    })
}

pub fn ioctl(fd: libc::c_int, request: libc::c_ulong, ifreq: &mut IfReq) -> io::Result<()> {
    // The request type differs between libc flavours.
    cvt(unsafe { libc::ioctl(fd, request as _, ifreq.as_mut_ptr()) }).map(|_| ())
}

/// Opens a socket for interface ioctls.
pub fn control_socket() -> io::Result<libc::c_int> {
    cvt(unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) })
}

pub fn close(fd: libc::c_int) {
    unsafe {
        libc::close(fd);
    }
}

/// Creates an epoll instance watching fd for input, level triggered.
pub fn epoll_for_input(fd: libc::c_int) -> io::Result<libc::c_int> {
    let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;

    let mut event = libc::epoll_event {
        events: libc::EPOLLIN as u32,
        u64: fd as u64,
    };

    if let Err(err) = cvt(unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, fd, &mut event) }) {
        close(epfd);
        return Err(err);
    }

    Ok(epfd)
}

/// Waits up to timeout for readiness, returning the number of ready
/// descriptors.
pub fn epoll_wait(epfd: libc::c_int, timeout: Duration) -> io::Result<usize> {
    let mut event = libc::epoll_event { events: 0, u64: 0 };
    let timeout_ms = timeout.as_millis().min(libc::c_int::max_value() as u128) as libc::c_int;

    cvt(unsafe { libc::epoll_wait(epfd, &mut event, 1, timeout_ms) }).map(|n| n as usize)
}

pub fn read(fd: libc::c_int, buffer: &mut [u8]) -> io::Result<usize> {
    cvt_size(unsafe {
        libc::read(
            fd,
            buffer.as_mut_ptr() as *mut libc::c_void,
            buffer.len(),
        )
    })
}

pub fn write(fd: libc::c_int, buffer: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe {
        libc::write(
            fd,
            buffer.as_ptr() as *const libc::c_void,
            buffer.len(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifreq_name() {
        let ifreq = IfReq::with_name("tap0").unwrap();
        assert_eq!(ifreq.name(), "tap0");
        assert_eq!(&ifreq.0[.. 5], b"tap0\0");

        assert!(IfReq::with_name("").is_err());
        assert!(IfReq::with_name("a-name-too-long-x").is_err());
        assert!(IfReq::with_name("exactly15chars_").is_ok());
    }

    #[test]
    fn test_ifreq_union_fields() {
        let mut ifreq = IfReq::with_name("tap0").unwrap();
        ifreq.set_flags(IFF_TAP | IFF_NO_PI);
        assert_eq!(ifreq.flags(), 0x1002);

        ifreq.0[18 .. 24].copy_from_slice(&[6, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(ifreq.hw_addr(), [6, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(ifreq.name(), "tap0");
    }
}
