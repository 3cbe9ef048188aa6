use std::io;
use std::sync::atomic::{
    AtomicI32,
    AtomicUsize,
    Ordering,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::dev::{
    encode_frame,
    flags,
    Device,
    Flags,
    Handle,
    Kind,
    RxFrame,
};
use crate::core::repr::{
    EthernetAddress,
    EthernetFrame,
    EthernetRepr,
};
use crate::linux::libc as _libc;
use crate::{
    Error,
    Result,
};

/// [TAP interface](https://www.kernel.org/doc/Documentation/networking/tuntap.txt)
/// for sending and receiving raw ethernet frames.
///
/// Reads are driven by a level triggered epoll instance, so every wake reads
/// a single frame and anything left behind wakes the next poll.
pub struct Tap {
    name: String,
    flags: Flags,
    addr: Mutex<EthernetAddress>,
    addr_override: Option<EthernetAddress>,
    mtu: AtomicUsize,
    mtu_override: Option<usize>,
    fd: AtomicI32,
    epfd: AtomicI32,
}

impl Tap {
    /// Creates a TAP device bound to the interface name once opened.
    ///
    /// Unless overridden, the link address and MTU are read from the kernel
    /// when the device is opened.
    pub fn new(name: &str, addr: Option<EthernetAddress>, mtu: Option<usize>) -> Tap {
        Tap {
            name: name.to_string(),
            flags: Flags::new(flags::BROADCAST | flags::NEEDS_ARP),
            addr: Mutex::new(addr.unwrap_or(EthernetAddress::ZERO)),
            addr_override: addr,
            mtu: AtomicUsize::new(mtu.unwrap_or(EthernetFrame::<&[u8]>::MAX_PAYLOAD_LEN)),
            mtu_override: mtu,
            fd: AtomicI32::new(-1),
            epfd: AtomicI32::new(-1),
        }
    }

    fn set_addr(&self, addr: EthernetAddress) {
        match self.addr.lock() {
            Ok(mut guard) => *guard = addr,
            Err(err) => *err.into_inner() = addr,
        }
    }

    /// Attaches to the TAP interface, returning its descriptor.
    fn attach(&self) -> Result<i32> {
        let mut ifreq = _libc::IfReq::with_name(&self.name).map_err(Error::CantConfigureResource)?;

        let fd = _libc::open_tun().map_err(Error::CantOpenResource)?;

        ifreq.set_flags(_libc::IFF_TAP | _libc::IFF_NO_PI);
        if let Err(err) = _libc::ioctl(fd, _libc::TUNSETIFF, &mut ifreq) {
            _libc::close(fd);
            return Err(Error::CantConfigureResource(err));
        }

        Ok(fd)
    }

    /// Reads the kernel's view of the interface and brings the link up.
    fn configure(&self) -> Result<()> {
        let sockfd = _libc::control_socket().map_err(Error::CantCreateEndpoint)?;
        let result = self.configure_with(sockfd);
        _libc::close(sockfd);
        result.map_err(Error::CantConfigureResource)
    }

    fn configure_with(&self, sockfd: i32) -> io::Result<()> {
        let ifreq = _libc::IfReq::with_name(&self.name)?;

        let mut hw_ifreq = ifreq;
        _libc::ioctl(sockfd, _libc::SIOCGIFHWADDR, &mut hw_ifreq)?;
        match self.addr_override {
            Some(addr) => self.set_addr(addr),
            None if hw_ifreq.hw_family() == _libc::ARPHRD_ETHER => {
                self.set_addr(EthernetAddress::new(hw_ifreq.hw_addr()))
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} has no Ethernet address", self.name),
                ))
            }
        }

        let mut mtu_ifreq = ifreq;
        _libc::ioctl(sockfd, _libc::SIOCGIFMTU, &mut mtu_ifreq)?;
        let mtu = match self.mtu_override {
            Some(mtu) => mtu,
            None => mtu_ifreq.mtu() as usize,
        };
        self.mtu.store(mtu, Ordering::SeqCst);

        let mut flags_ifreq = ifreq;
        _libc::ioctl(sockfd, _libc::SIOCGIFFLAGS, &mut flags_ifreq)?;
        if flags_ifreq.flags() & _libc::IFF_UP == 0 {
            let flags = flags_ifreq.flags() | _libc::IFF_UP;
            flags_ifreq.set_flags(flags);
            _libc::ioctl(sockfd, _libc::SIOCSIFFLAGS, &mut flags_ifreq)?;
        }

        Ok(())
    }

    fn release(&self) -> bool {
        let fd = self.fd.swap(-1, Ordering::SeqCst);
        let epfd = self.epfd.swap(-1, Ordering::SeqCst);

        if epfd >= 0 {
            _libc::close(epfd);
        }

        if fd >= 0 {
            _libc::close(fd);
            true
        } else {
            false
        }
    }
}

impl Device for Tap {
    fn kind(&self) -> Kind {
        Kind::Ethernet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn addr(&self) -> EthernetAddress {
        match self.addr.lock() {
            Ok(addr) => *addr,
            Err(err) => *err.into_inner(),
        }
    }

    fn flags(&self) -> u16 {
        self.flags.get()
    }

    fn mtu(&self) -> usize {
        self.mtu.load(Ordering::SeqCst)
    }

    fn handle(&self) -> Handle {
        let fd = self.fd.load(Ordering::SeqCst);

        Handle {
            fd: if fd >= 0 { Some(fd) } else { None },
            name: self.name.clone(),
        }
    }

    fn open(&self) -> Result<()> {
        if self.is_up() {
            return Err(Error::AlreadyOpened);
        }

        let fd = self.attach()?;

        if let Err(err) = self.configure() {
            _libc::close(fd);
            return Err(err);
        }

        let epfd = match _libc::epoll_for_input(fd) {
            Ok(epfd) => epfd,
            Err(err) => {
                _libc::close(fd);
                return Err(Error::CantCreateReadinessInstance(err));
            }
        };

        self.fd.store(fd, Ordering::SeqCst);
        self.epfd.store(epfd, Ordering::SeqCst);

        if let Err(err) = self.flags.try_up() {
            self.release();
            return Err(err);
        }

        info!(
            "TAP {} attached (fd {}, {}, MTU {}).",
            self.name,
            fd,
            self.addr(),
            self.mtu()
        );

        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.is_up() {
            return Err(Error::DeviceNotOpened);
        }

        self.flags.clear(flags::UP);
        self.release();
        debug!("TAP {} closed.", self.name);
        Ok(())
    }

    fn up(&self) {
        self.flags.set(flags::UP);
    }

    fn down(&self) {
        self.flags.clear(flags::UP);
    }

    fn poll(&self, timeout: Duration) -> Result<Option<RxFrame>> {
        let (fd, epfd) = (self.fd.load(Ordering::SeqCst), self.epfd.load(Ordering::SeqCst));
        if fd < 0 || epfd < 0 {
            return Err(Error::DeviceNotOpened);
        }

        if _libc::epoll_wait(epfd, timeout)? == 0 {
            return Ok(None);
        }

        let mut buffer = vec![0; EthernetFrame::<&[u8]>::HEADER_LEN + self.mtu()];
        let read = match _libc::read(fd, &mut buffer) {
            Ok(read) => read,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match EthernetRepr::decode(&buffer[.. read], self.addr()) {
            Ok((header, payload)) => Ok(Some(RxFrame {
                header,
                payload: payload.to_vec(),
            })),
            Err(Error::NoDataToRead) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn transmit(&self, dst_addr: EthernetAddress, payload: &[u8], ethertype: u16) -> Result<()> {
        let frame = encode_frame(self, dst_addr, payload, ethertype)?;

        let fd = self.fd.load(Ordering::SeqCst);
        if fd < 0 {
            return Err(Error::DeviceNotOpened);
        }

        match _libc::write(fd, &frame) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Err(Error::Exhausted),
            Err(err) => Err(Error::SyscallError(err)),
        }
    }
}

impl Drop for Tap {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_tap() {
        let addr = EthernetAddress::new([0x06, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let tap = Tap::new("tap0", Some(addr), None);

        assert_eq!(tap.kind(), Kind::Ethernet);
        assert_eq!(tap.addr(), addr);
        assert_eq!(tap.mtu(), 1500);
        assert_eq!(tap.handle().fd, None);
        assert_eq!(tap.flags() & flags::NEEDS_ARP, flags::NEEDS_ARP);
        assert!(!tap.is_up());

        assert_matches!(tap.close(), Err(Error::DeviceNotOpened));
        assert_matches!(tap.poll(Duration::from_millis(1)), Err(Error::DeviceNotOpened));
        assert_matches!(
            tap.transmit(EthernetAddress::BROADCAST, &[0; 4], 0x0800),
            Err(Error::DeviceNotOpened)
        );
    }

    #[test]
    fn test_bad_name() {
        let tap = Tap::new("a-name-too-long-x", None, None);
        assert_matches!(tap.open(), Err(Error::CantConfigureResource(_)));
        assert!(!tap.is_up());
    }
}
