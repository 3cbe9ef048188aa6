//! Network device abstraction.
//!
//! A device moves raw Ethernet frames between the stack and the outside
//! world. Devices are shared between the polling worker, which reads frames,
//! and the ARP and IP stages, which transmit, so every method takes `&self`
//! and implementations keep their mutable state behind short critical
//! sections.

use std::fmt;
use std::sync::atomic::{
    AtomicU16,
    Ordering,
};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{
    self,
    Receiver,
    RecvTimeoutError,
    Sender,
    TrySendError,
};

use crate::core::repr::{
    EthernetAddress,
    EthernetRepr,
};
use crate::{
    Error,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Ethernet,
    Loopback,
    Null,
}

/// Device flags, loosely following Linux `IFF_*` semantics.
pub mod flags {
    pub const UP: u16 = 0x0001;

    pub const BROADCAST: u16 = 0x0002;

    pub const LOOPBACK: u16 = 0x0008;

    pub const NEEDS_ARP: u16 = 0x0100;
}

/// The OS resource behind a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handle {
    /// File descriptor, if the device holds one.
    pub fd: Option<i32>,
    pub name: String,
}

/// A decoded frame addressed to a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxFrame {
    pub header: EthernetRepr,
    pub payload: Vec<u8>,
}

/// A network interface card, virtual or otherwise.
pub trait Device: Send + Sync {
    fn kind(&self) -> Kind;

    /// Name of the device, unique within a repository.
    fn name(&self) -> &str;

    /// Link layer address of the device.
    fn addr(&self) -> EthernetAddress;

    fn flags(&self) -> u16;

    /// Largest payload in bytes the device can carry in one frame.
    fn mtu(&self) -> usize;

    fn handle(&self) -> Handle;

    /// Acquires the underlying resource and brings the device up.
    fn open(&self) -> Result<()>;

    /// Releases the underlying resource and brings the device down.
    fn close(&self) -> Result<()>;

    fn up(&self);

    fn down(&self);

    fn is_up(&self) -> bool {
        self.flags() & flags::UP != 0
    }

    /// Waits up to timeout for a frame and decodes it.
    ///
    /// Returns `Ok(None)` on timeout or when the frame is addressed to some
    /// other station. `Error::Interrupted` is not fatal and the caller should
    /// just poll again.
    fn poll(&self, timeout: Duration) -> Result<Option<RxFrame>>;

    /// Encodes and writes one frame.
    fn transmit(&self, dst_addr: EthernetAddress, payload: &[u8], ethertype: u16) -> Result<()>;

    /// Devices are identified by name.
    fn equal(&self, other: &dyn Device) -> bool {
        self.name() == other.name()
    }
}

pub type DeviceRef = Arc<dyn Device>;

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Device({}, {:?}, {})", self.name(), self.kind(), self.addr())
    }
}

/// Atomic flag word shared by device implementations.
#[derive(Debug)]
pub struct Flags(AtomicU16);

impl Flags {
    pub fn new(flags: u16) -> Flags {
        Flags(AtomicU16::new(flags))
    }

    pub fn get(&self) -> u16 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, flags: u16) {
        self.0.fetch_or(flags, Ordering::SeqCst);
    }

    pub fn clear(&self, flags: u16) {
        self.0.fetch_and(!flags, Ordering::SeqCst);
    }

    /// Sets the UP flag, failing if it was already set.
    pub fn try_up(&self) -> Result<()> {
        if self.0.fetch_or(flags::UP, Ordering::SeqCst) & flags::UP != 0 {
            Err(Error::AlreadyOpened)
        } else {
            Ok(())
        }
    }
}

/// Builds the frame for Device::transmit(...), checking the device is up
/// and the payload fits its MTU.
pub fn encode_frame<D>(
    dev: &D,
    dst_addr: EthernetAddress,
    payload: &[u8],
    ethertype: u16,
) -> Result<Vec<u8>>
where
    D: Device + ?Sized,
{
    if !dev.is_up() {
        return Err(Error::DeviceNotOpened);
    }

    if payload.len() > dev.mtu() {
        return Err(Error::PacketTooLong);
    }

    EthernetRepr {
        dst_addr,
        src_addr: dev.addr(),
        ethertype,
    }.encode(payload)
}

/// A device whose transmitted frames come back out of its own poll().
pub struct Loopback {
    name: String,
    flags: Flags,
    mtu: usize,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl Loopback {
    pub const QUEUE_LEN: usize = 32;

    pub fn new(name: &str) -> Loopback {
        let (tx, rx) = channel::bounded(Self::QUEUE_LEN);

        Loopback {
            name: name.to_string(),
            flags: Flags::new(flags::LOOPBACK),
            mtu: 1500,
            tx,
            rx,
        }
    }
}

impl Device for Loopback {
    fn kind(&self) -> Kind {
        Kind::Loopback
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn addr(&self) -> EthernetAddress {
        EthernetAddress::ZERO
    }

    fn flags(&self) -> u16 {
        self.flags.get()
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn handle(&self) -> Handle {
        Handle {
            fd: None,
            name: self.name.clone(),
        }
    }

    fn open(&self) -> Result<()> {
        self.flags.try_up()?;
        debug!("Loopback {} opened.", self.name);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.is_up() {
            return Err(Error::DeviceNotOpened);
        }
        self.flags.clear(flags::UP);
        // Frames still queued are dropped with the device.
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn up(&self) {
        self.flags.set(flags::UP);
    }

    fn down(&self) {
        self.flags.clear(flags::UP);
    }

    fn poll(&self, timeout: Duration) -> Result<Option<RxFrame>> {
        let buffer = match self.rx.recv_timeout(timeout) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
        };

        match EthernetRepr::decode(&buffer, self.addr()) {
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

        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Exhausted),
            Err(TrySendError::Disconnected(_)) => Err(Error::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::repr::eth_types;

    #[test]
    fn test_open_twice() {
        let dev = Loopback::new("lo");
        assert!(!dev.is_up());
        assert_matches!(dev.open(), Ok(()));
        assert!(dev.is_up());
        assert_matches!(dev.open(), Err(Error::AlreadyOpened));
    }

    #[test]
    fn test_close_without_open() {
        let dev = Loopback::new("lo");
        assert_matches!(dev.close(), Err(Error::DeviceNotOpened));
    }

    #[test]
    fn test_transmit_requires_up() {
        let dev = Loopback::new("lo");
        assert_matches!(
            dev.transmit(EthernetAddress::ZERO, &[1, 2, 3], eth_types::IPV4),
            Err(Error::DeviceNotOpened)
        );
    }

    #[test]
    fn test_transmit_too_long() {
        let dev = Loopback::new("lo");
        dev.open().unwrap();
        assert_matches!(
            dev.transmit(EthernetAddress::ZERO, &[0; 1501], eth_types::IPV4),
            Err(Error::PacketTooLong)
        );
    }

    #[test]
    fn test_loops_frames_back() {
        let dev = Loopback::new("lo");
        dev.open().unwrap();
        dev.transmit(EthernetAddress::ZERO, &[1, 2, 3], eth_types::IPV4)
            .unwrap();

        let frame = dev.poll(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(frame.header.ethertype, eth_types::IPV4);
        assert_eq!(&frame.payload[.. 3], &[1, 2, 3]);
        assert_eq!(frame.payload.len(), 46);

        assert_matches!(dev.poll(Duration::from_millis(10)), Ok(None));
    }

    #[test]
    fn test_equal_by_name() {
        let (a, b, c) = (Loopback::new("lo"), Loopback::new("lo"), Loopback::new("lo1"));
        assert!(a.equal(&b));
        assert!(!a.equal(&c));
    }

    #[test]
    fn test_up_down() {
        let dev = Loopback::new("lo");
        dev.up();
        assert!(dev.is_up());
        dev.down();
        assert!(!dev.is_up());
        assert_eq!(dev.flags() & flags::LOOPBACK, flags::LOOPBACK);
    }
}
