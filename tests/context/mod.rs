#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{
    self,
    Receiver,
    RecvTimeoutError,
    Sender,
};

use tapstack::core::dev::{
    encode_frame,
    flags,
    Device,
    DeviceRef,
    Flags,
    Handle,
    Kind,
    RxFrame,
};
use tapstack::core::repo::Iface;
use tapstack::core::repr::{
    EthernetAddress,
    EthernetFrame,
    EthernetRepr,
    Ipv4Address,
    Ipv4Repr,
};
use tapstack::core::service::Context;
use tapstack::core::time::Env;
use tapstack::{
    Error,
    Result,
};

lazy_static! {
    pub static ref DEV_MAC: EthernetAddress =
        EthernetAddress::new([0x06, 0x11, 0x22, 0x33, 0x44, 0x55]);

    pub static ref DEV_IPV4: Ipv4Address = Ipv4Address::new([10, 0, 0, 102]);

    pub static ref GATEWAY_IPV4: Ipv4Address = Ipv4Address::new([10, 0, 0, 101]);

    pub static ref PEER_MAC: EthernetAddress =
        EthernetAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    pub static ref PEER_IPV4: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
}

/// An Ethernet device whose wire is a pair of queues: frames injected by a
/// test come out of poll() and transmitted frames are captured.
pub struct CaptureDevice {
    name: String,
    addr: EthernetAddress,
    mtu: usize,
    flags: Flags,
    inject_tx: Sender<Vec<u8>>,
    inject_rx: Receiver<Vec<u8>>,
    sent_tx: Sender<Vec<u8>>,
    sent_rx: Receiver<Vec<u8>>,
}

impl CaptureDevice {
    pub fn new(name: &str, addr: EthernetAddress) -> CaptureDevice {
        let (inject_tx, inject_rx) = channel::unbounded();
        let (sent_tx, sent_rx) = channel::unbounded();

        CaptureDevice {
            name: name.to_string(),
            addr,
            mtu: EthernetFrame::<&[u8]>::MAX_PAYLOAD_LEN,
            flags: Flags::new(flags::BROADCAST | flags::NEEDS_ARP),
            inject_tx,
            inject_rx,
            sent_tx,
            sent_rx,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> CaptureDevice {
        self.mtu = mtu;
        self
    }

    /// Puts a raw frame on the wire towards the device.
    pub fn inject(&self, frame: Vec<u8>) {
        self.inject_tx.send(frame).unwrap();
    }

    /// Takes every frame transmitted so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent_rx.try_iter().collect()
    }

    /// Waits for the next transmitted frame.
    pub fn wait_sent(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.sent_rx.recv_timeout(timeout).ok()
    }
}

impl Device for CaptureDevice {
    fn kind(&self) -> Kind {
        Kind::Ethernet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn addr(&self) -> EthernetAddress {
        self.addr
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
        self.flags.try_up()
    }

    fn close(&self) -> Result<()> {
        if !self.is_up() {
            return Err(Error::DeviceNotOpened);
        }
        self.flags.clear(flags::UP);
        Ok(())
    }

    fn up(&self) {
        self.flags.set(flags::UP);
    }

    fn down(&self) {
        self.flags.clear(flags::UP);
    }

    fn poll(&self, timeout: Duration) -> Result<Option<RxFrame>> {
        let buffer = match self.inject_rx.recv_timeout(timeout) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
        };

        match EthernetRepr::decode(&buffer, self.addr) {
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
        self.sent_tx.send(frame).map_err(|_| Error::ChannelClosed)
    }
}

/// Registers a capture device at 10.0.0.102/24 with a route to its network
/// and a default gateway at 10.0.0.101. The device is left down.
pub fn setup<T: Env>(ctx: Context<T>) -> (Context<T>, Arc<CaptureDevice>) {
    setup_with(ctx, CaptureDevice::new("cap0", *DEV_MAC))
}

pub fn setup_with<T: Env>(ctx: Context<T>, dev: CaptureDevice) -> (Context<T>, Arc<CaptureDevice>) {
    let dev = Arc::new(dev);
    let dev_ref: DeviceRef = dev.clone();
    ctx.devices.register_device(dev_ref.clone()).unwrap();

    let netmask = Ipv4Address::netmask(24);
    let iface = ctx
        .ifaces
        .register_interface(Iface::new(*DEV_IPV4, netmask, &dev_ref))
        .unwrap();
    ctx.routes
        .register_route(iface.network(), netmask, Ipv4Address::UNSPECIFIED, &iface)
        .unwrap();
    ctx.routes
        .register_default_gateway(&iface, *GATEWAY_IPV4)
        .unwrap();

    (ctx, dev)
}

pub fn as_device_ref(dev: &Arc<CaptureDevice>) -> DeviceRef {
    dev.clone()
}

/// Splits a captured frame into its header and payload, padding included.
pub fn parse_frame(frame: &[u8]) -> (EthernetRepr, Vec<u8>) {
    let eth_frame = EthernetFrame::try_new(frame).unwrap();
    let header = EthernetRepr {
        dst_addr: eth_frame.dst_addr(),
        src_addr: eth_frame.src_addr(),
        ethertype: eth_frame.payload_type(),
    };
    (header, eth_frame.payload().to_vec())
}

pub fn frame(dst_addr: EthernetAddress, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    EthernetRepr {
        dst_addr,
        src_addr: *PEER_MAC,
        ethertype,
    }.encode(payload)
        .unwrap()
}

pub fn ipv4_packet(
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    protocol: u8,
    ttl: u8,
    payload: &[u8],
) -> Vec<u8> {
    Ipv4Repr {
        src_addr,
        dst_addr,
        protocol,
        identification: 7,
        ttl,
        payload_len: payload.len(),
    }.to_bytes(payload)
        .unwrap()
}
