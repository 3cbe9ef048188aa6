use crate::core::dev::Device;
use crate::core::message::{
    ArpRx,
    EthernetRx,
    IpRx,
};
use crate::core::repr::{
    eth_types,
    EthernetAddress,
};
use crate::Result;

/// Where a received frame goes next.
#[derive(Debug)]
pub enum Dispatch {
    Arp(ArpRx),
    Ip(IpRx),
}

/// Sends an Ethernet frame via a device.
pub fn send_frame(
    dev: &dyn Device,
    dst_addr: EthernetAddress,
    payload: &[u8],
    ethertype: u16,
) -> Result<()> {
    dev.transmit(dst_addr, payload, ethertype)
        .map_err(|err| {
            debug!(
                "Error sending frame of type 0x{:04X} to {} via {} with {:?}.",
                ethertype,
                dst_addr,
                dev.name(),
                err
            );
            err
        })
}

/// Demultiplexes a received frame by ethertype. Frames of other types are
/// dropped.
pub fn recv_frame(frame: EthernetRx) -> Option<Dispatch> {
    let EthernetRx {
        ethertype,
        payload,
        dev,
    } = frame;

    match ethertype {
        eth_types::ARP => Some(Dispatch::Arp(ArpRx { payload, dev })),
        eth_types::IPV4 => Some(Dispatch::Ip(IpRx { payload, dev })),
        i => {
            debug!("Ignoring ethernet frame with type 0x{:04X} on {}.", i, dev.name());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::core::dev::{
        DeviceRef,
        Loopback,
    };

    fn frame(ethertype: u16) -> EthernetRx {
        let dev: DeviceRef = Arc::new(Loopback::new("lo"));
        EthernetRx {
            ethertype,
            payload: vec![1, 2, 3],
            dev,
        }
    }

    #[test]
    fn test_dispatch_by_ethertype() {
        assert_matches!(
            recv_frame(frame(eth_types::ARP)),
            Some(Dispatch::Arp(ArpRx { ref payload, .. })) if payload[..] == [1u8, 2, 3]
        );
        assert_matches!(recv_frame(frame(eth_types::IPV4)), Some(Dispatch::Ip(_)));
        assert_matches!(recv_frame(frame(0x86DD)), None);
    }
}
