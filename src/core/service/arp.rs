use crate::core::arp_cache::{
    Entry,
    Status,
};
use crate::core::dev::{
    Device,
    Kind,
};
use crate::core::message::ArpRx;
use crate::core::repo::{
    Family,
    Iface,
};
use crate::core::repr::{
    eth_types,
    Arp,
    ArpOp,
    EthernetAddress,
    Ipv4Address,
};
use crate::core::service::{
    ethernet,
    Context,
};
use crate::core::time::Env;
use crate::{
    Error,
    Result,
};

/// Outcome of an address resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Complete(EthernetAddress),
    /// A request is out, try again once the reply has been received.
    Incomplete,
}

/// Sends an ARP packet via a device.
pub fn send_packet(dev: &dyn Device, arp_repr: &Arp, dst_addr: EthernetAddress) -> Result<()> {
    ethernet::send_frame(dev, dst_addr, &arp_repr.to_bytes(), eth_types::ARP)
}

fn send_request(dev: &dyn Device, iface: &Iface, ipv4_addr: Ipv4Address) -> Result<()> {
    let arp_repr = Arp {
        op: ArpOp::Request,
        source_hw_addr: dev.addr(),
        source_proto_addr: iface.unicast,
        target_hw_addr: EthernetAddress::ZERO,
        target_proto_addr: ipv4_addr,
    };

    debug!("Sending ARP request for {} via {}.", ipv4_addr, dev.name());
    send_packet(dev, &arp_repr, EthernetAddress::BROADCAST)
}

/// Tries to retrieve the Ethernet address for an IPv4 address reachable
/// through an interface.
///
/// If there is no mapping yet an incomplete entry is created and an ARP
/// request is broadcast. The reply is handled by `recv_packet(...)`, after
/// which a new call completes.
pub fn resolve<T: Env>(
    ctx: &Context<T>,
    iface: &Iface,
    ipv4_addr: Ipv4Address,
) -> Result<Resolution> {
    let dev = iface.dev().ok_or(Error::DeviceNotOpened)?;

    if dev.kind() != Kind::Ethernet || iface.family != Family::Ipv4 {
        return Err(Error::UnsupportedDevice);
    }

    {
        let mut arp_cache = ctx.arp_cache();

        match arp_cache.lookup(ipv4_addr) {
            Some(Entry {
                status: Status::Resolved,
                hw_addr,
                ..
            })
            | Some(Entry {
                status: Status::Static,
                hw_addr,
                ..
            }) => return Ok(Resolution::Complete(hw_addr)),
            Some(_) => {}
            None => arp_cache.create(ipv4_addr, EthernetAddress::ZERO, Status::Incomplete)?,
        }
    }

    send_request(&*dev, iface, ipv4_addr)?;
    Ok(Resolution::Incomplete)
}

/// Receives an ARP packet from a device.
///
/// Packets targeting the interface's address update the cache and requests
/// get a reply. Other packets only complete a resolution already waiting for
/// the sender.
pub fn recv_packet<T: Env>(ctx: &Context<T>, arp_rx: &ArpRx) -> Result<()> {
    let arp_repr = Arp::deserialize(&arp_rx.payload)?;
    let dev = &arp_rx.dev;

    let iface = ctx
        .ifaces
        .lookup_by_dev(&**dev, Family::Ipv4)
        .ok_or(Error::InterfaceNotFound)?;

    if arp_repr.target_proto_addr != iface.unicast {
        if ctx
            .arp_cache()
            .renew_if_waiting(arp_repr.source_proto_addr, arp_repr.source_hw_addr)
        {
            debug!(
                "Resolved {} to {} from ARP not addressed to us.",
                arp_repr.source_proto_addr, arp_repr.source_hw_addr
            );
        } else {
            debug!(
                "Ignoring ARP with target IPv4 address {}.",
                arp_repr.target_proto_addr
            );
        }
        return Ok(());
    }

    if !arp_repr.source_proto_addr.is_unspecified() {
        debug!(
            "Received ARP, adding mapping from {} to {}.",
            arp_repr.source_proto_addr, arp_repr.source_hw_addr
        );
        ctx.arp_cache().create(
            arp_repr.source_proto_addr,
            arp_repr.source_hw_addr,
            Status::Resolved,
        )?;
    }

    match arp_repr.op {
        ArpOp::Request => {
            let arp_reply = Arp {
                op: ArpOp::Reply,
                source_hw_addr: dev.addr(),
                source_proto_addr: iface.unicast,
                target_hw_addr: arp_repr.source_hw_addr,
                target_proto_addr: arp_repr.source_proto_addr,
            };

            debug!(
                "Sending ARP reply to {}/{}.",
                arp_reply.target_proto_addr, arp_reply.target_hw_addr
            );

            send_packet(&**dev, &arp_reply, arp_reply.target_hw_addr)
        }
        ArpOp::Reply => Ok(()),
    }
}

/// Clears expired cache entries, returning them for reporting.
pub fn sweep<T: Env>(ctx: &Context<T>) -> Vec<Entry> {
    let cleared = ctx.arp_cache().sweep();

    for entry in cleared.iter() {
        debug!(
            "ARP entry {} -> {} expired.",
            entry.proto_addr, entry.hw_addr
        );
    }

    cleared
}
