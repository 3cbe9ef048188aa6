use std::sync::Mutex;

use crate::core::dev::{
    flags,
    Device,
};
use crate::core::message::{
    IcmpRx,
    IpRx,
    IpTx,
};
use crate::core::repo::{
    Family,
    Iface,
};
use crate::core::repr::{
    eth_types,
    ipv4_protocols,
    EthernetAddress,
    Ipv4Address,
    Ipv4Packet,
    Ipv4Repr,
};
use crate::core::service::arp::{
    self,
    Resolution,
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

/// TTL of locally originated packets.
pub const DEFAULT_TTL: u8 = 255;

/// Process wide counter for the IPv4 identification field.
///
/// Starts at a random value and wraps at 2^16.
#[derive(Debug)]
pub struct Identification(Mutex<u16>);

impl Identification {
    pub fn new() -> Identification {
        Identification::with_seed(rand::random())
    }

    pub fn with_seed(seed: u16) -> Identification {
        Identification(Mutex::new(seed))
    }

    /// Returns the next identification value.
    pub fn next(&self) -> u16 {
        let mut id = match self.0.lock() {
            Ok(id) => id,
            Err(err) => err.into_inner(),
        };
        let next = *id;
        *id = id.wrapping_add(1);
        next
    }
}

impl Default for Identification {
    fn default() -> Identification {
        Identification::new()
    }
}

/// Sends an IPv4 packet.
///
/// With an unspecified source the interface and next hop come from the
/// routing table. Otherwise the interface owning the source address is used
/// and the destination must be on its network.
pub fn send_packet<T: Env>(ctx: &Context<T>, ip_tx: &IpTx) -> Result<()> {
    let (iface, next_hop) = if ip_tx.src.is_unspecified() {
        let route = ctx.routes.lookup(ip_tx.dst).ok_or(Error::RouteNotFound)?;
        let next_hop = route.next_hop_for(ip_tx.dst);
        (route.iface, next_hop)
    } else {
        let iface = ctx
            .ifaces
            .lookup_by_unicast(ip_tx.src)
            .ok_or(Error::InterfaceNotFound)?;
        if !iface.contains(ip_tx.dst) && !ip_tx.dst.is_broadcast() {
            return Err(Error::NetworkAddressNotMatch);
        }
        (iface, ip_tx.dst)
    };

    let dev = iface.dev().ok_or(Error::DeviceNotOpened)?;

    if Ipv4Packet::<&[u8]>::buffer_len(ip_tx.payload.len()) > dev.mtu() {
        return Err(Error::PacketTooLong);
    }

    let ipv4_repr = Ipv4Repr {
        src_addr: iface.unicast,
        dst_addr: ip_tx.dst,
        protocol: ip_tx.protocol,
        identification: ctx.ids.next(),
        ttl: DEFAULT_TTL,
        payload_len: ip_tx.payload.len(),
    };

    let eth_dst_addr = link_addr(ctx, &iface, &*dev, next_hop)?;
    let ipv4_buffer = ipv4_repr.to_bytes(&ip_tx.payload)?;

    debug!(
        "Sending IPv4 packet {} -> {} (protocol {}) via {}.",
        ipv4_repr.src_addr,
        ipv4_repr.dst_addr,
        ipv4_repr.protocol,
        dev.name()
    );

    ethernet::send_frame(&*dev, eth_dst_addr, &ipv4_buffer, eth_types::IPV4)
}

/// Picks the Ethernet destination for a next hop on an interface.
fn link_addr<T: Env>(
    ctx: &Context<T>,
    iface: &Iface,
    dev: &dyn Device,
    next_hop: Ipv4Address,
) -> Result<EthernetAddress> {
    if next_hop.is_broadcast() || next_hop == iface.broadcast {
        return Ok(EthernetAddress::BROADCAST);
    }

    if dev.flags() & flags::NEEDS_ARP == 0 {
        return Ok(EthernetAddress::ZERO);
    }

    match arp::resolve(ctx, iface, next_hop)? {
        Resolution::Complete(eth_addr) => Ok(eth_addr),
        Resolution::Incomplete => {
            debug!("Dropping packet, waiting on ARP for {}.", next_hop);
            Err(Error::ArpIncomplete)
        }
    }
}

/// Receives an IPv4 packet from a device.
///
/// Returns the ICMP message to deliver locally, if any. Packets addressed to
/// other hosts are dropped, or routed onwards when forwarding is enabled.
pub fn recv_packet<T: Env>(ctx: &Context<T>, ip_rx: &IpRx) -> Result<Option<IcmpRx>> {
    let ipv4_packet = Ipv4Packet::try_new(&ip_rx.payload[..])?;
    ipv4_packet.check_encoding()?;

    let iface = ctx
        .ifaces
        .lookup_by_dev(&*ip_rx.dev, Family::Ipv4)
        .ok_or(Error::InterfaceNotFound)?;

    let dst_addr = ipv4_packet.dst_addr();

    if dst_addr != iface.unicast && dst_addr != iface.broadcast && !dst_addr.is_broadcast() {
        if ctx.forwarding {
            return forward_packet(ctx, &ipv4_packet).map(|_| None);
        }

        debug!("Ignoring IPv4 packet with destination {}.", dst_addr);
        return Ok(None);
    }

    match ipv4_packet.protocol() {
        ipv4_protocols::ICMP => Ok(Some(IcmpRx {
            payload: ipv4_packet.payload().to_vec(),
            dst: dst_addr,
            src: ipv4_packet.src_addr(),
            dev: ip_rx.dev.clone(),
        })),
        protocol @ ipv4_protocols::TCP | protocol @ ipv4_protocols::UDP => {
            debug!(
                "Dropping IPv4 packet from {}, no transport for protocol {}.",
                ipv4_packet.src_addr(),
                protocol
            );
            Err(Error::UnsupportedProtocol(protocol))
        }
        protocol => Err(Error::UnsupportedProtocol(protocol)),
    }
}

/// Routes a packet which is not addressed to this host.
pub fn forward_packet<T: Env>(ctx: &Context<T>, ipv4_packet: &Ipv4Packet<&[u8]>) -> Result<()> {
    let dst_addr = ipv4_packet.dst_addr();

    if ipv4_packet.ttl() <= 1 {
        debug!("Dropping IPv4 packet to {}, TTL expired.", dst_addr);
        return Err(Error::TtlExpired);
    }

    let route = ctx.routes.lookup(dst_addr).ok_or(Error::RouteNotFound)?;
    let dev = route.iface.dev().ok_or(Error::DeviceNotOpened)?;

    let packet_len = ipv4_packet.packet_len() as usize;
    if packet_len > dev.mtu() {
        return Err(Error::PacketTooLong);
    }

    let received: &[u8] = ipv4_packet.as_ref();
    let mut ipv4_buffer = received[.. packet_len].to_vec();
    {
        let mut forwarded = Ipv4Packet::try_new(&mut ipv4_buffer[..])?;
        forwarded.set_ttl(ipv4_packet.ttl() - 1);
        forwarded.fill_checksum();
    }

    let next_hop = route.next_hop_for(dst_addr);
    let eth_dst_addr = link_addr(ctx, &route.iface, &*dev, next_hop)?;

    debug!(
        "Forwarding IPv4 packet {} -> {} via {}.",
        ipv4_packet.src_addr(),
        dst_addr,
        next_hop
    );

    ethernet::send_frame(&*dev, eth_dst_addr, &ipv4_buffer, eth_types::IPV4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identification_wraps() {
        let ids = Identification::with_seed(0xFFFE);
        assert_eq!(ids.next(), 0xFFFE);
        assert_eq!(ids.next(), 0xFFFF);
        assert_eq!(ids.next(), 0);
        assert_eq!(ids.next(), 1);
    }

    #[test]
    fn test_identification_is_shared() {
        use std::sync::Arc;
        use std::thread;

        let ids = Arc::new(Identification::with_seed(0));
        let handles: Vec<_> = (0 .. 4)
            .map(|_| {
                let ids = ids.clone();
                thread::spawn(move || {
                    for _ in 0 .. 100 {
                        ids.next();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ids.next(), 400);
    }
}
