//! Messages passed between the stages of the pipeline.
//!
//! Each message owns its payload; sending one hands the buffer over to the
//! next stage.

use crate::core::dev::DeviceRef;
use crate::core::repr::Ipv4Address;

/// A decoded Ethernet frame, tagged with the device it arrived on.
#[derive(Debug)]
pub struct EthernetRx {
    pub ethertype: u16,
    pub payload: Vec<u8>,
    pub dev: DeviceRef,
}

/// An ARP packet for the ARP stage.
#[derive(Debug)]
pub struct ArpRx {
    pub payload: Vec<u8>,
    pub dev: DeviceRef,
}

/// An IPv4 packet for the IP stage.
#[derive(Debug)]
pub struct IpRx {
    pub payload: Vec<u8>,
    pub dev: DeviceRef,
}

/// An ICMP message delivered locally, with the addresses of its IP header.
#[derive(Debug)]
pub struct IcmpRx {
    pub payload: Vec<u8>,
    pub dst: Ipv4Address,
    pub src: Ipv4Address,
    pub dev: DeviceRef,
}

/// A request to send an IPv4 packet.
///
/// An unspecified source lets the routing table pick the interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpTx {
    pub protocol: u8,
    pub payload: Vec<u8>,
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
}
