#[macro_use]
extern crate assert_matches;
extern crate crossbeam;
#[macro_use]
extern crate lazy_static;
extern crate tapstack;

mod context;

use std::sync::Arc;
use std::thread;
use std::time::{
    Duration,
    Instant,
};

use tapstack::config::Config;
use tapstack::core::arp_cache::Status as ArpStatus;
use tapstack::core::dev::Device;
use tapstack::core::monitor::Status;
use tapstack::core::repr::{
    eth_types,
    ipv4_protocols,
    Arp,
    ArpOp,
    EthernetAddress,
    Icmpv4Packet,
    Icmpv4Repr,
    Ipv4Address,
    Ipv4Packet,
};
use tapstack::core::service::{
    icmpv4,
    Context,
};
use tapstack::core::stack::{
    Settings,
    Stack,
};
use tapstack::Error;

use context::*;

lazy_static! {
    static ref WAIT: Duration = Duration::from_secs(2);
}

fn settings() -> Settings {
    Settings {
        poll_timeout: Duration::from_millis(20),
        queue_capacity: 8,
        startup_timeout: Duration::from_secs(5),
        arp_sweep_interval: Duration::from_millis(50),
    }
}

fn stack() -> (Stack, Arc<CaptureDevice>) {
    let (ctx, dev) = setup(Context::new(Duration::from_secs(60)));
    (Stack::new(ctx, settings()), dev)
}

fn arp_frame(op: ArpOp, target_hw_addr: EthernetAddress) -> Vec<u8> {
    let arp_repr = Arp {
        op,
        source_hw_addr: *PEER_MAC,
        source_proto_addr: *PEER_IPV4,
        target_hw_addr,
        target_proto_addr: *DEV_IPV4,
    };
    let dst_addr = match op {
        ArpOp::Request => EthernetAddress::BROADCAST,
        ArpOp::Reply => *DEV_MAC,
    };
    frame(dst_addr, eth_types::ARP, &arp_repr.to_bytes())
}

fn expect_arp(dev: &CaptureDevice) -> (EthernetAddress, Arp) {
    let sent = dev.wait_sent(*WAIT).expect("no ARP frame sent");
    let (header, payload) = parse_frame(&sent);
    assert_eq!(header.ethertype, eth_types::ARP);
    (header.dst_addr, Arp::deserialize(&payload[.. Arp::BUFFER_LEN]).unwrap())
}

fn expect_icmp(dev: &CaptureDevice) -> (Ipv4Address, Icmpv4Repr, Vec<u8>) {
    let sent = dev.wait_sent(*WAIT).expect("no IPv4 frame sent");
    let (header, payload) = parse_frame(&sent);
    assert_eq!(header.ethertype, eth_types::IPV4);
    assert_eq!(header.dst_addr, *PEER_MAC);

    let ipv4_packet = Ipv4Packet::try_new(&payload[..]).unwrap();
    assert_matches!(ipv4_packet.check_encoding(), Ok(()));
    assert_eq!(ipv4_packet.protocol(), ipv4_protocols::ICMP);
    assert_eq!(ipv4_packet.src_addr(), *DEV_IPV4);

    let icmp_packet = Icmpv4Packet::try_new(ipv4_packet.payload()).unwrap();
    assert_matches!(icmp_packet.check_encoding(), Ok(()));
    (
        ipv4_packet.dst_addr(),
        Icmpv4Repr::deserialize(&icmp_packet),
        icmp_packet.payload().to_vec(),
    )
}

fn is_resolved(stack: &Stack, ipv4_addr: Ipv4Address) -> bool {
    match stack.context().arp_cache().lookup(ipv4_addr) {
        Some(entry) => entry.status == ArpStatus::Resolved,
        None => false,
    }
}

#[test]
fn test_start_stop() {
    let (mut stack, dev) = stack();

    stack.start().unwrap();
    assert_eq!(stack.status(), Status::Green);
    assert!(dev.is_up());
    assert!(stack.sender().is_some());
    assert_matches!(stack.start(), Err(Error::AlreadyOpened));

    stack.stop();
    assert!(!dev.is_up());
    assert!(stack.sender().is_none());
    assert_ne!(stack.status(), Status::Red);

    // A stopped stack can be started again.
    stack.start().unwrap();
    assert_eq!(stack.status(), Status::Green);
}

#[test]
fn test_arp_and_echo_through_pipeline() {
    let (mut stack, dev) = stack();
    stack.start().unwrap();

    dev.inject(arp_frame(ArpOp::Request, EthernetAddress::ZERO));
    let (dst_addr, reply) = expect_arp(&dev);
    assert_eq!(dst_addr, *PEER_MAC);
    assert_eq!(reply.op, ArpOp::Reply);
    assert_eq!(reply.source_hw_addr, *DEV_MAC);
    assert_eq!(reply.source_proto_addr, *DEV_IPV4);
    assert_eq!(reply.target_hw_addr, *PEER_MAC);
    assert_eq!(reply.target_proto_addr, *PEER_IPV4);

    let icmp_buffer = icmpv4::echo_request(1, 1, &[9, 8, 7, 6]).unwrap();
    let packet = ipv4_packet(*PEER_IPV4, *DEV_IPV4, ipv4_protocols::ICMP, 64, &icmp_buffer);
    dev.inject(frame(*DEV_MAC, eth_types::IPV4, &packet));

    let (dst_addr, icmp_repr, payload) = expect_icmp(&dev);
    assert_eq!(dst_addr, *PEER_IPV4);
    assert_eq!(icmp_repr, Icmpv4Repr::EchoReply { id: 1, seq: 1 });
    assert_eq!(payload, vec![9, 8, 7, 6]);

    stack.stop();
}

#[test]
fn test_frames_for_other_stations_are_dropped() {
    let (mut stack, dev) = stack();
    stack.start().unwrap();

    let icmp_buffer = icmpv4::echo_request(1, 1, &[]).unwrap();
    let packet = ipv4_packet(*PEER_IPV4, *DEV_IPV4, ipv4_protocols::ICMP, 64, &icmp_buffer);
    dev.inject(frame(
        EthernetAddress::new([2, 9, 9, 9, 9, 9]),
        eth_types::IPV4,
        &packet,
    ));

    // Malformed and expired packets don't take the stage down either.
    dev.inject(frame(*DEV_MAC, eth_types::IPV4, &[0x45; 10]));
    let expired = ipv4_packet(*PEER_IPV4, *DEV_IPV4, ipv4_protocols::ICMP, 0, &icmp_buffer);
    dev.inject(frame(*DEV_MAC, eth_types::IPV4, &expired));

    assert!(dev.wait_sent(Duration::from_millis(200)).is_none());
    assert_eq!(stack.status(), Status::Green);
}

#[test]
fn test_sender_resolves_then_sends() {
    let (mut stack, dev) = stack();
    stack.start().unwrap();
    let sender = stack.sender().unwrap();

    let ping = icmpv4::ping(Ipv4Address::UNSPECIFIED, *PEER_IPV4, 5, 1, b"hi").unwrap();
    sender.send(ping).unwrap();

    // The first packet only triggers resolution.
    let (dst_addr, request) = expect_arp(&dev);
    assert_eq!(dst_addr, EthernetAddress::BROADCAST);
    assert_eq!(request.op, ArpOp::Request);
    assert_eq!(request.target_proto_addr, *PEER_IPV4);

    dev.inject(arp_frame(ArpOp::Reply, *DEV_MAC));

    let deadline = Instant::now() + *WAIT;
    while !is_resolved(&stack, *PEER_IPV4) {
        assert!(Instant::now() < deadline, "ARP never completed");
        thread::sleep(Duration::from_millis(5));
    }

    let ping = icmpv4::ping(Ipv4Address::UNSPECIFIED, *PEER_IPV4, 5, 2, b"hi").unwrap();
    sender.send(ping).unwrap();

    let (header, payload) = parse_frame(&dev.wait_sent(*WAIT).expect("nothing sent"));
    assert_eq!(header.ethertype, eth_types::IPV4);
    assert_eq!(header.dst_addr, *PEER_MAC);
    let ipv4_packet = Ipv4Packet::try_new(&payload[..]).unwrap();
    let icmp_packet = Icmpv4Packet::try_new(ipv4_packet.payload()).unwrap();
    assert_matches!(
        Icmpv4Repr::deserialize(&icmp_packet),
        Icmpv4Repr::EchoRequest { id: 5, .. }
    );
}

#[test]
fn test_from_config() {
    let config: Config = r#"
[stack]
poll_timeout_ms = 20

[[device]]
name = "lo"
kind = "loopback"

[[interface]]
device = "lo"
address = "127.0.0.1"
netmask = "255.0.0.0"
"#
        .parse()
        .unwrap();

    let mut stack = Stack::from_config(&config).unwrap();
    assert_eq!(stack.settings().poll_timeout, Duration::from_millis(20));

    stack.start().unwrap();
    assert_eq!(stack.status(), Status::Green);

    let ping = icmpv4::ping(
        Ipv4Address::UNSPECIFIED,
        Ipv4Address::new([127, 0, 0, 1]),
        1,
        1,
        &[],
    ).unwrap();
    stack.sender().unwrap().send(ping).unwrap();

    stack.stop();
}
