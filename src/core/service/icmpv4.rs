use crate::core::message::{
    IcmpRx,
    IpTx,
};
use crate::core::repo::Family;
use crate::core::repr::{
    icmpv4_types,
    ipv4_protocols,
    Icmpv4Packet,
    Icmpv4Repr,
    Ipv4Address,
};
use crate::core::service::Context;
use crate::core::time::Env;
use crate::{
    Error,
    Result,
};

/// Builds an echo request message with the checksum filled in.
pub fn echo_request(id: u16, seq: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = vec![0; Icmpv4Packet::<&[u8]>::buffer_len(payload.len())];

    {
        let mut icmp_packet = Icmpv4Packet::try_new(&mut buffer[..])?;
        Icmpv4Repr::EchoRequest { id, seq }.serialize(&mut icmp_packet)?;
        icmp_packet.payload_mut().copy_from_slice(payload);
        icmp_packet.fill_checksum();
    }

    Ok(buffer)
}

/// Wraps an echo request in a send request for the IP stage.
pub fn ping(src: Ipv4Address, dst: Ipv4Address, id: u16, seq: u16, payload: &[u8]) -> Result<IpTx> {
    Ok(IpTx {
        protocol: ipv4_protocols::ICMP,
        payload: echo_request(id, seq, payload)?,
        src,
        dst,
    })
}

/// Receives an ICMP message delivered to this host.
///
/// Echo requests are answered with a reply to be sent by the IP stage. Other
/// messages are logged and dropped.
pub fn recv_packet<T: Env>(ctx: &Context<T>, icmp_rx: &IcmpRx) -> Result<Option<IpTx>> {
    let icmp_packet = Icmpv4Packet::try_new(&icmp_rx.payload[..])?;
    icmp_packet.check_encoding()?;

    match Icmpv4Repr::deserialize(&icmp_packet) {
        Icmpv4Repr::EchoRequest { id, seq } => {
            let iface = ctx
                .ifaces
                .lookup_by_dev(&*icmp_rx.dev, Family::Ipv4)
                .ok_or(Error::InterfaceNotFound)?;

            // Reply with the request's identifier, sequence and data.
            let mut reply = icmp_rx.payload.clone();
            {
                let mut reply_packet = Icmpv4Packet::try_new(&mut reply[..])?;
                reply_packet.set_type(icmpv4_types::ECHO_REPLY);
                reply_packet.fill_checksum();
            }

            let src = if icmp_rx.dst != iface.unicast {
                iface.unicast
            } else {
                icmp_rx.dst
            };

            debug!(
                "Answering ICMP echo request from {} (id={}, seq={}).",
                icmp_rx.src, id, seq
            );

            Ok(Some(IpTx {
                protocol: ipv4_protocols::ICMP,
                payload: reply,
                src,
                dst: icmp_rx.src,
            }))
        }
        Icmpv4Repr::EchoReply { id, seq } => {
            debug!(
                "Received ICMP echo reply from {} (id={}, seq={}).",
                icmp_rx.src, id, seq
            );
            Ok(None)
        }
        icmp_repr => {
            debug!("Ignoring ICMP {:?} from {}.", icmp_repr, icmp_rx.src);
            Ok(None)
        }
    }
}
