use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
};
use crate::{
    Error,
    Result,
};

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-1
pub enum Op {
    Request = 0x0001,
    Reply = 0x0002,
}

/// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-2
pub mod hw_types {
    pub const ETHERNET: u16 = 0x0001;
}

/// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-3
pub mod proto_types {
    pub const IPV4: u16 = 0x0800;
}

/// An Ethernet/IPv4 [ARP](https://tools.ietf.org/html/rfc826) packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arp {
    pub op: Op,
    pub source_hw_addr: EthernetAddress,
    pub source_proto_addr: Ipv4Address,
    pub target_hw_addr: EthernetAddress,
    pub target_proto_addr: Ipv4Address,
}

impl Arp {
    pub const BUFFER_LEN: usize = 28;

    /// Returns the size of the ARP packet when serialized to a buffer.
    pub fn buffer_len(&self) -> usize {
        Self::BUFFER_LEN
    }

    /// Attempts to deserialize a buffer into an ARP packet.
    ///
    /// Anything other than an Ethernet/IPv4 request or reply is rejected.
    pub fn deserialize(buffer: &[u8]) -> Result<Arp> {
        if buffer.len() < Self::BUFFER_LEN {
            return Err(Error::InvalidPacket);
        }

        let hw_type = NetworkEndian::read_u16(&buffer[0 .. 2]);
        let proto_type = NetworkEndian::read_u16(&buffer[2 .. 4]);
        let (hw_len, proto_len) = (buffer[4], buffer[5]);

        if hw_type != hw_types::ETHERNET || proto_type != proto_types::IPV4 || hw_len != 6
            || proto_len != 4
        {
            return Err(Error::InvalidPacket);
        }

        let op = match NetworkEndian::read_u16(&buffer[6 .. 8]) {
            1 => Op::Request,
            2 => Op::Reply,
            _ => return Err(Error::InvalidPacket),
        };

        Ok(Arp {
            op,
            source_hw_addr: EthernetAddress::try_new(&buffer[8 .. 14])?,
            source_proto_addr: Ipv4Address::try_new(&buffer[14 .. 18])?,
            target_hw_addr: EthernetAddress::try_new(&buffer[18 .. 24])?,
            target_proto_addr: Ipv4Address::try_new(&buffer[24 .. 28])?,
        })
    }

    /// Serializes the ARP packet into a buffer.
    ///
    /// You should ensure buffer has at least buffer_len() bytes to avoid errors.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<()> {
        if self.buffer_len() > buffer.len() {
            return Err(Error::Exhausted);
        }

        NetworkEndian::write_u16(&mut buffer[0 .. 2], hw_types::ETHERNET);
        NetworkEndian::write_u16(&mut buffer[2 .. 4], proto_types::IPV4);
        buffer[4] = 6;
        buffer[5] = 4;
        NetworkEndian::write_u16(&mut buffer[6 .. 8], self.op as u16);
        buffer[8 .. 14].copy_from_slice(self.source_hw_addr.as_bytes());
        buffer[14 .. 18].copy_from_slice(self.source_proto_addr.as_bytes());
        buffer[18 .. 24].copy_from_slice(self.target_hw_addr.as_bytes());
        buffer[24 .. 28].copy_from_slice(self.target_proto_addr.as_bytes());

        Ok(())
    }

    /// Serializes the ARP packet into a new buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0; Self::BUFFER_LEN];
        // The buffer is exactly BUFFER_LEN bytes so this can't fail.
        let _ = self.serialize(&mut buffer);
        buffer
    }
}
