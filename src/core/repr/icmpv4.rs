use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::core::check::internet_checksum;
use crate::{
    Error,
    Result,
};

/// https://www.iana.org/assignments/icmp-parameters/icmp-parameters.xhtml#icmp-parameters-types
pub mod types {
    pub const ECHO_REPLY: u8 = 0;

    pub const DESTINATION_UNREACHABLE: u8 = 3;

    pub const ECHO_REQUEST: u8 = 8;

    pub const TIME_EXCEEDED: u8 = 11;
}

/// Safe representation of an ICMP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repr {
    EchoReply { id: u16, seq: u16 },
    EchoRequest { id: u16, seq: u16 },
    DestinationUnreachable { code: u8 },
    TimeExceeded { code: u8 },
    Other { type_of: u8, code: u8 },
}

impl Repr {
    /// Reads the header of a packet into an ICMP representation. Messages
    /// this stack does not act on are kept as Repr::Other.
    pub fn deserialize<T>(packet: &Packet<T>) -> Repr
    where
        T: AsRef<[u8]>,
    {
        let id = NetworkEndian::read_u16(&packet.header()[0 .. 2]);
        let seq = NetworkEndian::read_u16(&packet.header()[2 .. 4]);

        match (packet._type(), packet.code()) {
            (types::ECHO_REPLY, 0) => Repr::EchoReply { id, seq },
            (types::ECHO_REQUEST, _) => Repr::EchoRequest { id, seq },
            (types::DESTINATION_UNREACHABLE, code) => Repr::DestinationUnreachable { code },
            (types::TIME_EXCEEDED, code) => Repr::TimeExceeded { code },
            (type_of, code) => Repr::Other { type_of, code },
        }
    }

    /// Serializes an echo representation into a packet. The checksum is
    /// left zeroed; call Packet::fill_checksum() once the payload is written.
    pub fn serialize<T>(&self, packet: &mut Packet<T>) -> Result<()>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        let (type_of, id, seq) = match *self {
            Repr::EchoReply { id, seq } => (types::ECHO_REPLY, id, seq),
            Repr::EchoRequest { id, seq } => (types::ECHO_REQUEST, id, seq),
            _ => return Err(Error::InvalidPacket),
        };

        packet.set_type(type_of);
        packet.set_code(0);
        packet.set_checksum(0);
        NetworkEndian::write_u16(&mut packet.header_mut()[0 .. 2], id);
        NetworkEndian::write_u16(&mut packet.header_mut()[2 .. 4], seq);

        Ok(())
    }
}

/// [https://en.wikipedia.org/wiki/Internet_Control_Message_Protocol](https://en.wikipedia.org/wiki/Internet_Control_Message_Protocol)
mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const TYPE: usize = 0;

    pub const CODE: usize = 1;

    pub const CHECKSUM: Range<usize> = 2 .. 4;

    pub const HEADER: Range<usize> = 4 .. 8;

    pub const PAYLOAD: RangeFrom<usize> = 8 ..;
}

/// View of a byte buffer as an ICMP packet.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const HEADER_LEN: usize = 8;

    /// Tries to create an ICMP packet view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::InvalidPacket)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an ICMP packet with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    /// Checks the packet checksum, recomputed with the checksum field zeroed.
    pub fn check_encoding(&self) -> Result<()> {
        if self.gen_packet_checksum() != self.checksum() {
            Err(Error::ChecksumMismatch)
        } else {
            Ok(())
        }
    }

    /// Calculates the packet checksum as if the checksum field were zero.
    pub fn gen_packet_checksum(&self) -> u16 {
        let mut buffer = self.buffer.as_ref().to_vec();
        buffer[fields::CHECKSUM].copy_from_slice(&[0, 0]);
        internet_checksum(&buffer)
    }

    pub fn _type(&self) -> u8 {
        self.buffer.as_ref()[fields::TYPE]
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[fields::CODE]
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[fields::CHECKSUM])
    }

    /// The four "rest of header" bytes, e.g. identifier and sequence number
    /// for echo messages.
    pub fn header(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::HEADER]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_type(&mut self, type_of: u8) {
        self.buffer.as_mut()[fields::TYPE] = type_of
    }

    pub fn set_code(&mut self, code: u8) {
        self.buffer.as_mut()[fields::CODE] = code;
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[fields::CHECKSUM], checksum);
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::HEADER]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::PAYLOAD]
    }

    pub fn fill_checksum(&mut self) {
        let checksum = self.gen_packet_checksum();
        self.set_checksum(checksum);
    }
}
