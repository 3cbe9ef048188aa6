use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::result::Result as StdResult;
use std::str::FromStr;

use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::core::check::internet_checksum;
use crate::{
    Error,
    Result,
};

/// [IPv4 address](https://en.wikipedia.org/wiki/IPv4) in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address([u8; 4]);

impl Address {
    pub const UNSPECIFIED: Address = Address([0, 0, 0, 0]);

    /// The limited broadcast address, 255.255.255.255.
    pub const BROADCAST: Address = Address([0xFF; 4]);

    /// Creates an IPv4 address from a network byte order buffer.
    pub fn new(addr: [u8; 4]) -> Address {
        Address(addr)
    }

    /// Tries to create an IPv4 address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 4 {
            return Err(Error::InvalidPacket);
        }

        let mut _addr: [u8; 4] = [0; 4];
        _addr.clone_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Creates an IPv4 address from its host order integer form.
    pub fn from_u32(addr: u32) -> Address {
        let mut bytes = [0; 4];
        NetworkEndian::write_u32(&mut bytes, addr);
        Address(bytes)
    }

    /// Returns the host order integer form of the address.
    pub fn as_u32(&self) -> u32 {
        NetworkEndian::read_u32(&self.0)
    }

    /// Returns a reference to the network byte order representation of the address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Checks if this is the limited broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Applies a netmask, yielding the network part of the address.
    pub fn mask(&self, netmask: Address) -> Address {
        Address::from_u32(self.as_u32() & netmask.as_u32())
    }

    /// Returns the directed broadcast address of the network this address
    /// belongs to under a netmask.
    pub fn broadcast(&self, netmask: Address) -> Address {
        Address::from_u32(self.as_u32() | !netmask.as_u32())
    }

    /// Number of leading one bits when used as a netmask.
    pub fn prefix_len(&self) -> u32 {
        (!self.as_u32()).leading_zeros()
    }

    /// Creates a netmask with prefix_len leading one bits.
    pub fn netmask(prefix_len: u32) -> Address {
        match prefix_len {
            0 => Address::UNSPECIFIED,
            len if len >= 32 => Address::BROADCAST,
            len => Address::from_u32(!0u32 << (32 - len)),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl FromStr for Address {
    type Err = ();

    /// Parses an Ipv4 address from an A.B.C.D style string.
    fn from_str(addr: &str) -> StdResult<Address, Self::Err> {
        let bytes = addr
            .split('.')
            .map(|token| token.parse::<u8>())
            .collect::<StdResult<Vec<_>, _>>()
            .map_err(|_| ())?;

        if bytes.len() != 4 {
            return Err(());
        }

        let mut ipv4: [u8; 4] = [0; 4];
        ipv4.clone_from_slice(&bytes);

        Ok(Address::new(ipv4))
    }
}

/// [https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml](https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml)
pub mod protocols {
    pub const ICMP: u8 = 1;

    pub const TCP: u8 = 6;

    pub const UDP: u8 = 17;
}

mod fields {
    use std::ops::Range;

    pub const VERSION_IHL: usize = 0;

    pub const TOS: usize = 1;

    pub const PACKET_LEN: Range<usize> = 2 .. 4;

    pub const IDENTIFICATION: Range<usize> = 4 .. 6;

    pub const FLAGS_FRAGMENT: Range<usize> = 6 .. 8;

    pub const TTL: usize = 8;

    pub const PROTOCOL: usize = 9;

    pub const CHECKSUM: Range<usize> = 10 .. 12;

    pub const SRC_ADDR: Range<usize> = 12 .. 16;

    pub const DST_ADDR: Range<usize> = 16 .. 20;
}

/// View of a byte buffer as an IPv4 packet.
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
    pub const MIN_HEADER_LEN: usize = 20;

    pub const MAX_HEADER_LEN: usize = 60;

    /// Tries to create an IPv4 packet view over a byte buffer.
    ///
    /// Only the minimum header length is checked. Use check_encoding() to
    /// validate the rest of the header before trusting the accessors.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::MIN_HEADER_LEN {
            Err(Error::InvalidPacket)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an IPv4 packet with no options and the payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::MIN_HEADER_LEN + payload_len
    }

    /// Validates version, lengths, TTL and header checksum, in that order.
    pub fn check_encoding(&self) -> Result<()> {
        if self.ip_version() != 4 {
            return Err(Error::InvalidProtocolVersion(self.ip_version()));
        }

        let buffer_len = self.buffer.as_ref().len();
        let header_len = self.header_len() as usize;
        let packet_len = self.packet_len() as usize;

        if header_len < Self::MIN_HEADER_LEN || buffer_len < header_len
            || buffer_len < packet_len || packet_len < header_len
        {
            return Err(Error::InvalidPacket);
        }

        if self.ttl() == 0 {
            return Err(Error::TtlExpired);
        }

        if self.gen_header_checksum() != self.header_checksum() {
            return Err(Error::ChecksumMismatch);
        }

        Ok(())
    }

    /// Calculates the header checksum with the checksum field zeroed.
    pub fn gen_header_checksum(&self) -> u16 {
        let header_len = std::cmp::min(self.header_len() as usize, self.buffer.as_ref().len());
        let mut header = [0; 60];
        header[.. header_len].copy_from_slice(&self.buffer.as_ref()[.. header_len]);
        header[fields::CHECKSUM].copy_from_slice(&[0, 0]);
        internet_checksum(&header[.. header_len])
    }

    pub fn ip_version(&self) -> u8 {
        (self.buffer.as_ref()[fields::VERSION_IHL] & 0xF0) >> 4
    }

    /// Header length in bytes.
    pub fn header_len(&self) -> u8 {
        (self.buffer.as_ref()[fields::VERSION_IHL] & 0x0F) * 4
    }

    pub fn tos(&self) -> u8 {
        self.buffer.as_ref()[fields::TOS]
    }

    pub fn packet_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[fields::PACKET_LEN])
    }

    pub fn identification(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[fields::IDENTIFICATION])
    }

    pub fn flags(&self) -> u8 {
        (self.buffer.as_ref()[fields::FLAGS_FRAGMENT.start] & 0xE0) >> 5
    }

    pub fn fragment_offset(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[fields::FLAGS_FRAGMENT]) & 0x1FFF
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[fields::TTL]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[fields::PROTOCOL]
    }

    pub fn header_checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[fields::CHECKSUM])
    }

    pub fn src_addr(&self) -> Address {
        let mut addr = [0; 4];
        addr.copy_from_slice(&self.buffer.as_ref()[fields::SRC_ADDR]);
        Address(addr)
    }

    pub fn dst_addr(&self) -> Address {
        let mut addr = [0; 4];
        addr.copy_from_slice(&self.buffer.as_ref()[fields::DST_ADDR]);
        Address(addr)
    }

    /// Returns the payload, excluding any link layer padding past the
    /// declared packet length.
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len() as usize .. self.packet_len() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_version_and_header_len(&mut self, version: u8, header_len: u8) {
        self.buffer.as_mut()[fields::VERSION_IHL] = (version << 4) | ((header_len / 4) & 0x0F);
    }

    pub fn set_tos(&mut self, tos: u8) {
        self.buffer.as_mut()[fields::TOS] = tos;
    }

    pub fn set_packet_len(&mut self, packet_len: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[fields::PACKET_LEN], packet_len);
    }

    pub fn set_identification(&mut self, id: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[fields::IDENTIFICATION], id);
    }

    pub fn set_flags_and_fragment_offset(&mut self, flags: u8, fragment_offset: u16) {
        let value = ((flags as u16 & 0x07) << 13) | (fragment_offset & 0x1FFF);
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[fields::FLAGS_FRAGMENT], value);
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[fields::TTL] = ttl;
    }

    pub fn set_protocol(&mut self, protocol: u8) {
        self.buffer.as_mut()[fields::PROTOCOL] = protocol;
    }

    pub fn set_header_checksum(&mut self, checksum: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[fields::CHECKSUM], checksum);
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[fields::SRC_ADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn set_dst_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[fields::DST_ADDR].copy_from_slice(addr.as_bytes());
    }

    /// Recomputes and writes the header checksum.
    pub fn fill_checksum(&mut self) {
        let checksum = self.gen_header_checksum();
        self.set_header_checksum(checksum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let range = self.header_len() as usize .. self.packet_len() as usize;
        &mut self.buffer.as_mut()[range]
    }
}

/// Safe representation of an IPv4 header without options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub protocol: u8,
    pub identification: u16,
    pub ttl: u8,
    pub payload_len: usize,
}

impl Repr {
    /// Returns the IPv4 packet size needed to serialize this representation
    /// and its payload.
    pub fn buffer_len(&self) -> usize {
        Packet::<&[u8]>::buffer_len(self.payload_len)
    }

    /// Reads the header of a packet which passed check_encoding().
    pub fn deserialize<T: AsRef<[u8]>>(packet: &Packet<T>) -> Repr {
        Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            protocol: packet.protocol(),
            identification: packet.identification(),
            ttl: packet.ttl(),
            payload_len: packet.payload().len(),
        }
    }

    /// Serializes the header into a packet and fills in the header checksum.
    pub fn serialize<T>(&self, packet: &mut Packet<T>) -> Result<()>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        if self.buffer_len() > packet.as_ref().len() || self.buffer_len() > 0xFFFF {
            return Err(Error::PacketTooLong);
        }

        packet.set_version_and_header_len(4, Packet::<&[u8]>::MIN_HEADER_LEN as u8);
        packet.set_tos(0);
        packet.set_packet_len(self.buffer_len() as u16);
        packet.set_identification(self.identification);
        packet.set_flags_and_fragment_offset(0, 0);
        packet.set_ttl(self.ttl);
        packet.set_protocol(self.protocol);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
        packet.fill_checksum();

        Ok(())
    }

    /// Serializes the header followed by the payload into a new buffer.
    pub fn to_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = vec![0; Packet::<&[u8]>::buffer_len(payload.len())];

        {
            let mut packet = Packet::try_new(&mut buffer[..])?;
            Repr {
                payload_len: payload.len(),
                ..*self
            }.serialize(&mut packet)?;
            packet.payload_mut().copy_from_slice(payload);
        }

        Ok(buffer)
    }
}
