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

use crate::{
    Error,
    Result,
};

/// [MAC address](https://en.wikipedia.org/wiki/MAC_address) in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Address([u8; 6]);

impl Address {
    pub const BROADCAST: Address = Address([0xFF; 6]);

    pub const ZERO: Address = Address([0x00; 6]);

    /// Creates a MAC address from a network byte order buffer.
    pub fn new(addr: [u8; 6]) -> Address {
        Address(addr)
    }

    /// Tries to create a MAC address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 6 {
            return Err(Error::InvalidPacket);
        }

        let mut _addr: [u8; 6] = [0; 6];
        _addr.clone_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Returns a reference to the network byte order representation of the
    /// address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks if this is a broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    // Checks if this is a multicast address.
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0b00000001) > 0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5],
        )
    }
}

impl FromStr for Address {
    type Err = ();

    /// Parses a MAC address from an A:B:C:D:E:F style string.
    fn from_str(addr: &str) -> StdResult<Address, Self::Err> {
        let bytes = addr
            .split(':')
            .map(|token| u8::from_str_radix(token, 16))
            .collect::<StdResult<Vec<_>, _>>()
            .map_err(|_| ())?;

        if bytes.len() != 6 {
            return Err(());
        }

        let mut mac: [u8; 6] = [0; 6];
        mac.clone_from_slice(&bytes);

        Ok(Address::new(mac))
    }
}

/// [https://en.wikipedia.org/wiki/EtherType](https://en.wikipedia.org/wiki/EtherType)
pub mod eth_types {
    pub const IPV4: u16 = 0x800;

    pub const ARP: u16 = 0x806;
}

mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const DST_ADDR: Range<usize> = 0 .. 6;

    pub const SRC_ADDR: Range<usize> = 6 .. 12;

    pub const PAYLOAD_TYPE: Range<usize> = 12 .. 14;

    pub const PAYLOAD: RangeFrom<usize> = 14 ..;
}

/// View of a byte buffer as an Ethernet frame.
#[derive(Debug)]
pub struct Frame<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Frame<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

impl<T: AsRef<[u8]>> Frame<T> {
    pub const HEADER_LEN: usize = 14;

    /// Frames shorter than this are zero padded on the wire (FCS excluded).
    pub const MIN_FRAME_LEN: usize = 60;

    pub const MAX_PAYLOAD_LEN: usize = 1500;

    pub const MAX_FRAME_LEN: usize = Self::HEADER_LEN + Self::MAX_PAYLOAD_LEN;

    /// Tries to create an Ethernet frame view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Frame<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::InvalidPacket)
        } else {
            Ok(Frame { buffer })
        }
    }

    /// Returns the length of an Ethernet frame with the specified payload
    /// size, including any padding.
    pub fn buffer_len(payload_len: usize) -> usize {
        std::cmp::max(Self::HEADER_LEN + payload_len, Self::MIN_FRAME_LEN)
    }

    pub fn dst_addr(&self) -> Address {
        let mut addr = [0; 6];
        addr.copy_from_slice(&self.buffer.as_ref()[fields::DST_ADDR]);
        Address(addr)
    }

    pub fn src_addr(&self) -> Address {
        let mut addr = [0; 6];
        addr.copy_from_slice(&self.buffer.as_ref()[fields::SRC_ADDR]);
        Address(addr)
    }

    pub fn payload_type(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[fields::PAYLOAD_TYPE])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Frame<T> {
    pub fn set_dst_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[fields::DST_ADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[fields::SRC_ADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn set_payload_type(&mut self, payload_type: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[fields::PAYLOAD_TYPE], payload_type);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::PAYLOAD]
    }
}

/// Safe representation of an Ethernet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub dst_addr: Address,
    pub src_addr: Address,
    pub ethertype: u16,
}

impl Repr {
    /// Encodes a frame with this header and the payload, zero padded up to
    /// the minimum frame length.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > Frame::<&[u8]>::MAX_PAYLOAD_LEN {
            return Err(Error::PacketTooLong);
        }

        let mut buffer = vec![0; Frame::<&[u8]>::buffer_len(payload.len())];

        {
            let mut frame = Frame::try_new(&mut buffer[..])?;
            frame.set_dst_addr(self.dst_addr);
            frame.set_src_addr(self.src_addr);
            frame.set_payload_type(self.ethertype);
            frame.payload_mut()[.. payload.len()].copy_from_slice(payload);
        }

        Ok(buffer)
    }

    /// Decodes the header of a frame received by a station with address
    /// `own_addr`, returning the header and payload (padding included).
    ///
    /// Frames addressed to neither `own_addr` nor broadcast are reported as
    /// `Error::NoDataToRead`, which is not a failure.
    pub fn decode(buffer: &[u8], own_addr: Address) -> Result<(Repr, &[u8])> {
        let frame = Frame::try_new(buffer)?;
        let dst_addr = frame.dst_addr();

        if dst_addr != own_addr && !dst_addr.is_broadcast() {
            return Err(Error::NoDataToRead);
        }

        let repr = Repr {
            dst_addr,
            src_addr: frame.src_addr(),
            ethertype: frame.payload_type(),
        };

        Ok((repr, &buffer[Frame::<&[u8]>::HEADER_LEN ..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own() -> Address {
        Address::new([0x06, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    fn repr(dst_addr: Address) -> Repr {
        Repr {
            dst_addr,
            src_addr: Address::new([0x02, 0, 0, 0, 0, 1]),
            ethertype: eth_types::IPV4,
        }
    }

    #[test]
    fn test_is_broadcast() {
        assert!(Address::BROADCAST.is_broadcast());
        assert!(!own().is_broadcast());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!("06:11:22:33:44:55".parse::<Address>().unwrap(), own());
        assert!("06:11:22:33:44".parse::<Address>().is_err());
        assert!("06:11:22:33:44:GG".parse::<Address>().is_err());
    }

    #[test]
    fn test_short_payload_is_padded() {
        for payload_len in 0 .. 47 {
            let payload = vec![0xAB; payload_len];
            let buffer = repr(own()).encode(&payload).unwrap();
            assert_eq!(buffer.len(), 60);
            assert!(buffer[14 + payload_len ..].iter().all(|byte| *byte == 0));
        }
    }

    #[test]
    fn test_encode_decode() {
        for payload_len in &[0, 1, 45, 46, 47, 512, 1500] {
            let payload: Vec<u8> = (0 .. *payload_len).map(|i| i as u8).collect();
            let buffer = repr(own()).encode(&payload).unwrap();
            assert!(buffer.len() >= 60);

            let (decoded, decoded_payload) = Repr::decode(&buffer, own()).unwrap();
            assert_eq!(decoded, repr(own()));
            assert_eq!(&decoded_payload[.. payload.len()], &payload[..]);
        }
    }

    #[test]
    fn test_encode_oversized_payload() {
        assert_matches!(repr(own()).encode(&[0; 1501]), Err(Error::PacketTooLong));
    }

    #[test]
    fn test_decode_short_frame() {
        assert_matches!(Repr::decode(&[0; 13], own()), Err(Error::InvalidPacket));
    }

    #[test]
    fn test_decode_filters_destination() {
        let buffer = repr(Address::new([0x02, 9, 9, 9, 9, 9])).encode(&[]).unwrap();
        assert_matches!(Repr::decode(&buffer, own()), Err(Error::NoDataToRead));

        let buffer = repr(Address::BROADCAST).encode(&[]).unwrap();
        assert_matches!(Repr::decode(&buffer, own()), Ok(_));
    }
}
