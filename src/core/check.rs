use byteorder::{
    ByteOrder,
    NetworkEndian,
};

/// Calculates the Internet Checksum from [RFC1071](https://tools.ietf.org/html/rfc1071).
///
/// The checksum field of the header being summed should be zeroed. Summing
/// over a buffer with a correct checksum in place yields zero.
///
/// See [IPv4 header checksum](https://en.wikipedia.org/wiki/IPv4_header_checksum) for an example.
pub fn internet_checksum(buffer: &[u8]) -> u16 {
    let mut acc = 0 as u32;

    for word in buffer.chunks(2) {
        acc += if word.len() == 2 {
            NetworkEndian::read_u16(word) as u32
        } else {
            (word[0] as u32) << 8
        };
    }

    while acc > 0xFFFF {
        acc = (acc & 0xFFFF) + (acc >> 16);
    }

    !acc as u16
}

/// Checks that a buffer carrying its own checksum sums to zero.
pub fn verify_checksum(buffer: &[u8]) -> bool {
    internet_checksum(buffer) == 0
}
