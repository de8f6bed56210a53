//! RFC 1071 Internet checksum.

use core::net::Ipv4Addr;

/// Adds `data` as big-endian 16-bit words to `sum` without folding.
///
/// An odd trailing byte is padded with zero on the right.
pub fn ones_complement_add(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([chunk[0], chunk[1]]) as u32);
    }
    if let Some(&last) = chunks.remainder().first() {
        sum = sum.wrapping_add((last as u32) << 8);
    }
    sum
}

/// Folds carries back in and complements.
pub fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(ones_complement_add(0, data))
}

/// Sum of the IPv4 pseudo-header used by TCP and UDP.
pub fn pseudo_header_sum_ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, l4_len: u16) -> u32 {
    let mut sum = ones_complement_add(0, &src.octets());
    sum = ones_complement_add(sum, &dst.octets());
    sum = sum.wrapping_add(protocol as u32);
    sum.wrapping_add(l4_len as u32)
}

/// Checksum of a TCP/UDP segment including its IPv4 pseudo-header.
///
/// With the checksum field zeroed this yields the value to store; over a segment carrying a
/// correct checksum it yields 0.
pub fn transport_checksum_ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let sum = pseudo_header_sum_ipv4(src, dst, protocol, segment.len() as u16);
    fold(ones_complement_add(sum, segment))
}
