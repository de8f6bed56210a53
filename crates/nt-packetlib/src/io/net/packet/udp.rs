use core::net::Ipv4Addr;

use super::ipv4::IPPROTO_UDP;
use super::{checksum, ensure_len, PacketError};

pub const UDP_CHECKSUM_OFFSET: usize = 6;

#[derive(Clone, Copy, Debug)]
pub struct UdpPacket<'a> {
    data: &'a [u8],
    length: usize,
}

impl<'a> UdpPacket<'a> {
    pub const HEADER_LEN: usize = 8;

    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        ensure_len(data, Self::HEADER_LEN)?;
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        if length < Self::HEADER_LEN {
            return Err(PacketError::Malformed("UDP length < header length"));
        }
        ensure_len(data, length)?;
        Ok(Self { data, length })
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[6], self.data[7]])
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        &self.data[..self.length]
    }

    /// A zero checksum means the sender did not compute one.
    pub fn checksum_valid_ipv4(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        checksum::transport_checksum_ipv4(src_ip, dst_ip, IPPROTO_UDP, self.as_bytes()) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_checksum_is_accepted_and_bad_one_is_not() {
        let src_ip = Ipv4Addr::new(10, 0, 0, 1);
        let dst_ip = Ipv4Addr::new(10, 0, 0, 2);
        let mut buf = vec![0x04, 0xd2, 0x00, 0x35, 0x00, 0x0d, 0x00, 0x00];
        buf.extend_from_slice(b"hello");

        let pkt = UdpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.as_bytes().len(), 13);
        assert!(pkt.checksum_valid_ipv4(src_ip, dst_ip));

        buf[6] = 0x12;
        let pkt = UdpPacket::parse(&buf).unwrap();
        assert!(!pkt.checksum_valid_ipv4(src_ip, dst_ip));
    }
}
