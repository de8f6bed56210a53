use core::net::Ipv4Addr;

use super::{checksum, ensure_len, PacketError};

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

#[derive(Clone, Copy, Debug)]
pub struct Ipv4Packet<'a> {
    data: &'a [u8],
    header_len: usize,
    total_len: usize,
}

impl<'a> Ipv4Packet<'a> {
    pub const MIN_HEADER_LEN: usize = 20;

    /// Parses an IPv4 header and checks that the buffer holds `total_len` bytes.
    ///
    /// Trailing bytes past `total_len` (Ethernet padding) are allowed and excluded from
    /// [`Ipv4Packet::payload`].
    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        ensure_len(data, Self::MIN_HEADER_LEN)?;
        if data[0] >> 4 != 4 {
            return Err(PacketError::Malformed("IP version != 4"));
        }
        let header_len = (data[0] & 0x0f) as usize * 4;
        if header_len < Self::MIN_HEADER_LEN {
            return Err(PacketError::Malformed("IPv4 IHL < 5"));
        }
        ensure_len(data, header_len)?;
        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if total_len < header_len {
            return Err(PacketError::Malformed("IPv4 total length < header length"));
        }
        ensure_len(data, total_len)?;
        Ok(Self {
            data,
            header_len,
            total_len,
        })
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    /// True when this is a non-first fragment or more fragments follow.
    pub fn is_fragment(&self) -> bool {
        let frag = u16::from_be_bytes([self.data[6], self.data[7]]);
        frag & 0x3fff != 0
    }

    pub fn protocol(&self) -> u8 {
        self.data[9]
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[12], self.data[13], self.data[14], self.data[15])
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[16], self.data[17], self.data[18], self.data[19])
    }

    pub fn header(&self) -> &'a [u8] {
        &self.data[..self.header_len]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header_len..self.total_len]
    }

    pub fn header_checksum_valid(&self) -> bool {
        checksum::internet_checksum(self.header()) == 0
    }
}
