use core::net::Ipv4Addr;

use super::ipv4::IPPROTO_TCP;
use super::{checksum, ensure_len, PacketError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);

}

impl core::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> Self::Output {
        TcpFlags(self.0 | rhs.0)
    }
}

/// Byte offsets of the fields a segmentation engine rewrites.
pub const TCP_SEQ_OFFSET: usize = 4;
pub const TCP_FLAGS_OFFSET: usize = 13;
pub const TCP_CHECKSUM_OFFSET: usize = 16;

#[derive(Clone, Copy, Debug)]
pub struct TcpSegment<'a> {
    data: &'a [u8],
    header_len: usize,
}

impl<'a> TcpSegment<'a> {
    pub const MIN_HEADER_LEN: usize = 20;

    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        ensure_len(data, Self::MIN_HEADER_LEN)?;
        let data_offset = data[12] >> 4;
        if data_offset < 5 {
            return Err(PacketError::Malformed("TCP data offset < 5"));
        }
        let header_len = (data_offset as usize) * 4;
        ensure_len(data, header_len)?;
        Ok(Self { data, header_len })
    }

    pub fn seq_number(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn checksum_valid_ipv4(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        checksum::transport_checksum_ipv4(src_ip, dst_ip, IPPROTO_TCP, self.as_bytes()) == 0
    }
}
