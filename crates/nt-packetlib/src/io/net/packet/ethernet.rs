use super::{ensure_len, PacketError};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_VLAN: u16 = 0x8100;

pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// Group (multicast or broadcast) addresses have the I/G bit set in the first octet.
pub fn is_group_mac(mac: &[u8; 6]) -> bool {
    mac[0] & 0x01 != 0
}

#[derive(Clone, Copy, Debug)]
pub struct EthernetFrame<'a> {
    data: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    pub const HEADER_LEN: usize = 14;
    /// Length of an 802.1Q tag (TPID + TCI).
    pub const VLAN_TAG_LEN: usize = 4;

    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        ensure_len(data, Self::HEADER_LEN)?;
        Ok(Self { data })
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.data[12], self.data[13]])
    }

    /// The 802.1Q TCI when the frame carries a single VLAN tag.
    pub fn vlan_tci(&self) -> Option<u16> {
        if self.ethertype() != ETHERTYPE_VLAN || self.data.len() < Self::HEADER_LEN + 4 {
            return None;
        }
        Some(u16::from_be_bytes([self.data[14], self.data[15]]))
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[Self::HEADER_LEN..]
    }
}
