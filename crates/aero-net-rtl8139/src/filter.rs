//! Receive address filtering and the two CRC-32 flavours the controller uses.

use nt_packetlib::io::net::packet::ethernet::{is_group_mac, BROADCAST_MAC};

/// RCR accept bits.
pub const RCR_AAP: u32 = 1 << 0;
pub const RCR_APM: u32 = 1 << 1;
pub const RCR_AM: u32 = 1 << 2;
pub const RCR_AB: u32 = 1 << 3;

/// Receive filter state decoded from IDR, MAR and RCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFilter {
    pub unicast: [u8; 6],
    pub multicast_hash: [u8; 8],
    pub accept_all_phys: bool,
    pub accept_my_phys: bool,
    pub accept_multicast: bool,
    pub accept_broadcast: bool,
}

/// What the filter decided, in the order the silicon checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Accepted by `AAP`; no match bit is reported to the driver.
    Promiscuous,
    Broadcast,
    Multicast,
    Unicast,
    Reject,
}

impl Classification {
    pub fn accepted(self) -> bool {
        self != Self::Reject
    }
}

impl AddressFilter {
    pub fn from_registers(idr: [u8; 6], mar: [u8; 8], rcr: u32) -> Self {
        Self {
            unicast: idr,
            multicast_hash: mar,
            accept_all_phys: rcr & RCR_AAP != 0,
            accept_my_phys: rcr & RCR_APM != 0,
            accept_multicast: rcr & RCR_AM != 0,
            accept_broadcast: rcr & RCR_AB != 0,
        }
    }

    pub fn classify(&self, frame: &[u8]) -> Classification {
        if self.accept_all_phys {
            return Classification::Promiscuous;
        }
        let Some(dst) = frame.get(..6) else {
            return Classification::Reject;
        };
        let mut mac = [0u8; 6];
        mac.copy_from_slice(dst);

        if mac == BROADCAST_MAC {
            if self.accept_broadcast {
                Classification::Broadcast
            } else {
                Classification::Reject
            }
        } else if is_group_mac(&mac) {
            if self.accept_multicast && self.multicast_hit(&mac) {
                Classification::Multicast
            } else {
                Classification::Reject
            }
        } else if mac == self.unicast && self.accept_my_phys {
            Classification::Unicast
        } else {
            Classification::Reject
        }
    }

    pub fn multicast_hit(&self, mac: &[u8; 6]) -> bool {
        let idx = multicast_hash_index(mac);
        self.multicast_hash[idx >> 3] & (1 << (idx & 7)) != 0
    }
}

/// MAR bit a group address hashes to: the top six bits of the big-endian Ethernet CRC, which is
/// how Linux (`ether_crc`) and the BSDs program the table for this chip.
pub fn multicast_hash_index(mac: &[u8; 6]) -> usize {
    (ether_crc(mac) >> 26) as usize
}

/// Big-endian (MSB-first shift register) Ethernet CRC-32 without final inversion.
pub fn ether_crc(data: &[u8]) -> u32 {
    const POLY: u32 = 0x04c1_1db7;
    let mut crc = u32::MAX;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let carry = ((crc >> 31) ^ u32::from(b & 1)) & 1;
            crc <<= 1;
            b >>= 1;
            if carry != 0 {
                crc ^= POLY;
            }
        }
    }
    crc
}

/// IEEE 802.3 frame check sequence (reflected CRC-32, as zlib's `crc32`).
pub fn ethernet_fcs(data: &[u8]) -> u32 {
    const POLY: u32 = 0xedb8_8320;
    let mut crc = u32::MAX;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

    fn frame_to(dst: [u8; 6]) -> Vec<u8> {
        let mut f = dst.to_vec();
        f.extend_from_slice(&[0x02, 0, 0, 0, 0, 9, 0x08, 0x00]);
        f.resize(60, 0);
        f
    }

    fn filter(rcr: u32) -> AddressFilter {
        AddressFilter::from_registers(MAC, [0; 8], rcr)
    }

    #[test]
    fn fcs_check_value() {
        assert_eq!(ethernet_fcs(b"123456789"), 0xcbf4_3926);
        assert_eq!(ethernet_fcs(b""), 0);
    }

    #[test]
    fn ether_crc_matches_reflected_fcs_for_group_address() {
        let mac = [0x01, 0x00, 0x5e, 0x00, 0x00, 0x01];
        let by_reflection = (!ethernet_fcs(&mac)).reverse_bits();
        assert_eq!(ether_crc(&mac), by_reflection);
        assert_eq!(multicast_hash_index(&mac), (by_reflection >> 26) as usize);
    }

    #[test]
    fn unicast_needs_only_apm() {
        let f = filter(RCR_APM);
        assert_eq!(f.classify(&frame_to(MAC)), Classification::Unicast);
        assert_eq!(
            f.classify(&frame_to([0x02, 0, 0, 0, 0, 1])),
            Classification::Reject
        );
        assert_eq!(filter(0).classify(&frame_to(MAC)), Classification::Reject);
    }

    #[test]
    fn broadcast_and_promiscuous() {
        assert_eq!(
            filter(RCR_AB).classify(&frame_to(BROADCAST_MAC)),
            Classification::Broadcast
        );
        assert_eq!(
            filter(RCR_APM).classify(&frame_to(BROADCAST_MAC)),
            Classification::Reject
        );
        assert_eq!(
            filter(RCR_AAP).classify(&frame_to([0x02, 0, 0, 0, 0, 1])),
            Classification::Promiscuous
        );
    }

    #[test]
    fn multicast_consults_the_hash_table() {
        let group = [0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb];
        let idx = multicast_hash_index(&group);
        let mut mar = [0u8; 8];
        let miss = AddressFilter::from_registers(MAC, mar, RCR_AM);
        assert_eq!(miss.classify(&frame_to(group)), Classification::Reject);

        mar[idx >> 3] |= 1 << (idx & 7);
        let hit = AddressFilter::from_registers(MAC, mar, RCR_AM);
        assert_eq!(hit.classify(&frame_to(group)), Classification::Multicast);

        let not_accepting = AddressFilter::from_registers(MAC, mar, RCR_APM);
        assert_eq!(
            not_accepting.classify(&frame_to(group)),
            Classification::Reject
        );
    }

    proptest! {
        #[test]
        fn msb_first_crc_is_the_reflected_fcs(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(ether_crc(&data), (!ethernet_fcs(&data)).reverse_bits());
        }
    }
}
