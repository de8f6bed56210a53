/// Size of the block written by a `DTCCR` dump command.
pub const TALLY_DUMP_LEN: usize = 64;

/// C+ statistics block. All counters wrap on overflow like the silicon's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyCounters {
    pub tx_ok: u64,
    pub rx_ok: u64,
    pub tx_err: u64,
    pub rx_err: u32,
    pub miss_pkt: u16,
    pub frame_align_err: u16,
    pub tx_one_collision: u32,
    pub tx_multi_collision: u32,
    pub rx_ok_phys: u64,
    pub rx_ok_broadcast: u64,
    pub rx_ok_multicast: u32,
    pub tx_abort: u16,
    pub tx_underrun: u16,
}

impl TallyCounters {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Little-endian image in the layout drivers expect at the dump address.
    pub fn to_bytes(&self) -> [u8; TALLY_DUMP_LEN] {
        let mut out = [0u8; TALLY_DUMP_LEN];
        out[0..8].copy_from_slice(&self.tx_ok.to_le_bytes());
        out[8..16].copy_from_slice(&self.rx_ok.to_le_bytes());
        out[16..24].copy_from_slice(&self.tx_err.to_le_bytes());
        out[24..28].copy_from_slice(&self.rx_err.to_le_bytes());
        out[28..30].copy_from_slice(&self.miss_pkt.to_le_bytes());
        out[30..32].copy_from_slice(&self.frame_align_err.to_le_bytes());
        out[32..36].copy_from_slice(&self.tx_one_collision.to_le_bytes());
        out[36..40].copy_from_slice(&self.tx_multi_collision.to_le_bytes());
        out[40..48].copy_from_slice(&self.rx_ok_phys.to_le_bytes());
        out[48..56].copy_from_slice(&self.rx_ok_broadcast.to_le_bytes());
        out[56..60].copy_from_slice(&self.rx_ok_multicast.to_le_bytes());
        out[60..62].copy_from_slice(&self.tx_abort.to_le_bytes());
        out[62..64].copy_from_slice(&self.tx_underrun.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_layout_matches_offsets() {
        let tally = TallyCounters {
            tx_ok: 0x0102_0304_0506_0708,
            rx_ok: 2,
            tx_err: 3,
            rx_err: 4,
            miss_pkt: 5,
            frame_align_err: 6,
            tx_one_collision: 7,
            tx_multi_collision: 8,
            rx_ok_phys: 9,
            rx_ok_broadcast: 10,
            rx_ok_multicast: 11,
            tx_abort: 12,
            tx_underrun: 0xbeef,
        };
        let bytes = tally.to_bytes();
        assert_eq!(&bytes[0..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[8], 2);
        assert_eq!(bytes[16], 3);
        assert_eq!(bytes[24], 4);
        assert_eq!(bytes[28], 5);
        assert_eq!(bytes[30], 6);
        assert_eq!(bytes[32], 7);
        assert_eq!(bytes[36], 8);
        assert_eq!(bytes[40], 9);
        assert_eq!(bytes[48], 10);
        assert_eq!(bytes[56], 11);
        assert_eq!(bytes[60], 12);
        assert_eq!(&bytes[62..64], &[0xef, 0xbe]);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut tally = TallyCounters {
            rx_err: 9,
            ..Default::default()
        };
        tally.clear();
        assert_eq!(tally.to_bytes(), [0u8; TALLY_DUMP_LEN]);
    }
}
