//! C+ descriptor wire format.
//!
//! Both rings use 16-byte little-endian descriptors made of four dwords. Fields are described by
//! `(dword, shift, width)` triples and read/written through [`Descriptor::get`]/[`Descriptor::set`]
//! over the raw image, so the byte layout in guest memory is the only representation.
//!
//! ```text
//! TX dw0  31 OWN | 30 EOR | 29 FS | 28 LS | 27 LGSEN | 26..16 MSS (LGSEN)
//!         18 IPCS | 17 UDPCS | 16 TCPCS (!LGSEN)
//!         status on writeback: 25 UNF | 23 TES | 22 OWC | 21 LNKF | 20 EXC
//!         15..0 buffer size
//!    dw1  17 TAGC | 15..0 VLAN tag (network byte order)
//!
//! RX dw0  31 OWN | 30 EOR | 29 FS | 28 LS | 26 MAR | 25 PAM | 24 BAR | 19 RUNT | 18 CRC
//!         17..16 PID | 15 IPF | 14 UDPF | 13 TCPF | 12..0 buffer size / frame length
//!    dw1  16 TAVA | 15..0 VLAN tag (network byte order)
//!
//!    dw2  buffer address low
//!    dw3  buffer address high
//! ```

use memory::GuestMemory;

use crate::error::{DmaError, DmaStage};
use crate::ring::RingCursor;

pub const DESC_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescField {
    pub dword: usize,
    pub shift: u32,
    pub width: u32,
}

impl DescField {
    pub const fn new(dword: usize, shift: u32, width: u32) -> Self {
        Self {
            dword,
            shift,
            width,
        }
    }

    pub const fn mask(self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }
}

pub mod tx {
    use super::DescField;

    pub const OWN: DescField = DescField::new(0, 31, 1);
    pub const EOR: DescField = DescField::new(0, 30, 1);
    pub const FS: DescField = DescField::new(0, 29, 1);
    pub const LS: DescField = DescField::new(0, 28, 1);
    pub const LGSEN: DescField = DescField::new(0, 27, 1);
    pub const MSS: DescField = DescField::new(0, 16, 11);
    pub const UNF: DescField = DescField::new(0, 25, 1);
    pub const TES: DescField = DescField::new(0, 23, 1);
    pub const OWC: DescField = DescField::new(0, 22, 1);
    pub const LNKF: DescField = DescField::new(0, 21, 1);
    pub const EXC: DescField = DescField::new(0, 20, 1);
    pub const IPCS: DescField = DescField::new(0, 18, 1);
    pub const UDPCS: DescField = DescField::new(0, 17, 1);
    pub const TCPCS: DescField = DescField::new(0, 16, 1);
    pub const BUFFER_SIZE: DescField = DescField::new(0, 0, 16);

    pub const TAGC: DescField = DescField::new(1, 17, 1);
    pub const VLAN_TAG: DescField = DescField::new(1, 0, 16);

    pub const BUF_LO: DescField = DescField::new(2, 0, 32);
    pub const BUF_HI: DescField = DescField::new(3, 0, 32);

    /// Error bits cleared on every completion.
    pub const ERROR_BITS: [DescField; 5] = [UNF, TES, OWC, LNKF, EXC];
}

pub mod rx {
    use super::DescField;

    pub const OWN: DescField = DescField::new(0, 31, 1);
    pub const EOR: DescField = DescField::new(0, 30, 1);
    pub const FS: DescField = DescField::new(0, 29, 1);
    pub const LS: DescField = DescField::new(0, 28, 1);
    pub const MAR: DescField = DescField::new(0, 26, 1);
    pub const PAM: DescField = DescField::new(0, 25, 1);
    pub const BAR: DescField = DescField::new(0, 24, 1);
    pub const RUNT: DescField = DescField::new(0, 19, 1);
    pub const CRC: DescField = DescField::new(0, 18, 1);
    pub const PID: DescField = DescField::new(0, 16, 2);
    pub const IPF: DescField = DescField::new(0, 15, 1);
    pub const UDPF: DescField = DescField::new(0, 14, 1);
    pub const TCPF: DescField = DescField::new(0, 13, 1);
    /// Buffer size as programmed by the driver, frame length (CRC included) after completion.
    pub const BUFFER_SIZE: DescField = DescField::new(0, 0, 13);

    pub const TAVA: DescField = DescField::new(1, 16, 1);
    pub const VLAN_TAG: DescField = DescField::new(1, 0, 16);

    pub const BUF_LO: DescField = DescField::new(2, 0, 32);
    pub const BUF_HI: DescField = DescField::new(3, 0, 32);

    pub const PID_NON_IP: u32 = 0b00;
    pub const PID_TCP: u32 = 0b01;
    pub const PID_UDP: u32 = 0b10;
    pub const PID_IP: u32 = 0b11;
}

/// Raw 16-byte descriptor image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    raw: [u8; DESC_LEN],
}

impl Descriptor {
    pub fn from_bytes(raw: [u8; DESC_LEN]) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; DESC_LEN] {
        &self.raw
    }

    pub fn dword(&self, index: usize) -> u32 {
        let off = index * 4;
        u32::from_le_bytes([
            self.raw[off],
            self.raw[off + 1],
            self.raw[off + 2],
            self.raw[off + 3],
        ])
    }

    pub fn set_dword(&mut self, index: usize, value: u32) {
        let off = index * 4;
        self.raw[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn get(&self, field: DescField) -> u32 {
        (self.dword(field.dword) >> field.shift) & field.mask()
    }

    pub fn set(&mut self, field: DescField, value: u32) {
        let mask = field.mask() << field.shift;
        let dw = self.dword(field.dword);
        self.set_dword(
            field.dword,
            (dw & !mask) | ((value << field.shift) & mask),
        );
    }

    pub fn flag(&self, field: DescField) -> bool {
        self.get(field) != 0
    }

    pub fn set_flag(&mut self, field: DescField, on: bool) {
        self.set(field, u32::from(on));
    }

    /// dw2/dw3 as a 64-bit bus address (same words on both rings).
    pub fn buffer_addr(&self) -> u64 {
        u64::from(self.dword(2)) | (u64::from(self.dword(3)) << 32)
    }
}

/// Which ring a descriptor lives in; decides the device-writable words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescKind {
    Tx,
    Rx,
}

impl DescKind {
    /// Bytes from the start of the descriptor the device may write: TX status lives in dw0
    /// only, RX status in dw0 and the VLAN word dw1. Buffer pointers are never written.
    pub const fn writeback_len(self) -> usize {
        match self {
            Self::Tx => 4,
            Self::Rx => 8,
        }
    }

    fn fetch_stage(self) -> DmaStage {
        match self {
            Self::Tx => DmaStage::TxDescriptorFetch,
            Self::Rx => DmaStage::RxDescriptorFetch,
        }
    }

    fn writeback_stage(self) -> DmaStage {
        match self {
            Self::Tx => DmaStage::TxDescriptorWriteback,
            Self::Rx => DmaStage::RxDescriptorWriteback,
        }
    }
}

pub fn fetch<M: GuestMemory + ?Sized>(
    mem: &M,
    ring: &RingCursor,
    index: u32,
    kind: DescKind,
) -> Result<Descriptor, DmaError> {
    let addr = ring.descriptor_addr(index);
    let mut raw = [0u8; DESC_LEN];
    mem.read_into(addr, &mut raw)
        .map_err(|err| DmaError::new(kind.fetch_stage(), addr, err))?;
    Ok(Descriptor::from_bytes(raw))
}

/// Write the device-owned words of `desc` back to slot `index`.
///
/// The whole span goes out in one access, so a fault leaves guest memory untouched.
pub fn writeback<M: GuestMemory + ?Sized>(
    mem: &mut M,
    ring: &RingCursor,
    index: u32,
    kind: DescKind,
    desc: &Descriptor,
) -> Result<(), DmaError> {
    let addr = ring.descriptor_addr(index);
    mem.write_from(addr, &desc.as_bytes()[..kind.writeback_len()])
        .map_err(|err| DmaError::new(kind.writeback_stage(), addr, err))
}
