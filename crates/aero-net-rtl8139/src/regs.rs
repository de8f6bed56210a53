//! Register window layout and byte-lane dispatch.
//!
//! The 256-byte window is backed by one byte buffer ([`RegisterFile`]); registers whose value is
//! derived from other device state (ISR, CAPR, ...) are marked [`RegKind::Computed`] and never
//! stored there. An MMIO access of any width is split by [`split_access`] into one
//! [`LaneWrite`] per touched register, so a 1-byte write to the OWN lane of `TSDn` and a 4-byte
//! write of the same register take the same path.

pub const RTL8139_IO_SIZE: usize = 0x100;

pub const CR_BUFE: u32 = 0x01;
pub const CR_TE: u32 = 0x04;
pub const CR_RE: u32 = 0x08;
pub const CR_RST: u32 = 0x10;

pub const CPCR_TX_ENB: u32 = 0x0001;
pub const CPCR_RX_ENB: u32 = 0x0002;
pub const CPCR_RX_CHKSUM: u32 = 0x0020;
pub const CPCR_RX_VLAN: u32 = 0x0040;

pub const TSD_SIZE_MASK: u32 = 0x1fff;
pub const TSD_OWN: u32 = 0x2000;
pub const TSD_TUN: u32 = 0x4000;
pub const TSD_TOK: u32 = 0x8000;
pub const TSD_TABT: u32 = 0x4000_0000;
/// Bits of `TSDn` a driver write may change.
pub const TSD_WRITABLE: u32 = 0x003f_3fff;
/// Early-TX threshold bits kept across driver writes.
pub const TSD_PRESERVED: u32 = 0x00c0_0000;
/// `DTCCR` (TSD0 in C+ mode) dump command.
pub const DTCCR_CMD: u32 = 0x08;

/// Both loopback bits; `0b11` routes transmitted frames back into the receiver.
pub const TCR_LOOPBACK: u32 = 0x0006_0000;
/// RTL8139C+ hardware revision, reported in TCR.
pub const TCR_RESET: u32 = 0x7480_0000;

pub const RCR_WRAP: u32 = 1 << 7;

pub const CFG9346_OPMODE_MASK: u32 = 0xc0;
pub const CFG9346_AUTOLOAD: u32 = 0x40;
pub const CFG9346_CONFIG_WRITE: u32 = 0xc0;

pub const TPPOLL_NPQ: u32 = 0x40;

pub const BMCR_RESET: u32 = 0x8000;
pub const BMCR_AUTONEG: u32 = 0x1000;
pub const BMSR_LINK: u32 = 0x0004;
pub const BMSR_RESET: u32 = 0x7809 | 0x0020;
pub const ANAR_RESET: u32 = 0x05e1;
pub const CSCR_RESET: u32 = (1 << 6) | (1 << 8) | (1 << 9);

pub const HLTCLK_RUN: u32 = b'R' as u32;
pub const HLTCLK_HALT: u32 = b'H' as u32;

pub const RTL8139_PCI_REVID: u32 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Idr0,
    Idr4,
    Mar0,
    Mar4,
    Tsd0,
    Tsd1,
    Tsd2,
    Tsd3,
    Tsad0,
    Tsad1,
    Tsad2,
    Tsad3,
    RbStart,
    Cr,
    Capr,
    Cbr,
    Imr,
    Isr,
    Tcr,
    Rcr,
    Tctr,
    Mpc,
    Cfg9346,
    Config0,
    Config1,
    TimerInt,
    Msr,
    Config3,
    Config4,
    HltClk,
    MulInt,
    RerId,
    TxSummary,
    Bmcr,
    Bmsr,
    Anar,
    Anlpar,
    Aner,
    Cscr,
    Config5,
    TpPoll,
    CpCr,
    IntrMitigate,
    RdsarLo,
    RdsarHi,
    Etthr,
}

impl Reg {
    pub const TSD: [Reg; 4] = [Reg::Tsd0, Reg::Tsd1, Reg::Tsd2, Reg::Tsd3];
    pub const TSAD: [Reg; 4] = [Reg::Tsad0, Reg::Tsad1, Reg::Tsad2, Reg::Tsad3];

    pub fn info(self) -> &'static RegInfo {
        &REGISTER_MAP[self as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegKind {
    /// Plain bytes in the register file.
    Storage,
    /// Stored, and a handler runs when a trigger lane is written.
    SideEffect,
    /// Synthesised on read from device state; writes go to a handler only.
    Computed,
}

/// Precondition for a write to land at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGate {
    Always,
    /// `9346CR` operating mode must be "config register write enable".
    ConfigUnlocked,
    /// `CR.TE` must be set.
    TransmitterEnabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegInfo {
    pub reg: Reg,
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
    pub write_mask: u32,
    /// Bit `n` set: writing byte lane `n` fires the register's side effect.
    pub trigger_lanes: u8,
    pub kind: RegKind,
    pub gate: WriteGate,
}

const ALL_LANES: u8 = 0b1111;

const fn reg(
    reg: Reg,
    name: &'static str,
    offset: usize,
    width: usize,
    write_mask: u32,
    trigger_lanes: u8,
    kind: RegKind,
) -> RegInfo {
    RegInfo {
        reg,
        name,
        offset,
        width,
        write_mask,
        trigger_lanes,
        kind,
        gate: WriteGate::Always,
    }
}

const fn gated(info: RegInfo, gate: WriteGate) -> RegInfo {
    RegInfo { gate, ..info }
}

use RegKind::{Computed, SideEffect, Storage};

/// Indexed by `Reg as usize`.
pub const REGISTER_MAP: [RegInfo; 46] = [
    reg(Reg::Idr0, "IDR0", 0x00, 4, u32::MAX, 0, Storage),
    reg(Reg::Idr4, "IDR4", 0x04, 2, 0xffff, 0, Storage),
    reg(Reg::Mar0, "MAR0", 0x08, 4, u32::MAX, 0, Storage),
    reg(Reg::Mar4, "MAR4", 0x0c, 4, u32::MAX, 0, Storage),
    // TSDn masking depends on C/C+ mode and is done by the handler. Lane 1 holds OWN (C mode
    // transmit), lane 0 the DTCCR dump command (C+ mode).
    reg(Reg::Tsd0, "TSD0", 0x10, 4, u32::MAX, 0b0010, SideEffect),
    reg(Reg::Tsd1, "TSD1", 0x14, 4, u32::MAX, 0b0010, SideEffect),
    reg(Reg::Tsd2, "TSD2", 0x18, 4, u32::MAX, 0b0010, SideEffect),
    reg(Reg::Tsd3, "TSD3", 0x1c, 4, u32::MAX, 0b0010, SideEffect),
    reg(Reg::Tsad0, "TSAD0", 0x20, 4, u32::MAX, 0, Storage),
    reg(Reg::Tsad1, "TSAD1", 0x24, 4, u32::MAX, 0, Storage),
    reg(Reg::Tsad2, "TSAD2", 0x28, 4, u32::MAX, 0, Storage),
    reg(Reg::Tsad3, "TSAD3", 0x2c, 4, u32::MAX, 0, Storage),
    reg(Reg::RbStart, "RBSTART", 0x30, 4, u32::MAX, 0, Storage),
    reg(Reg::Cr, "CR", 0x37, 1, CR_RST | CR_RE | CR_TE, 0b0001, SideEffect),
    reg(Reg::Capr, "CAPR", 0x38, 2, 0xffff, 0b0011, Computed),
    reg(Reg::Cbr, "CBR", 0x3a, 2, 0, 0, Computed),
    reg(Reg::Imr, "IMR", 0x3c, 2, 0xffff, 0b0011, Computed),
    reg(Reg::Isr, "ISR", 0x3e, 2, 0xffff, 0b0011, Computed),
    gated(
        reg(Reg::Tcr, "TCR", 0x40, 4, 0x030f_07f0, 0, Storage),
        WriteGate::TransmitterEnabled,
    ),
    reg(Reg::Rcr, "RCR", 0x44, 4, 0x0f03_ffbf, ALL_LANES, SideEffect),
    reg(Reg::Tctr, "TCTR", 0x48, 4, 0, 0, Computed),
    reg(Reg::Mpc, "MPC", 0x4c, 4, 0, ALL_LANES, Computed),
    reg(Reg::Cfg9346, "9346CR", 0x50, 1, 0xce, 0b0001, SideEffect),
    gated(
        reg(Reg::Config0, "CONFIG0", 0x51, 1, 0x07, 0, Storage),
        WriteGate::ConfigUnlocked,
    ),
    gated(
        reg(Reg::Config1, "CONFIG1", 0x52, 1, 0xf3, 0, Storage),
        WriteGate::ConfigUnlocked,
    ),
    reg(Reg::TimerInt, "TimerInt", 0x54, 4, u32::MAX, 0, Storage),
    reg(Reg::Msr, "MSR", 0x58, 1, 0, 0, Computed),
    gated(
        reg(Reg::Config3, "CONFIG3", 0x59, 1, 0x70, 0, Storage),
        WriteGate::ConfigUnlocked,
    ),
    gated(
        reg(Reg::Config4, "CONFIG4", 0x5a, 1, 0xf5, 0, Storage),
        WriteGate::ConfigUnlocked,
    ),
    reg(Reg::HltClk, "HLTCLK", 0x5b, 1, 0xff, 0b0001, Computed),
    reg(Reg::MulInt, "MULINT", 0x5c, 2, 0x0fff, 0, Storage),
    reg(Reg::RerId, "RERID", 0x5e, 1, 0, 0, Computed),
    reg(Reg::TxSummary, "TSAD", 0x60, 2, 0, 0, Computed),
    // Bit 15 (PHY reset) lives in lane 1.
    reg(Reg::Bmcr, "BMCR", 0x62, 2, 0x0200, 0b0010, SideEffect),
    reg(Reg::Bmsr, "BMSR", 0x64, 2, 0x00c0, 0, Storage),
    reg(Reg::Anar, "ANAR", 0x66, 2, 0xffff, 0, Storage),
    reg(Reg::Anlpar, "ANLPAR", 0x68, 2, 0, 0, Storage),
    reg(Reg::Aner, "ANER", 0x6a, 2, 0xffff, 0, Storage),
    reg(Reg::Cscr, "CSCR", 0x74, 2, 0, 0, Storage),
    reg(Reg::Config5, "CONFIG5", 0xd8, 1, 0x7f, 0, Storage),
    reg(Reg::TpPoll, "TPPoll", 0xd9, 1, 0xff, 0b0001, Computed),
    reg(Reg::CpCr, "CPCR", 0xe0, 2, 0x007b, 0b0011, SideEffect),
    reg(Reg::IntrMitigate, "IntrMitigate", 0xe2, 2, 0, 0, Storage),
    reg(Reg::RdsarLo, "RDSAR0", 0xe4, 4, u32::MAX, 0, Storage),
    reg(Reg::RdsarHi, "RDSAR1", 0xe8, 4, u32::MAX, 0, Storage),
    reg(Reg::Etthr, "ETTHR", 0xec, 1, 0xff, 0, Storage),
];

const UNMAPPED: u8 = u8::MAX;

const OFFSET_INDEX: [u8; RTL8139_IO_SIZE] = {
    let mut table = [UNMAPPED; RTL8139_IO_SIZE];
    let mut i = 0;
    while i < REGISTER_MAP.len() {
        let info = &REGISTER_MAP[i];
        let mut b = 0;
        while b < info.width {
            table[info.offset + b] = i as u8;
            b += 1;
        }
        i += 1;
    }
    table
};

/// Register covering window byte `offset`, if any.
pub fn lookup(offset: usize) -> Option<&'static RegInfo> {
    match OFFSET_INDEX.get(offset) {
        Some(&idx) if idx != UNMAPPED => Some(&REGISTER_MAP[usize::from(idx)]),
        _ => None,
    }
}

/// The part of one MMIO write that lands in one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneWrite {
    pub reg: Reg,
    /// Written bytes at their lane positions; untouched lanes are zero.
    pub value: u32,
    pub lanes: u8,
}

impl LaneWrite {
    pub fn info(&self) -> &'static RegInfo {
        self.reg.info()
    }

    pub fn lane_mask(&self) -> u32 {
        (0..4)
            .filter(|lane| self.lanes & (1 << lane) != 0)
            .fold(0, |mask, lane| mask | (0xff << (lane * 8)))
    }

    pub fn wrote_lane(&self, lane: u32) -> bool {
        self.lanes & (1 << lane) != 0
    }

    pub fn triggers(&self) -> bool {
        self.lanes & self.info().trigger_lanes != 0
    }

    /// `old` with the written lanes replaced, ignoring the write mask.
    pub fn merge(&self, old: u32) -> u32 {
        let mask = self.lane_mask();
        (old & !mask) | (self.value & mask)
    }

    /// `old` with only the written, writable bits replaced.
    pub fn apply(&self, old: u32) -> u32 {
        let mask = self.lane_mask() & self.info().write_mask;
        (old & !mask) | (self.value & mask)
    }
}

/// Split a `size`-byte access at `offset` into per-register lane writes, in address order.
/// Bytes that fall on unmapped offsets or outside the window are dropped.
pub fn split_access(offset: usize, size: usize, value: u32) -> Vec<LaneWrite> {
    let mut out: Vec<LaneWrite> = Vec::with_capacity(size);
    for k in 0..size.min(4) {
        let Some(addr) = offset.checked_add(k) else {
            break;
        };
        let Some(info) = lookup(addr) else {
            continue;
        };
        let lane = addr - info.offset;
        let byte = (value >> (k * 8)) & 0xff;
        match out.last_mut() {
            Some(last) if last.reg == info.reg => {
                last.value |= byte << (lane * 8);
                last.lanes |= 1 << lane;
            }
            _ => out.push(LaneWrite {
                reg: info.reg,
                value: byte << (lane * 8),
                lanes: 1 << lane,
            }),
        }
    }
    out
}

/// Byte image of the storage registers.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    bytes: [u8; RTL8139_IO_SIZE],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            bytes: [0u8; RTL8139_IO_SIZE],
        }
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    pub fn get(&self, reg: Reg) -> u32 {
        let info = reg.info();
        let mut buf = [0u8; 4];
        buf[..info.width].copy_from_slice(&self.bytes[info.offset..info.offset + info.width]);
        u32::from_le_bytes(buf)
    }

    pub fn set(&mut self, reg: Reg, value: u32) {
        let info = reg.info();
        self.bytes[info.offset..info.offset + info.width]
            .copy_from_slice(&value.to_le_bytes()[..info.width]);
    }

    pub fn set_bits(&mut self, reg: Reg, bits: u32, on: bool) {
        let value = self.get(reg);
        self.set(reg, if on { value | bits } else { value & !bits });
    }

    /// Apply a lane write through the register's write mask; returns the stored value.
    pub fn store(&mut self, write: &LaneWrite) -> u32 {
        let value = write.apply(self.get(write.reg));
        self.set(write.reg, value);
        value
    }

    pub fn gate_open(&self, gate: WriteGate) -> bool {
        match gate {
            WriteGate::Always => true,
            WriteGate::ConfigUnlocked => {
                self.get(Reg::Cfg9346) & CFG9346_OPMODE_MASK == CFG9346_CONFIG_WRITE
            }
            WriteGate::TransmitterEnabled => self.get(Reg::Cr) & CR_TE != 0,
        }
    }

    pub fn mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.bytes[0x00..0x06]);
        mac
    }

    pub fn set_mac(&mut self, mac: [u8; 6]) {
        self.bytes[0x00..0x06].copy_from_slice(&mac);
    }

    pub fn multicast_hash(&self) -> [u8; 8] {
        let mut mar = [0u8; 8];
        mar.copy_from_slice(&self.bytes[0x08..0x10]);
        mar
    }

    pub fn tsd(&self) -> [u32; 4] {
        Reg::TSD.map(|r| self.get(r))
    }

    /// C+ normal-priority TX ring (`TNPDS`, aliased on TSAD0/TSAD1).
    pub fn tx_ring_base(&self) -> u64 {
        u64::from(self.get(Reg::Tsad0)) | (u64::from(self.get(Reg::Tsad1)) << 32)
    }

    pub fn rx_ring_base(&self) -> u64 {
        u64::from(self.get(Reg::RdsarLo)) | (u64::from(self.get(Reg::RdsarHi)) << 32)
    }

    /// `DTCCR` dump address: TSD1:TSD0 with the low six bits masked.
    pub fn tally_dump_addr(&self) -> u64 {
        u64::from(self.get(Reg::Tsd0) & !0x3f) | (u64::from(self.get(Reg::Tsd1)) << 32)
    }
}

/// Transmit status of all descriptors (register 0x60).
pub fn tx_summary(tsd: [u32; 4]) -> u32 {
    let mut out = 0;
    for (i, status) in tsd.iter().enumerate() {
        if status & TSD_TOK != 0 {
            out |= 1 << (12 + i);
        }
        if status & TSD_TUN != 0 {
            out |= 1 << (8 + i);
        }
        if status & TSD_TABT != 0 {
            out |= 1 << (4 + i);
        }
        if status & TSD_OWN != 0 {
            out |= 1 << i;
        }
    }
    out
}
