//! ISR/IMR interrupt state and the level-triggered line derived from it.

use bitflags::bitflags;

bitflags! {
    /// ISR/IMR bit layout.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct InterruptCause: u16 {
        const ROK = 0x0001;
        const RER = 0x0002;
        const TOK = 0x0004;
        const TER = 0x0008;
        /// Rx buffer overflow / no free descriptor.
        const RXOVW = 0x0010;
        /// Packet underrun or link change.
        const PUN_LINKCHG = 0x0020;
        const FOVW = 0x0040;
        const LENCHG = 0x2000;
        const TIMEOUT = 0x4000;
        const SERR = 0x8000;
    }
}

impl InterruptCause {
    /// Bits 9..12 of both ISR and IMR are read-only; writes never change them.
    pub const RESERVED: u16 = 0x1e00;
}

/// Level-triggered INTx source: the line is high iff `status & mask != 0`.
///
/// Every mutator reports a line transition as `Some(level)` and returns `None` when the line did
/// not move, so the device can forward edges without tracking the previous level itself.
#[derive(Debug, Clone, Default)]
pub struct InterruptController {
    status: u16,
    mask: u16,
    line: bool,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn line(&self) -> bool {
        self.line
    }

    pub fn pending(&self) -> InterruptCause {
        InterruptCause::from_bits_truncate(self.status & self.mask)
    }

    pub fn raise(&mut self, cause: InterruptCause) -> Option<bool> {
        self.raise_deferred(cause);
        self.evaluate()
    }

    /// Latch `cause` without re-evaluating the line; pair with [`Self::evaluate`].
    pub fn raise_deferred(&mut self, cause: InterruptCause) {
        self.status |= cause.bits();
    }

    /// Write-1-to-clear acknowledge. Bits that are not pending are ignored.
    pub fn ack(&mut self, written: u16) -> Option<bool> {
        let clear = written & self.status & !InterruptCause::RESERVED;
        if clear == 0 {
            return None;
        }
        self.status &= !clear;
        self.evaluate()
    }

    pub fn set_mask(&mut self, value: u16) -> Option<bool> {
        self.mask = (value & !InterruptCause::RESERVED) | (self.mask & InterruptCause::RESERVED);
        self.evaluate()
    }

    pub fn evaluate(&mut self) -> Option<bool> {
        let level = self.status & self.mask != 0;
        if level == self.line {
            return None;
        }
        self.line = level;
        Some(level)
    }

    pub fn reset(&mut self) -> Option<bool> {
        self.status = 0;
        self.mask = 0;
        self.evaluate()
    }
}
