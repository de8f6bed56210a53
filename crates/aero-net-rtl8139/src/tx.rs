//! Transmit paths.
//!
//! C mode walks the four `TSDn`/`TSADn` slot pairs round-robin, one buffer per frame. C+ mode
//! walks the normal-priority descriptor ring and gathers the `FS..LS` buffers of a frame before
//! running offload and handing the result to the backend (or back into the receiver when
//! `TCR.LBK` selects loopback).

use aero_net_backend::NetworkBackend;
use memory::GuestMemory;
use nt_packetlib::io::net::packet::ethernet::ETHERTYPE_VLAN;

use crate::desc::{self, tx, DescKind, Descriptor};
use crate::error::{DmaError, DmaStage};
use crate::irq::InterruptCause;
use crate::observer::{Direction, DropReason, NicEvent};
use crate::offload::{apply_tx_offload, TxOffload};
use crate::regs::{
    LaneWrite, Reg, CPCR_TX_ENB, CR_TE, DTCCR_CMD, TCR_LOOPBACK, TSD_OWN, TSD_PRESERVED,
    TSD_SIZE_MASK, TSD_TOK, TSD_WRITABLE,
};
use crate::Rtl8139Device;

/// Largest frame the C+ gather buffer will hold.
pub const TX_ASSEMBLY_MAX: usize = 64 * 1024;
pub const TX_SLOT_COUNT: u32 = 4;
/// Hard ring length of both C+ rings.
pub const CPLUS_RING_LEN: u32 = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxState {
    #[default]
    Idle,
    /// Inside a doorbell run.
    Draining,
    /// The last C+ doorbell found the descriptor at the cursor still owned by the driver.
    Stalled,
}

/// Frame being gathered from `FS..LS` descriptors.
///
/// Once the frame would outgrow [`TX_ASSEMBLY_MAX`] it switches to drop mode: later buffers are
/// not copied, and the frame is discarded when its `LS` descriptor arrives.
#[derive(Debug, Default)]
pub(crate) struct TxAssembly {
    buf: Vec<u8>,
    requested: usize,
    overflowed: bool,
}

#[derive(Debug, Clone, Copy)]
struct AssemblyMark {
    len: usize,
    requested: usize,
    overflowed: bool,
}

impl TxAssembly {
    pub(crate) fn clear(&mut self) {
        self.buf.clear();
        self.requested = 0;
        self.overflowed = false;
    }

    fn mark(&self) -> AssemblyMark {
        AssemblyMark {
            len: self.buf.len(),
            requested: self.requested,
            overflowed: self.overflowed,
        }
    }

    fn rewind(&mut self, mark: AssemblyMark) {
        self.buf.truncate(mark.len);
        self.requested = mark.requested;
        self.overflowed = mark.overflowed;
    }

    fn gather<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &M,
        addr: u64,
        len: usize,
    ) -> Result<(), DmaError> {
        self.requested = self.requested.saturating_add(len);
        if self.overflowed {
            return Ok(());
        }
        if self.buf.len() + len > TX_ASSEMBLY_MAX {
            self.overflowed = true;
            return Ok(());
        }
        let start = self.buf.len();
        self.buf.resize(start + len, 0);
        if let Err(err) = mem.read_into(addr, &mut self.buf[start..]) {
            self.buf.truncate(start);
            return Err(DmaError::new(DmaStage::TxBuffer, addr, err));
        }
        Ok(())
    }

    fn take(&mut self) -> Result<Vec<u8>, usize> {
        let requested = self.requested;
        let overflowed = self.overflowed;
        let frame = std::mem::take(&mut self.buf);
        self.clear();
        if overflowed {
            Err(requested)
        } else {
            Ok(frame)
        }
    }
}

/// Insert an 802.1Q header after the MAC addresses. `tag` is the descriptor's VLAN field, whose
/// low byte goes on the wire first.
pub fn insert_vlan_tag(frame: &mut Vec<u8>, tag: u16) {
    if frame.len() < 12 {
        return;
    }
    let tpid = ETHERTYPE_VLAN.to_be_bytes();
    let tci = tag.to_le_bytes();
    frame.splice(12..12, [tpid[0], tpid[1], tci[0], tci[1]]);
}

impl Rtl8139Device {
    fn transmitter_enabled(&self) -> bool {
        self.regs.get(Reg::Cr) & CR_TE != 0
    }

    fn loopback(&self) -> bool {
        self.regs.get(Reg::Tcr) & TCR_LOOPBACK == TCR_LOOPBACK
    }

    /// `TSDn` write. In C+ mode the slot registers are reused as `DTCCR` and stored verbatim.
    pub(crate) fn write_tsd<M, B>(
        &mut self,
        mem: &mut M,
        backend: &mut B,
        write: &LaneWrite,
        slot: usize,
    ) where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        let old = self.regs.get(write.reg);
        if self.cplus_enabled {
            let value = write.merge(old);
            self.regs.set(write.reg, value);
            if slot == 0 && write.wrote_lane(0) && value & DTCCR_CMD != 0 {
                self.dump_tally(mem);
            }
            return;
        }

        let value = (write.merge(old) & TSD_WRITABLE) | (old & TSD_PRESERVED);
        self.regs.set(write.reg, value);
        if write.triggers() {
            self.transmit_slots(mem, backend);
        }
    }

    fn dump_tally<M: GuestMemory + ?Sized>(&mut self, mem: &mut M) {
        let addr = self.regs.tally_dump_addr();
        tracing::trace!(target: "rtl8139", addr, "dumping tally counters");
        if let Err(err) = mem.write_from(addr, &self.tally.to_bytes()) {
            self.emit(NicEvent::DmaFault(DmaError::new(
                DmaStage::TallyDump,
                addr,
                err,
            )));
        }
        // The driver polls this bit; it completes even when the write faulted.
        self.regs.set_bits(Reg::Tsd0, DTCCR_CMD, false);
    }

    fn transmit_slots<M, B>(&mut self, mem: &mut M, backend: &mut B)
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        self.tx_state = TxState::Draining;
        for _ in 0..TX_SLOT_COUNT {
            match self.transmit_slot(mem, backend) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    self.emit(NicEvent::DmaFault(err));
                    break;
                }
            }
        }
        self.tx_state = TxState::Idle;
        self.update_irq();
    }

    fn transmit_slot<M, B>(&mut self, mem: &mut M, backend: &mut B) -> Result<bool, DmaError>
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        if !self.transmitter_enabled() {
            return Ok(false);
        }
        let slot = self.tx_slot.index() as usize;
        let status = self.regs.get(Reg::TSD[slot]);
        if status & TSD_OWN != 0 {
            return Ok(false);
        }

        let addr = u64::from(self.regs.get(Reg::TSAD[slot]));
        let mut frame = vec![0u8; (status & TSD_SIZE_MASK) as usize];
        mem.read_into(addr, &mut frame)
            .map_err(|err| DmaError::new(DmaStage::TxBuffer, addr, err))?;

        self.regs.set(Reg::TSD[slot], status | TSD_OWN | TSD_TOK);
        self.tx_slot.advance(false);
        self.tally.tx_ok = self.tally.tx_ok.wrapping_add(1);
        self.send_frame(mem, backend, frame);
        self.irq.raise_deferred(InterruptCause::TOK);
        Ok(true)
    }

    /// `TPPoll.NPQ` doorbell.
    pub(crate) fn cplus_doorbell<M, B>(&mut self, mem: &mut M, backend: &mut B)
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        if !self.transmitter_enabled() || self.regs.get(Reg::CpCr) & CPCR_TX_ENB == 0 {
            return;
        }
        self.cplus_tx.set_base(self.regs.tx_ring_base());
        self.tx_state = TxState::Draining;

        let start = self.cplus_tx.index();
        let mut consumed = 0u32;
        let mut faulted = false;
        while consumed < self.cplus_tx.capacity() {
            match self.cplus_transmit_one(mem, backend) {
                Ok(true) => consumed += 1,
                Ok(false) => break,
                Err(err) => {
                    self.emit(NicEvent::DmaFault(err));
                    faulted = true;
                    break;
                }
            }
            if self.cplus_tx.index() == start {
                break;
            }
        }

        if consumed > 0 {
            self.tx_state = TxState::Idle;
            self.irq.raise_deferred(InterruptCause::TOK);
        } else if faulted {
            self.tx_state = TxState::Idle;
        } else {
            self.tx_state = TxState::Stalled;
            self.emit(NicEvent::TxStalled { index: start });
        }
        self.update_irq();
    }

    /// Consume the descriptor at the cursor. `Ok(false)` when it still belongs to the driver.
    ///
    /// A fault leaves the cursor, the descriptor and the gathered bytes as they were, so a later
    /// doorbell retries the same descriptor.
    fn cplus_transmit_one<M, B>(&mut self, mem: &mut M, backend: &mut B) -> Result<bool, DmaError>
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        let index = self.cplus_tx.index();
        let mut desc = desc::fetch(mem, &self.cplus_tx, index, DescKind::Tx)?;
        if !desc.flag(tx::OWN) {
            return Ok(false);
        }

        if desc.flag(tx::FS) {
            self.tx_frame.clear();
        }
        let mark = self.tx_frame.mark();
        let len = desc.get(tx::BUFFER_SIZE) as usize;
        if let Err(err) = self.tx_frame.gather(mem, desc.buffer_addr(), len) {
            self.tx_frame.rewind(mark);
            return Err(err);
        }

        let last = desc.flag(tx::LS);
        desc.set_flag(tx::OWN, false);
        for field in tx::ERROR_BITS {
            desc.set_flag(field, false);
        }
        if last && self.tx_frame.overflowed {
            desc.set_flag(tx::TES, true);
        }
        if let Err(err) = desc::writeback(mem, &self.cplus_tx, index, DescKind::Tx, &desc) {
            self.tx_frame.rewind(mark);
            return Err(err);
        }
        self.cplus_tx.advance(desc.flag(tx::EOR));

        if last {
            self.finish_cplus_frame(mem, backend, &desc);
        }
        Ok(true)
    }

    fn finish_cplus_frame<M, B>(&mut self, mem: &mut M, backend: &mut B, desc: &Descriptor)
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        let frame = match self.tx_frame.take() {
            Ok(frame) => frame,
            Err(requested) => {
                self.tally.tx_err = self.tally.tx_err.wrapping_add(1);
                self.irq.raise_deferred(InterruptCause::TER);
                self.emit(NicEvent::FrameDropped {
                    direction: Direction::Tx,
                    reason: DropReason::AssemblyOverflow,
                    len: requested,
                });
                return;
            }
        };
        self.tally.tx_ok = self.tally.tx_ok.wrapping_add(1);

        let out = apply_tx_offload(frame, TxOffload::from_descriptor(desc));
        if let Some(err) = out.skipped {
            self.emit(NicEvent::OffloadSkipped(err));
        }
        let tag = desc
            .flag(tx::TAGC)
            .then(|| desc.get(tx::VLAN_TAG) as u16);
        for mut frame in out.frames {
            if let Some(tag) = tag {
                insert_vlan_tag(&mut frame, tag);
            }
            self.send_frame(mem, backend, frame);
        }
    }

    fn send_frame<M, B>(&mut self, mem: &mut M, backend: &mut B, frame: Vec<u8>)
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        if frame.is_empty() {
            return;
        }
        if self.loopback() {
            tracing::trace!(target: "rtl8139", len = frame.len(), "looping frame back");
            self.receive_inner(mem, &frame);
        } else if let Err(err) = backend.transmit(frame) {
            self.emit(NicEvent::TransportError(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::DenseMemory;

    #[test]
    fn vlan_tag_lands_after_the_mac_addresses() {
        let mut frame: Vec<u8> = (0..20).collect();
        insert_vlan_tag(&mut frame, 0x0a20);
        assert_eq!(frame.len(), 24);
        assert_eq!(&frame[..12], &(0..12).collect::<Vec<u8>>()[..]);
        assert_eq!(&frame[12..16], &[0x81, 0x00, 0x20, 0x0a]);
        assert_eq!(&frame[16..], &[12, 13, 14, 15, 16, 17, 18, 19]);

        let mut runt = vec![0u8; 11];
        insert_vlan_tag(&mut runt, 1);
        assert_eq!(runt.len(), 11);
    }

    #[test]
    fn assembly_switches_to_drop_mode_without_copying() {
        let mut mem = DenseMemory::new(0x1000).unwrap();
        mem.write_from(0, &[0xaa; 16]).unwrap();

        let mut asm = TxAssembly::default();
        asm.gather(&mem, 0, 16).unwrap();
        asm.gather(&mem, 0, TX_ASSEMBLY_MAX).unwrap();
        assert!(asm.overflowed);
        assert_eq!(asm.buf.len(), 16);
        asm.gather(&mem, 0, 4).unwrap();
        assert_eq!(asm.take(), Err(16 + TX_ASSEMBLY_MAX + 4));

        asm.gather(&mem, 0, 8).unwrap();
        assert_eq!(asm.take(), Ok(vec![0xaa; 8]));
    }

    #[test]
    fn faulted_gather_leaves_the_buffer_alone() {
        let mem = DenseMemory::new(0x100).unwrap();
        let mut asm = TxAssembly::default();
        asm.gather(&mem, 0, 4).unwrap();
        let err = asm.gather(&mem, 0xf0, 0x20).unwrap_err();
        assert_eq!(err.stage, DmaStage::TxBuffer);
        assert_eq!(err.addr, 0xf0);
        assert_eq!(asm.buf.len(), 4);
    }
}
