//! Receive paths: the C+ descriptor ring and the C-mode contiguous ring buffer.

use std::borrow::Cow;

use memory::GuestMemory;
use nt_packetlib::io::net::packet::ethernet::EthernetFrame;

use crate::config::RxOversizePolicy;
use crate::desc::{self, rx, DescKind, Descriptor};
use crate::error::{DmaError, DmaStage};
use crate::filter::{ethernet_fcs, AddressFilter, Classification};
use crate::irq::InterruptCause;
use crate::observer::{Direction, DropReason, NicEvent};
use crate::offload::{verify_rx_checksums, RxChecksumStatus};
use crate::regs::{Reg, CPCR_RX_CHKSUM, CPCR_RX_ENB, CPCR_RX_VLAN, CR_RE, RCR_WRAP};
use crate::Rtl8139Device;

/// Frames shorter than this are zero-padded before filtering.
pub const MIN_FRAME_LEN: usize = 60;
pub const CRC_LEN: usize = 4;
/// Room the C-mode ring must have left before `can_receive` reports true.
pub const RX_MAX_FRAME: u32 = 1514;

/// C-mode packet header status bits.
pub const RX_STATUS_OK: u32 = 0x0001;
pub const RX_STATUS_BROADCAST: u32 = 0x2000;
pub const RX_STATUS_PHYSICAL: u32 = 0x4000;
pub const RX_STATUS_MULTICAST: u32 = 0x8000;

const RX_HEADER_LEN: u32 = 4;
const RX_BUFFER_MIN_LEN: u32 = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    Delivered,
    /// The frame was not delivered. Guest-visible bookkeeping (counters, `RXOVW`) is done.
    Dropped(DropReason),
    /// A guest-memory fault stopped delivery before ownership changed hands.
    Faulted,
}

/// C-mode receive ring buffer pointers. `read` is the driver's CAPR + 16, `write` the CBR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RxRingBuffer {
    pub(crate) size: u32,
    pub(crate) read: u32,
    pub(crate) write: u32,
}

impl RxRingBuffer {
    /// Ring sized by `RCR.RBLEN` (bits 11..13): 8, 16, 32 or 64 KiB.
    pub(crate) fn new(rcr: u32) -> Self {
        Self {
            size: RX_BUFFER_MIN_LEN << ((rcr >> 11) & 3),
            read: 0,
            write: 0,
        }
    }

    pub(crate) fn avail(&self) -> u32 {
        (self.size + self.read - self.write) % self.size
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub(crate) fn capr(&self) -> u16 {
        self.read.wrapping_sub(16) as u16
    }

    pub(crate) fn set_capr(&mut self, value: u16) {
        self.read = (u32::from(value) + 16) % self.size;
    }
}

fn align4(value: u32) -> u32 {
    (value + 3) & !3
}

/// Remove a single 802.1Q tag, returning the untagged frame and the TCI in descriptor order.
fn strip_vlan_tag(frame: &[u8]) -> Option<(Vec<u8>, u16)> {
    let tci = EthernetFrame::parse(frame).ok()?.vlan_tci()?;
    let mut out = Vec::with_capacity(frame.len() - EthernetFrame::VLAN_TAG_LEN);
    out.extend_from_slice(&frame[..12]);
    out.extend_from_slice(&frame[16..]);
    if out.len() < MIN_FRAME_LEN {
        out.resize(MIN_FRAME_LEN, 0);
    }
    // The descriptor holds the TCI in wire byte order read as little-endian.
    Some((out, tci.swap_bytes()))
}

impl Rtl8139Device {
    fn receiver_enabled(&self) -> bool {
        self.regs.get(Reg::Cr) & CR_RE != 0
    }

    fn cplus_rx_enabled(&self) -> bool {
        self.regs.get(Reg::CpCr) & CPCR_RX_ENB != 0
    }

    pub(crate) fn address_filter(&self) -> AddressFilter {
        AddressFilter::from_registers(
            self.regs.mac(),
            self.regs.multicast_hash(),
            self.regs.get(Reg::Rcr),
        )
    }

    /// Whether the host may offer a frame now. Frames offered while the clock is halted or the
    /// receiver is off are accepted and discarded.
    pub fn can_receive(&self) -> bool {
        if !self.clock_enabled || !self.receiver_enabled() || self.cplus_rx_enabled() {
            return true;
        }
        let avail = self.rx_ring.avail();
        avail == 0
            || avail >= RX_MAX_FRAME
            || self.irq.mask() & InterruptCause::RXOVW.bits() != 0
    }

    /// Deliver one host → guest frame (without FCS) into guest memory.
    pub fn receive_frame<M: GuestMemory + ?Sized>(&mut self, mem: &mut M, frame: &[u8]) -> RxOutcome {
        let outcome = self.receive_inner(mem, frame);
        self.update_irq();
        outcome
    }

    /// [`Self::receive_frame`] without the final line evaluation, so a batch raises at most one
    /// edge.
    pub(crate) fn receive_inner<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        frame: &[u8],
    ) -> RxOutcome {
        if !self.clock_enabled || !self.receiver_enabled() {
            return self.rx_drop(frame.len(), DropReason::Disabled);
        }

        let frame: Cow<'_, [u8]> = if frame.len() < MIN_FRAME_LEN {
            let mut padded = frame.to_vec();
            padded.resize(MIN_FRAME_LEN, 0);
            Cow::Owned(padded)
        } else {
            Cow::Borrowed(frame)
        };

        let class = self.address_filter().classify(&frame);
        let tally = &mut self.tally;
        match class {
            Classification::Reject => tally.rx_err = tally.rx_err.wrapping_add(1),
            Classification::Broadcast => {
                tally.rx_ok_broadcast = tally.rx_ok_broadcast.wrapping_add(1)
            }
            Classification::Multicast => {
                tally.rx_ok_multicast = tally.rx_ok_multicast.wrapping_add(1)
            }
            Classification::Unicast => tally.rx_ok_phys = tally.rx_ok_phys.wrapping_add(1),
            Classification::Promiscuous => {}
        }
        if !class.accepted() {
            return self.rx_drop(frame.len(), DropReason::Filtered);
        }

        if self.cplus_rx_enabled() {
            self.receive_cplus(mem, &frame, class)
        } else {
            self.receive_ring(mem, &frame, class)
        }
    }

    fn rx_drop(&mut self, len: usize, reason: DropReason) -> RxOutcome {
        self.emit(NicEvent::FrameDropped {
            direction: Direction::Rx,
            reason,
            len,
        });
        RxOutcome::Dropped(reason)
    }

    /// Missed packet: `RXOVW`, `MPC`, and in C+ mode the tally block.
    fn rx_overflow(&mut self, len: usize, reason: DropReason) -> RxOutcome {
        self.irq.raise_deferred(InterruptCause::RXOVW);
        self.rx_missed = self.rx_missed.wrapping_add(1) & 0x00ff_ffff;
        if self.cplus_rx_enabled() {
            self.tally.rx_err = self.tally.rx_err.wrapping_add(1);
            self.tally.miss_pkt = self.tally.miss_pkt.wrapping_add(1);
        }
        self.rx_drop(len, reason)
    }

    fn rx_fault(&mut self, err: DmaError) -> RxOutcome {
        self.emit(NicEvent::DmaFault(err));
        RxOutcome::Faulted
    }

    fn receive_cplus<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        frame: &[u8],
        class: Classification,
    ) -> RxOutcome {
        self.cplus_rx.set_base(self.regs.rx_ring_base());
        let cpcr = self.regs.get(Reg::CpCr);

        let first = self.cplus_rx.index();
        let head = match desc::fetch(mem, &self.cplus_rx, first, DescKind::Rx) {
            Ok(desc) => desc,
            Err(err) => return self.rx_fault(err),
        };
        if !head.flag(rx::OWN) {
            return self.rx_overflow(frame.len(), DropReason::NoDescriptor);
        }

        let stripped = if cpcr & CPCR_RX_VLAN != 0 {
            strip_vlan_tag(frame)
        } else {
            None
        };
        let (data, tag) = match stripped {
            Some((untagged, tci)) => (Cow::Owned(untagged), Some(tci)),
            None => (Cow::Borrowed(frame), None),
        };
        let checksums = if cpcr & CPCR_RX_CHKSUM != 0 {
            verify_rx_checksums(&data)
        } else {
            RxChecksumStatus::default()
        };
        let mut image = Vec::with_capacity(data.len() + CRC_LEN);
        image.extend_from_slice(&data);
        image.extend_from_slice(&ethernet_fcs(&data).to_le_bytes());

        // The completed length must fit the 13-bit size field of the LS descriptor.
        if image.len() > rx::BUFFER_SIZE.mask() as usize {
            return self.rx_overflow(frame.len(), DropReason::Oversize);
        }

        let plan = match self.plan_rx_descriptors(mem, first, head, image.len()) {
            Ok(Some(plan)) => plan,
            Ok(None) => return self.rx_overflow(frame.len(), DropReason::Oversize),
            Err(err) => return self.rx_fault(err),
        };

        let mut offset = 0;
        for (_, desc) in &plan {
            let room = desc.get(rx::BUFFER_SIZE) as usize;
            let end = (offset + room).min(image.len());
            let addr = desc.buffer_addr();
            if let Err(err) = mem.write_from(addr, &image[offset..end]) {
                return self.rx_fault(DmaError::new(DmaStage::RxBuffer, addr, err));
            }
            offset = end;
        }

        // Status goes out back to front so the first descriptor changes hands last.
        let originals: Vec<Descriptor> = plan.iter().map(|(_, desc)| *desc).collect();
        let count = plan.len();
        let mut offset = 0;
        let mut completed = Vec::with_capacity(count);
        for (i, (index, mut desc)) in plan.into_iter().enumerate() {
            let room = desc.get(rx::BUFFER_SIZE) as usize;
            let chunk = room.min(image.len() - offset);
            offset += chunk;
            let last = i + 1 == count;

            desc.set_flag(rx::OWN, false);
            desc.set_flag(rx::FS, i == 0);
            desc.set_flag(rx::LS, last);
            desc.set_flag(rx::BAR, class == Classification::Broadcast);
            desc.set_flag(rx::MAR, class == Classification::Multicast);
            desc.set_flag(rx::PAM, class == Classification::Unicast);
            let reported = if last { image.len() } else { chunk };
            desc.set(rx::BUFFER_SIZE, reported as u32);
            checksums.apply(&mut desc);
            match tag {
                Some(tci) => {
                    desc.set_flag(rx::TAVA, true);
                    desc.set(rx::VLAN_TAG, u32::from(tci));
                }
                None => desc.set_flag(rx::TAVA, false),
            }
            completed.push((index, desc));
        }
        for (pos, (index, desc)) in completed.iter().enumerate().rev() {
            if let Err(err) = desc::writeback(mem, &self.cplus_rx, *index, DescKind::Rx, desc) {
                // Hand the already completed tail back to the device.
                let tail = completed[pos + 1..].iter().zip(&originals[pos + 1..]);
                for ((index, _), original) in tail {
                    let _ = desc::writeback(mem, &self.cplus_rx, *index, DescKind::Rx, original);
                }
                return self.rx_fault(err);
            }
        }

        for (_, desc) in &completed {
            self.cplus_rx.advance(desc.flag(rx::EOR));
        }
        self.tally.rx_ok = self.tally.rx_ok.wrapping_add(1);
        self.irq.raise_deferred(InterruptCause::ROK);
        RxOutcome::Delivered
    }

    /// Descriptors that will hold `len` bytes, starting with `head` at `first`. `None` when the
    /// frame does not fit under the configured oversize policy.
    fn plan_rx_descriptors<M: GuestMemory + ?Sized>(
        &self,
        mem: &M,
        first: u32,
        head: Descriptor,
        len: usize,
    ) -> Result<Option<Vec<(u32, Descriptor)>>, DmaError> {
        let mut room = head.get(rx::BUFFER_SIZE) as usize;
        let mut plan = vec![(first, head)];
        if room >= len {
            return Ok(Some(plan));
        }
        if self.config.rx_oversize == RxOversizePolicy::Drop {
            return Ok(None);
        }

        let (mut index, mut eor) = (first, head.flag(rx::EOR));
        while room < len {
            index = self.cplus_rx.next_index(index, eor);
            if index == first {
                return Ok(None);
            }
            let desc = desc::fetch(mem, &self.cplus_rx, index, DescKind::Rx)?;
            if !desc.flag(rx::OWN) {
                return Ok(None);
            }
            room += desc.get(rx::BUFFER_SIZE) as usize;
            eor = desc.flag(rx::EOR);
            plan.push((index, desc));
        }
        Ok(Some(plan))
    }

    fn receive_ring<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        frame: &[u8],
        class: Classification,
    ) -> RxOutcome {
        let Ok(len) = u32::try_from(frame.len()) else {
            return self.rx_overflow(frame.len(), DropReason::RingFull);
        };
        let avail = self.rx_ring.avail();
        let needed = align4(len + RX_HEADER_LEN + CRC_LEN as u32);
        if (avail != 0 && needed >= avail) || needed > self.rx_ring.size {
            return self.rx_overflow(frame.len(), DropReason::RingFull);
        }

        let match_bits = match class {
            Classification::Broadcast => RX_STATUS_BROADCAST,
            Classification::Multicast => RX_STATUS_MULTICAST,
            Classification::Unicast => RX_STATUS_PHYSICAL,
            Classification::Promiscuous | Classification::Reject => 0,
        };
        let header = RX_STATUS_OK | match_bits | ((len + CRC_LEN as u32) << 16);
        let fcs = ethernet_fcs(frame).to_le_bytes();

        let saved = self.rx_ring;
        let written = self
            .ring_write(mem, &header.to_le_bytes())
            .and_then(|()| self.ring_write(mem, frame))
            .and_then(|()| self.ring_write(mem, &fcs));
        if let Err(err) = written {
            self.rx_ring = saved;
            return self.rx_fault(err);
        }
        self.rx_ring.write = align4(self.rx_ring.write) % self.rx_ring.size;

        self.tally.rx_ok = self.tally.rx_ok.wrapping_add(1);
        self.irq.raise_deferred(InterruptCause::ROK);
        RxOutcome::Delivered
    }

    /// Copy `data` at the ring write pointer. The copy wraps to the ring start unless `RCR.WRAP`
    /// is set on a ring smaller than 64 KiB, in which case it runs past the end.
    fn ring_write<M: GuestMemory + ?Sized>(&mut self, mem: &mut M, data: &[u8]) -> Result<(), DmaError> {
        let base = u64::from(self.regs.get(Reg::RbStart));
        let size = self.rx_ring.size as usize;
        let at = self.rx_ring.write as usize;
        let linear = self.rx_ring.size < 64 * 1024 && self.regs.get(Reg::Rcr) & RCR_WRAP != 0;
        let write = |mem: &mut M, offset: usize, bytes: &[u8]| {
            let addr = base.wrapping_add(offset as u64);
            mem.write_from(addr, bytes)
                .map_err(|err| DmaError::new(DmaStage::RxBuffer, addr, err))
        };

        let wrapped = (at + data.len()) % size;
        if at + data.len() > size && wrapped != 0 && !linear {
            let split = data.len() - wrapped;
            if split > 0 {
                write(mem, at, &data[..split])?;
            }
            write(mem, 0, &data[split..])?;
            self.rx_ring.write = wrapped as u32;
        } else {
            write(mem, at, data)?;
            self.rx_ring.write = (at + data.len()) as u32;
        }
        Ok(())
    }
}
