//! Realtek RTL8139C+ network controller model.
//!
//! The device is driven entirely through its 256-byte register window ([`Rtl8139Device::mmio_read`]
//! / [`Rtl8139Device::mmio_write`]) plus [`Rtl8139Device::receive_frame`] for host → guest
//! traffic. Guest memory and the host transport are borrowed per call; the device owns neither.
//!
//! Both personalities of the chip are modelled: the original C-mode slot/ring-buffer interface
//! and the C+ descriptor rings with checksum offload, large send and VLAN tagging. C+ mode is
//! latched by the first write to `CPCR`.
#![forbid(unsafe_code)]

pub mod config;
pub mod desc;
mod error;
pub mod filter;
pub mod irq;
pub mod observer;
pub mod offload;
pub mod regs;
pub mod ring;
mod rx;
pub mod tally;
mod tx;

pub use config::{RxOversizePolicy, Rtl8139Config};
pub use error::{ConfigError, DmaError, DmaStage, OffloadError};
pub use irq::InterruptCause;
pub use observer::{Direction, DropReason, NicEvent, NicObserver, TracingObserver};
pub use regs::RTL8139_IO_SIZE;
pub use rx::{RxOutcome, MIN_FRAME_LEN};
pub use tally::TallyCounters;
pub use tx::{insert_vlan_tag, TxState, CPLUS_RING_LEN, TX_ASSEMBLY_MAX};

use aero_net_backend::NetworkBackend;
use memory::GuestMemory;

use crate::irq::InterruptController;
use crate::regs::{
    LaneWrite, Reg, RegKind, RegisterFile, ANAR_RESET, BMCR_AUTONEG, BMCR_RESET, BMSR_LINK,
    BMSR_RESET, CFG9346_AUTOLOAD, CFG9346_OPMODE_MASK, CR_BUFE, CR_RE, CR_RST, CR_TE,
    CSCR_RESET, HLTCLK_HALT, HLTCLK_RUN, RTL8139_PCI_REVID, TCR_RESET, TPPOLL_NPQ, TSD_OWN,
};
use crate::ring::{RingCursor, RingWrap};
use crate::rx::RxRingBuffer;
use crate::tx::{TxAssembly, TX_SLOT_COUNT};

/// Upper bound on frames pulled from the backend by one [`Rtl8139Device::poll`].
pub const RX_POLL_BUDGET: usize = 64;

pub struct Rtl8139Device {
    config: Rtl8139Config,
    regs: RegisterFile,
    irq: InterruptController,
    tally: TallyCounters,

    tx_slot: RingCursor,
    cplus_tx: RingCursor,
    cplus_rx: RingCursor,
    tx_frame: TxAssembly,
    tx_state: TxState,

    rx_ring: RxRingBuffer,
    /// `MPC`, 24 bits.
    rx_missed: u32,

    cplus_enabled: bool,
    clock_enabled: bool,
    link_up: bool,

    observer: Box<dyn NicObserver>,
}

impl std::fmt::Debug for Rtl8139Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rtl8139Device")
            .field("mac", &self.regs.mac())
            .field("cplus_enabled", &self.cplus_enabled)
            .field("tx_state", &self.tx_state)
            .field("irq_level", &self.irq.line())
            .finish_non_exhaustive()
    }
}

impl Rtl8139Device {
    /// Device reporting diagnostics through `tracing`.
    pub fn new(config: Rtl8139Config) -> Result<Self, ConfigError> {
        Self::with_observer(config, TracingObserver)
    }

    pub fn with_observer(
        config: Rtl8139Config,
        observer: impl NicObserver + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let link_up = config.link_up;
        let mut dev = Self {
            config,
            regs: RegisterFile::new(),
            irq: InterruptController::new(),
            tally: TallyCounters::default(),
            tx_slot: RingCursor::new(4, TX_SLOT_COUNT, RingWrap::ImplicitModulus),
            cplus_tx: RingCursor::new(desc::DESC_LEN as u64, CPLUS_RING_LEN, RingWrap::EndOfRingFlag),
            cplus_rx: RingCursor::new(desc::DESC_LEN as u64, CPLUS_RING_LEN, RingWrap::EndOfRingFlag),
            tx_frame: TxAssembly::default(),
            tx_state: TxState::Idle,
            rx_ring: RxRingBuffer::new(0),
            rx_missed: 0,
            cplus_enabled: false,
            clock_enabled: true,
            link_up,
            observer: Box::new(observer),
        };
        dev.reset();
        Ok(dev)
    }

    pub fn config(&self) -> &Rtl8139Config {
        &self.config
    }

    pub fn irq_level(&self) -> bool {
        self.irq.line()
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    pub fn tally(&self) -> &TallyCounters {
        &self.tally
    }

    /// Station address currently programmed in `IDR0..5`.
    pub fn mac_addr(&self) -> [u8; 6] {
        self.regs.mac()
    }

    pub fn cplus_enabled(&self) -> bool {
        self.cplus_enabled
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    /// Plug or unplug the cable. A change raises `PUN_LINKCHG`.
    pub fn set_link_up(&mut self, up: bool) {
        if self.link_up == up {
            return;
        }
        self.link_up = up;
        self.regs.set_bits(Reg::Bmsr, BMSR_LINK, up);
        tracing::debug!(target: "rtl8139", up, "link state changed");
        self.raise(InterruptCause::PUN_LINKCHG);
    }

    /// Power-on reset: every register to its default, MAC restored from the configuration.
    pub fn reset(&mut self) {
        self.regs.clear();
        self.regs.set_mac(self.config.mac);
        self.rx_missed = 0;
        self.soft_reset();
    }

    /// `CR.RST`. The station address, multicast table, `RCR` and `MPC` survive.
    fn soft_reset(&mut self) {
        let edge = self.irq.reset();
        self.forward_irq_edge(edge);

        for slot in 0..TX_SLOT_COUNT as usize {
            self.regs.set(Reg::TSD[slot], TSD_OWN);
            self.regs.set(Reg::TSAD[slot], 0);
        }
        self.regs.set(Reg::RbStart, 0);
        self.regs.set(Reg::RdsarLo, 0);
        self.regs.set(Reg::RdsarHi, 0);
        self.tx_slot.reset();
        self.cplus_tx.reset();
        self.cplus_tx.set_base(0);
        self.cplus_rx.reset();
        self.cplus_rx.set_base(0);
        self.rx_ring = RxRingBuffer::new(0);

        self.regs.set(Reg::Cr, 0);
        self.regs.set(Reg::Tcr, TCR_RESET);
        self.regs.set(Reg::Config0, 0);
        self.regs.set(Reg::Config1, 0x0c);
        self.regs.set(Reg::Config3, 0x01);
        self.regs.set(Reg::Config5, 0);
        self.regs.set(Reg::TimerInt, 0);
        self.regs.set(Reg::CpCr, 0);
        self.cplus_enabled = false;
        self.clock_enabled = true;
        self.reset_phy();

        self.tally.clear();
        self.tx_frame.clear();
        self.tx_state = TxState::Idle;
    }

    fn reset_phy(&mut self) {
        self.regs.set(Reg::Bmcr, BMCR_AUTONEG);
        let link = if self.link_up { BMSR_LINK } else { 0 };
        self.regs.set(Reg::Bmsr, BMSR_RESET | link);
        self.regs.set(Reg::Anar, ANAR_RESET);
        self.regs.set(Reg::Anlpar, ANAR_RESET);
        self.regs.set(Reg::Aner, 0x0001);
        self.regs.set(Reg::Cscr, CSCR_RESET);
    }

    pub(crate) fn emit(&mut self, event: NicEvent) {
        self.observer.on_event(&event);
    }

    fn forward_irq_edge(&mut self, edge: Option<bool>) {
        if let Some(asserted) = edge {
            self.emit(NicEvent::IrqLine { asserted });
        }
    }

    fn raise(&mut self, cause: InterruptCause) {
        let edge = self.irq.raise(cause);
        self.forward_irq_edge(edge);
    }

    /// Re-evaluate the line after a batch of deferred raises.
    pub(crate) fn update_irq(&mut self) {
        let edge = self.irq.evaluate();
        self.forward_irq_edge(edge);
    }

    /// Register read of `size` (1, 2 or 4) bytes. Unmapped bytes read as zero.
    pub fn mmio_read(&self, offset: u64, size: usize) -> u64 {
        let mut value = 0u64;
        let mut cached: Option<(Reg, u32)> = None;
        for k in 0..size.min(4) {
            let Some(addr) = offset
                .checked_add(k as u64)
                .and_then(|addr| usize::try_from(addr).ok())
            else {
                break;
            };
            let Some(info) = regs::lookup(addr) else {
                continue;
            };
            let full = match cached {
                Some((reg, v)) if reg == info.reg => v,
                _ => {
                    let v = self.read_register(info.reg);
                    cached = Some((info.reg, v));
                    v
                }
            };
            let byte = (full >> ((addr - info.offset) * 8)) & 0xff;
            value |= u64::from(byte) << (k * 8);
        }
        value
    }

    fn read_register(&self, reg: Reg) -> u32 {
        match reg {
            Reg::Cr => {
                let bufe = if self.rx_ring.is_empty() { CR_BUFE } else { 0 };
                self.regs.get(Reg::Cr) | bufe
            }
            Reg::Capr => u32::from(self.rx_ring.capr()),
            Reg::Cbr => self.rx_ring.write & 0xffff,
            Reg::Imr => u32::from(self.irq.mask()),
            Reg::Isr => u32::from(self.irq.status()),
            Reg::Tctr | Reg::TpPoll => 0,
            Reg::Mpc => self.rx_missed,
            Reg::Msr => 0xd0 | (!self.regs.get(Reg::Bmsr) & BMSR_LINK),
            Reg::HltClk => u32::from(self.clock_enabled),
            Reg::RerId => RTL8139_PCI_REVID,
            Reg::TxSummary => regs::tx_summary(self.regs.tsd()),
            _ => self.regs.get(reg),
        }
    }

    /// Register write of `size` (1, 2 or 4) bytes. Doorbells run their DMA before this returns.
    pub fn mmio_write<M, B>(
        &mut self,
        mem: &mut M,
        backend: &mut B,
        offset: u64,
        size: usize,
        value: u64,
    ) where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        let Ok(offset) = usize::try_from(offset) else {
            return;
        };
        for write in regs::split_access(offset, size, value as u32) {
            self.write_register(mem, backend, &write);
        }
    }

    fn write_register<M, B>(&mut self, mem: &mut M, backend: &mut B, write: &LaneWrite)
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        let info = write.info();
        if !self.regs.gate_open(info.gate) {
            tracing::trace!(target: "rtl8139", reg = info.name, "write ignored while locked");
            return;
        }

        match write.reg {
            Reg::Tsd0 | Reg::Tsd1 | Reg::Tsd2 | Reg::Tsd3 => {
                let slot = write.reg as usize - Reg::Tsd0 as usize;
                self.write_tsd(mem, backend, write, slot);
            }
            Reg::Cr => self.write_command(write),
            Reg::Capr => {
                let capr = write.merge(u32::from(self.rx_ring.capr()));
                self.rx_ring.set_capr(capr as u16);
            }
            Reg::Imr => {
                let mask = write.merge(u32::from(self.irq.mask()));
                let edge = self.irq.set_mask(mask as u16);
                self.forward_irq_edge(edge);
            }
            Reg::Isr => {
                let edge = self.irq.ack(write.value as u16);
                self.forward_irq_edge(edge);
            }
            Reg::Rcr => {
                let rcr = self.regs.store(write);
                self.rx_ring = RxRingBuffer::new(rcr);
            }
            Reg::Mpc => self.rx_missed = 0,
            Reg::Cfg9346 => {
                let value = self.regs.store(write);
                if value & CFG9346_OPMODE_MASK == CFG9346_AUTOLOAD {
                    self.reset();
                    self.regs.set(Reg::Cfg9346, 0);
                }
            }
            Reg::HltClk => match write.value & 0xff {
                HLTCLK_RUN => self.clock_enabled = true,
                HLTCLK_HALT => self.clock_enabled = false,
                _ => {}
            },
            Reg::Bmcr => {
                self.regs.store(write);
                if write.triggers() && write.value & BMCR_RESET != 0 {
                    self.reset_phy();
                }
            }
            Reg::TpPoll => {
                if write.value & TPPOLL_NPQ != 0 {
                    self.cplus_doorbell(mem, backend);
                }
            }
            Reg::CpCr => {
                self.regs.store(write);
                if !self.cplus_enabled {
                    tracing::debug!(target: "rtl8139", "entering C+ mode");
                }
                self.cplus_enabled = true;
            }
            _ if info.kind == RegKind::Computed => {}
            _ => {
                self.regs.store(write);
            }
        }
    }

    fn write_command(&mut self, write: &LaneWrite) {
        let value = write.apply(self.regs.get(Reg::Cr));
        if value & CR_RST != 0 {
            tracing::debug!(target: "rtl8139", "software reset");
            self.soft_reset();
        }
        if value & CR_RE != 0 {
            self.cplus_rx.reset();
        }
        if value & CR_TE != 0 {
            self.cplus_tx.reset();
        }
        self.regs.set(Reg::Cr, value & !CR_RST);
    }

    /// Pull frames from the backend while the receiver can take them.
    pub fn poll<M, B>(&mut self, mem: &mut M, backend: &mut B) -> usize
    where
        M: GuestMemory + ?Sized,
        B: NetworkBackend + ?Sized,
    {
        let mut pulled = 0;
        while pulled < RX_POLL_BUDGET && self.can_receive() {
            let Some(frame) = backend.poll_receive() else {
                break;
            };
            self.receive_inner(mem, &frame);
            pulled += 1;
        }
        self.update_irq();
        pulled
    }
}
