use aero_net_backend::BackendError;

use crate::error::{DmaError, OffloadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Rejected by the address filter.
    Filtered,
    /// The descriptor at the RX cursor still belongs to the driver.
    NoDescriptor,
    /// Frame plus CRC does not fit the descriptor buffer(s).
    Oversize,
    /// Not enough room left in the C-mode receive ring buffer.
    RingFull,
    /// The transmit assembly buffer would exceed its limit.
    AssemblyOverflow,
    /// Clock halted or receiver disabled.
    Disabled,
}

/// Diagnostics the device reports instead of failing a guest-visible operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NicEvent {
    DmaFault(DmaError),
    /// A TX doorbell found no device-owned descriptor at the cursor.
    TxStalled { index: u32 },
    FrameDropped {
        direction: Direction,
        reason: DropReason,
        len: usize,
    },
    /// Offload was requested but the frame went out unmodified.
    OffloadSkipped(OffloadError),
    TransportError(BackendError),
    IrqLine { asserted: bool },
}

pub trait NicObserver {
    fn on_event(&mut self, event: &NicEvent);
}

impl NicObserver for () {
    fn on_event(&mut self, _event: &NicEvent) {}
}

impl<F: FnMut(&NicEvent)> NicObserver for F {
    fn on_event(&mut self, event: &NicEvent) {
        self(event)
    }
}

/// Forwards every event to `tracing` under the `rtl8139` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl NicObserver for TracingObserver {
    fn on_event(&mut self, event: &NicEvent) {
        match event {
            NicEvent::DmaFault(err) => {
                tracing::warn!(target: "rtl8139", stage = %err.stage, addr = err.addr, "DMA fault: {err}");
            }
            NicEvent::TxStalled { index } => {
                tracing::debug!(target: "rtl8139", index, "C+ transmit queue stalled");
            }
            NicEvent::FrameDropped {
                direction,
                reason,
                len,
            } => {
                tracing::debug!(target: "rtl8139", ?direction, ?reason, len, "frame dropped");
            }
            NicEvent::OffloadSkipped(err) => {
                tracing::debug!(target: "rtl8139", "offload skipped, sending frame as is: {err}");
            }
            NicEvent::TransportError(err) => {
                tracing::debug!(target: "rtl8139", "backend refused frame: {err}");
            }
            NicEvent::IrqLine { asserted } => {
                tracing::trace!(target: "rtl8139", asserted, "INTx line");
            }
        }
    }
}
