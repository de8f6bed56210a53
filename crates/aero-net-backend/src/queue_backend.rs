use std::collections::VecDeque;

use crate::{BackendError, NetworkBackend};

/// In-process backend holding frames in bounded FIFOs.
///
/// Useful for host glue that drains guest traffic on its own schedule, and for tests.
#[derive(Debug, Clone)]
pub struct FrameQueueBackend {
    capacity: usize,
    tx: VecDeque<Vec<u8>>,
    rx: VecDeque<Vec<u8>>,
}

impl FrameQueueBackend {
    /// `capacity` bounds each direction's queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tx: VecDeque::new(),
            rx: VecDeque::new(),
        }
    }

    /// Queue a host → guest frame for the next [`NetworkBackend::poll_receive`].
    pub fn push_rx(&mut self, frame: Vec<u8>) -> Result<(), BackendError> {
        if self.rx.len() >= self.capacity {
            tracing::debug!(
                capacity = self.capacity,
                len = frame.len(),
                "frame queue full; dropping host frame"
            );
            return Err(BackendError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.rx.push_back(frame);
        Ok(())
    }

    pub fn pop_tx(&mut self) -> Option<Vec<u8>> {
        self.tx.pop_front()
    }

    pub fn drain_tx(&mut self) -> Vec<Vec<u8>> {
        self.tx.drain(..).collect()
    }

    pub fn tx_len(&self) -> usize {
        self.tx.len()
    }
}

impl NetworkBackend for FrameQueueBackend {
    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), BackendError> {
        if self.tx.len() >= self.capacity {
            tracing::debug!(
                capacity = self.capacity,
                len = frame.len(),
                "frame queue full; dropping guest frame"
            );
            return Err(BackendError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.tx.push_back(frame);
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.rx.pop_front()
    }
}
