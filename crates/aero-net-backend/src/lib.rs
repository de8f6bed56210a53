//! Host transport seam for emulated NICs.
//!
//! Devices deal exclusively in raw Ethernet frames (`Vec<u8>`). Guest → host frames go through
//! [`NetworkBackend::transmit`]; host → guest frames are pulled with
//! [`NetworkBackend::poll_receive`] by whoever pumps the device and are then offered to the NIC's
//! own receive entry point.
#![forbid(unsafe_code)]

pub mod queue_backend;

pub use queue_backend::FrameQueueBackend;

use thiserror::Error;

/// Why the host refused a guest frame.
///
/// NIC models treat every variant as a silent drop: the guest already gave the buffer back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("network backend is not connected")]
    Disconnected,
    #[error("network backend queue is full ({capacity} frames)")]
    QueueFull { capacity: usize },
}

/// Network backend to bridge frames between emulated NICs and the host network stack.
pub trait NetworkBackend {
    /// Transmit a guest → host Ethernet frame.
    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), BackendError>;

    /// Poll for a host → guest Ethernet frame.
    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        None
    }
}

impl<T: NetworkBackend + ?Sized> NetworkBackend for Box<T> {
    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), BackendError> {
        <T as NetworkBackend>::transmit(&mut **self, frame)
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        <T as NetworkBackend>::poll_receive(&mut **self)
    }
}

impl<T: NetworkBackend + ?Sized> NetworkBackend for &mut T {
    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), BackendError> {
        <T as NetworkBackend>::transmit(&mut **self, frame)
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        <T as NetworkBackend>::poll_receive(&mut **self)
    }
}

/// A sink that accepts and discards everything (cable plugged into nothing).
impl NetworkBackend for () {
    fn transmit(&mut self, _frame: Vec<u8>) -> Result<(), BackendError> {
        Ok(())
    }
}

impl<B: NetworkBackend> NetworkBackend for Option<B> {
    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), BackendError> {
        match self.as_mut() {
            Some(backend) => backend.transmit(frame),
            None => Err(BackendError::Disconnected),
        }
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.as_mut().and_then(|backend| backend.poll_receive())
    }
}
