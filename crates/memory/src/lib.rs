//! Guest physical memory as seen by bus-mastering devices.
//!
//! Devices never own guest RAM; they borrow a [`GuestMemory`] for the duration of a DMA burst and
//! every access is bounds-checked and fallible.
#![forbid(unsafe_code)]

pub mod phys;

pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult};
