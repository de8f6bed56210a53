use core::fmt;

use memory::GuestMemoryError;
use nt_packetlib::io::net::packet::PacketError;
use thiserror::Error;

/// Which bus-master access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaStage {
    TxDescriptorFetch,
    TxDescriptorWriteback,
    TxBuffer,
    RxDescriptorFetch,
    RxDescriptorWriteback,
    RxBuffer,
    TallyDump,
}

impl fmt::Display for DmaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TxDescriptorFetch => "tx descriptor fetch",
            Self::TxDescriptorWriteback => "tx descriptor writeback",
            Self::TxBuffer => "tx buffer read",
            Self::RxDescriptorFetch => "rx descriptor fetch",
            Self::RxDescriptorWriteback => "rx descriptor writeback",
            Self::RxBuffer => "rx buffer write",
            Self::TallyDump => "tally counter dump",
        };
        f.write_str(name)
    }
}

/// A guest-memory fault hit while the controller was bus-mastering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} at 0x{addr:x} failed: {source}")]
pub struct DmaError {
    pub stage: DmaStage,
    pub addr: u64,
    #[source]
    pub source: GuestMemoryError,
}

impl DmaError {
    pub(crate) fn new(stage: DmaStage, addr: u64, source: GuestMemoryError) -> Self {
        Self {
            stage,
            addr,
            source,
        }
    }
}

/// Why a transmit offload request could not be honoured.
///
/// The silicon puts such frames on the wire unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OffloadError {
    #[error("frame too short for offload ({len} bytes)")]
    FrameTooShort { len: usize },
    #[error("ethertype 0x{0:04x} is not IPv4")]
    NotIpv4(u16),
    #[error("malformed header: {0}")]
    Header(#[from] PacketError),
    #[error("large send requested with MSS 0")]
    ZeroMss,
    #[error("large send requested for IP protocol {0}")]
    NotTcp(u8),
    #[error("checksum field at {store} outside range [{start}, {end}) of a {len}-byte frame")]
    ChecksumOutOfBounds {
        start: usize,
        end: usize,
        store: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("MAC address {} has the group bit set", crate::config::format_mac(.0))]
    GroupMac([u8; 6]),
    #[error("MAC address is all zeroes")]
    ZeroMac,
}
