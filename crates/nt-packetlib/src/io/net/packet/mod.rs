pub mod checksum;
pub mod ethernet;
pub mod ipv4;
pub mod tcp;
pub mod udp;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("buffer too short: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

pub(crate) fn ensure_len(data: &[u8], needed: usize) -> Result<(), PacketError> {
    if data.len() < needed {
        return Err(PacketError::Truncated {
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}
