//! Zero-copy views over Ethernet/IPv4/TCP/UDP headers plus the Internet checksum.
//!
//! Device models use these to locate headers inside guest-built frames; nothing here allocates.
#![forbid(unsafe_code)]

pub mod io;
