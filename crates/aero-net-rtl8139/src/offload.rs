//! Transmit checksum/segmentation offload and receive checksum classification.

use core::net::Ipv4Addr;

use nt_packetlib::io::net::packet::checksum::{fold, ones_complement_add, pseudo_header_sum_ipv4};
use nt_packetlib::io::net::packet::ethernet::{EthernetFrame, ETHERTYPE_IPV4};
use nt_packetlib::io::net::packet::ipv4::{Ipv4Packet, IPPROTO_TCP, IPPROTO_UDP};
use nt_packetlib::io::net::packet::tcp::{
    TcpFlags, TcpSegment, TCP_CHECKSUM_OFFSET, TCP_FLAGS_OFFSET, TCP_SEQ_OFFSET,
};
use nt_packetlib::io::net::packet::udp::{UdpPacket, UDP_CHECKSUM_OFFSET};

use crate::desc::{rx, tx, Descriptor};
use crate::error::OffloadError;

const IP_TOTAL_LEN_OFFSET: usize = 2;
const IP_ID_OFFSET: usize = 4;
const IP_CHECKSUM_OFFSET: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumRequest {
    pub ip: bool,
    pub tcp: bool,
    pub udp: bool,
}

/// Offload work requested by the last descriptor of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOffload {
    None,
    Checksum(ChecksumRequest),
    /// TCP segmentation. The silicon always fills in IP and TCP checksums of every segment.
    LargeSend { mss: u16 },
}

impl TxOffload {
    /// The MSS field overlaps the checksum request bits, so `LGSEN` decides how dw0 is read.
    pub fn from_descriptor(desc: &Descriptor) -> Self {
        if desc.flag(tx::LGSEN) {
            return Self::LargeSend {
                mss: desc.get(tx::MSS) as u16,
            };
        }
        let req = ChecksumRequest {
            ip: desc.flag(tx::IPCS),
            tcp: desc.flag(tx::TCPCS),
            udp: desc.flag(tx::UDPCS),
        };
        if req == ChecksumRequest::default() {
            Self::None
        } else {
            Self::Checksum(req)
        }
    }
}

/// Header offsets of an untagged Ethernet/IPv4 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadContext {
    pub l3_offset: usize,
    pub ip_header_len: usize,
    pub ip_total_len: usize,
    pub protocol: u8,
    pub ip_id: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl OffloadContext {
    pub fn parse(frame: &[u8]) -> Result<Self, OffloadError> {
        if frame.len() < EthernetFrame::HEADER_LEN + Ipv4Packet::MIN_HEADER_LEN {
            return Err(OffloadError::FrameTooShort { len: frame.len() });
        }
        let eth = EthernetFrame::parse(frame)?;
        if eth.ethertype() != ETHERTYPE_IPV4 {
            return Err(OffloadError::NotIpv4(eth.ethertype()));
        }
        let ip = Ipv4Packet::parse(eth.payload())?;
        Ok(Self {
            l3_offset: EthernetFrame::HEADER_LEN,
            ip_header_len: ip.header_len(),
            ip_total_len: ip.total_len(),
            protocol: ip.protocol(),
            ip_id: ip.identification(),
            src: ip.src_addr(),
            dst: ip.dst_addr(),
        })
    }

    pub fn l4_offset(&self) -> usize {
        self.l3_offset + self.ip_header_len
    }

    /// End of the IP datagram; anything after it is Ethernet padding.
    pub fn ip_end(&self) -> usize {
        self.l3_offset + self.ip_total_len
    }

    fn store_ip_checksum(&self, frame: &mut [u8]) -> Result<u16, OffloadError> {
        apply_checksum(
            frame,
            self.l3_offset,
            self.l4_offset(),
            self.l3_offset + IP_CHECKSUM_OFFSET,
        )
    }

    fn store_transport_checksum(
        &self,
        frame: &mut [u8],
        store_offset: usize,
    ) -> Result<u16, OffloadError> {
        let start = self.l4_offset();
        let end = self.ip_end();
        let seed = pseudo_header_sum_ipv4(self.src, self.dst, self.protocol, (end - start) as u16);
        store_checksum(frame, start, end, start + store_offset, seed)
    }
}

/// Internet checksum over `frame[start..end]`, stored big-endian at `store`.
///
/// The stored field must lie inside the range and is treated as zero while summing, so running
/// this twice over unchanged input stores the same bytes.
pub fn apply_checksum(
    frame: &mut [u8],
    start: usize,
    end: usize,
    store: usize,
) -> Result<u16, OffloadError> {
    store_checksum(frame, start, end, store, 0)
}

fn store_checksum(
    frame: &mut [u8],
    start: usize,
    end: usize,
    store: usize,
    seed: u32,
) -> Result<u16, OffloadError> {
    let in_bounds = start <= store
        && store
            .checked_add(2)
            .is_some_and(|field_end| field_end <= end)
        && end <= frame.len();
    if !in_bounds {
        return Err(OffloadError::ChecksumOutOfBounds {
            start,
            end,
            store,
            len: frame.len(),
        });
    }
    frame[store..store + 2].fill(0);
    let checksum = fold(ones_complement_add(seed, &frame[start..end]));
    frame[store..store + 2].copy_from_slice(&checksum.to_be_bytes());
    Ok(checksum)
}

/// Frames produced by [`apply_tx_offload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadOutput {
    pub frames: Vec<Vec<u8>>,
    /// Set when the offload could not be completed; `frames` then holds the single input frame
    /// with whatever checksum fields were already stored.
    pub skipped: Option<OffloadError>,
}

/// Run the requested offload over an assembled frame.
pub fn apply_tx_offload(mut frame: Vec<u8>, offload: TxOffload) -> OffloadOutput {
    let result = match offload {
        TxOffload::None => Ok(None),
        TxOffload::Checksum(req) => insert_checksums(&mut frame, req).map(|()| None),
        TxOffload::LargeSend { mss } => segment_tcp(&frame, mss).map(Some),
    };
    match result {
        Ok(Some(segments)) => OffloadOutput {
            frames: segments,
            skipped: None,
        },
        Ok(None) => OffloadOutput {
            frames: vec![frame],
            skipped: None,
        },
        Err(err) => OffloadOutput {
            frames: vec![frame],
            skipped: Some(err),
        },
    }
}

/// `IPCS`/`TCPCS`/`UDPCS`. A transport request that does not match the IP protocol is ignored.
///
/// Fields are stored in place as they are computed: when the transport checksum cannot be
/// stored, a requested IP header checksum has already been written.
pub fn insert_checksums(frame: &mut [u8], req: ChecksumRequest) -> Result<(), OffloadError> {
    let ctx = OffloadContext::parse(frame)?;
    if req.ip {
        ctx.store_ip_checksum(frame)?;
    }
    match ctx.protocol {
        IPPROTO_TCP if req.tcp => {
            ctx.store_transport_checksum(frame, TCP_CHECKSUM_OFFSET)?;
        }
        IPPROTO_UDP if req.udp => {
            let checksum = ctx.store_transport_checksum(frame, UDP_CHECKSUM_OFFSET)?;
            if checksum == 0 {
                // 0 means "no checksum" for UDP.
                let at = ctx.l4_offset() + UDP_CHECKSUM_OFFSET;
                frame[at..at + 2].copy_from_slice(&0xffffu16.to_be_bytes());
            }
        }
        _ => {}
    }
    Ok(())
}

/// Split a TCP/IPv4 frame into segments carrying at most `mss` payload bytes each.
///
/// A frame without payload yields no segments.
pub fn segment_tcp(frame: &[u8], mss: u16) -> Result<Vec<Vec<u8>>, OffloadError> {
    let ctx = OffloadContext::parse(frame)?;
    if ctx.protocol != IPPROTO_TCP {
        return Err(OffloadError::NotTcp(ctx.protocol));
    }
    if mss == 0 {
        return Err(OffloadError::ZeroMss);
    }

    let l3 = ctx.l3_offset;
    let l4 = ctx.l4_offset();
    let ip_end = ctx.ip_end();
    let tcp = TcpSegment::parse(&frame[l4..ip_end])?;
    let headers_len = l4 + tcp.header_len();
    let payload = &frame[headers_len..ip_end];

    let chunks: Vec<&[u8]> = payload.chunks(usize::from(mss)).collect();
    let total = chunks.len();
    let base_seq = tcp.seq_number();

    let mut segments = Vec::with_capacity(total);
    let mut emitted = 0u32;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut seg = Vec::with_capacity(headers_len + chunk.len());
        seg.extend_from_slice(&frame[..headers_len]);
        seg.extend_from_slice(chunk);

        let ip_len = (ctx.ip_header_len + tcp.header_len() + chunk.len()) as u16;
        seg[l3 + IP_TOTAL_LEN_OFFSET..l3 + IP_TOTAL_LEN_OFFSET + 2]
            .copy_from_slice(&ip_len.to_be_bytes());
        let ip_id = ctx.ip_id.wrapping_add(i as u16);
        seg[l3 + IP_ID_OFFSET..l3 + IP_ID_OFFSET + 2].copy_from_slice(&ip_id.to_be_bytes());

        let seq = base_seq.wrapping_add(emitted);
        seg[l4 + TCP_SEQ_OFFSET..l4 + TCP_SEQ_OFFSET + 4].copy_from_slice(&seq.to_be_bytes());
        if i + 1 != total {
            seg[l4 + TCP_FLAGS_OFFSET] &= !(TcpFlags::PSH | TcpFlags::FIN).0;
        }

        let seg_ctx = OffloadContext {
            ip_total_len: usize::from(ip_len),
            ..ctx
        };
        seg_ctx.store_ip_checksum(&mut seg)?;
        seg_ctx.store_transport_checksum(&mut seg, TCP_CHECKSUM_OFFSET)?;

        segments.push(seg);
        emitted = emitted.wrapping_add(chunk.len() as u32);
    }
    Ok(segments)
}

/// Outcome of receive checksum verification, in RX descriptor terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxChecksumStatus {
    pub pid: u32,
    pub ip_failed: bool,
    pub tcp_failed: bool,
    pub udp_failed: bool,
}

impl RxChecksumStatus {
    pub fn apply(&self, desc: &mut Descriptor) {
        desc.set(rx::PID, self.pid);
        desc.set_flag(rx::IPF, self.ip_failed);
        desc.set_flag(rx::TCPF, self.tcp_failed);
        desc.set_flag(rx::UDPF, self.udp_failed);
    }
}

/// Classify a received (untagged) frame and check its IPv4/TCP/UDP checksums. Fragments are
/// reported as plain IP with no transport check.
pub fn verify_rx_checksums(frame: &[u8]) -> RxChecksumStatus {
    let Ok(eth) = EthernetFrame::parse(frame) else {
        return RxChecksumStatus::default();
    };
    if eth.ethertype() != ETHERTYPE_IPV4 {
        return RxChecksumStatus::default();
    }
    let Ok(ip) = Ipv4Packet::parse(eth.payload()) else {
        return RxChecksumStatus {
            pid: rx::PID_IP,
            ip_failed: true,
            ..Default::default()
        };
    };

    let mut status = RxChecksumStatus {
        pid: rx::PID_IP,
        ip_failed: !ip.header_checksum_valid(),
        ..Default::default()
    };
    if ip.is_fragment() {
        return status;
    }
    match ip.protocol() {
        IPPROTO_TCP => {
            status.pid = rx::PID_TCP;
            status.tcp_failed = !TcpSegment::parse(ip.payload())
                .is_ok_and(|tcp| tcp.checksum_valid_ipv4(ip.src_addr(), ip.dst_addr()));
        }
        IPPROTO_UDP => {
            status.pid = rx::PID_UDP;
            status.udp_failed = !UdpPacket::parse(ip.payload())
                .is_ok_and(|udp| udp.checksum_valid_ipv4(ip.src_addr(), ip.dst_addr()));
        }
        _ => {}
    }
    status
}
