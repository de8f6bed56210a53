//! Shared helpers for `aero-net-rtl8139` integration tests: a synthetic guest that pokes the
//! register window and lays out buffers/descriptors in a flat guest RAM.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use aero_net_backend::FrameQueueBackend;
use aero_net_rtl8139::{NicEvent, RxOutcome, Rtl8139Config, Rtl8139Device};
use memory::{DenseMemory, GuestMemory};

pub const MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
pub const PEER: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x99];

pub const REG_IDR0: u64 = 0x00;
pub const REG_MAR0: u64 = 0x08;
pub const REG_TSD0: u64 = 0x10;
pub const REG_TSAD0: u64 = 0x20;
pub const REG_TNPDS: u64 = 0x20;
pub const REG_RBSTART: u64 = 0x30;
pub const REG_CR: u64 = 0x37;
pub const REG_CAPR: u64 = 0x38;
pub const REG_CBR: u64 = 0x3a;
pub const REG_IMR: u64 = 0x3c;
pub const REG_ISR: u64 = 0x3e;
pub const REG_TCR: u64 = 0x40;
pub const REG_RCR: u64 = 0x44;
pub const REG_MPC: u64 = 0x4c;
pub const REG_CFG9346: u64 = 0x50;
pub const REG_TPPOLL: u64 = 0xd9;
pub const REG_CPCR: u64 = 0xe0;
pub const REG_RDSAR: u64 = 0xe4;

pub const CR_TE: u64 = 0x04;
pub const CR_RE: u64 = 0x08;
pub const CR_RST: u64 = 0x10;

pub const RCR_AAP: u64 = 0x01;
pub const RCR_APM: u64 = 0x02;
pub const RCR_AM: u64 = 0x04;
pub const RCR_AB: u64 = 0x08;
pub const RCR_WRAP: u64 = 0x80;

pub const CPCR_TX: u64 = 0x01;
pub const CPCR_RX: u64 = 0x02;
pub const CPCR_RX_CHKSUM: u64 = 0x20;
pub const CPCR_RX_VLAN: u64 = 0x40;

pub const ISR_ROK: u16 = 0x0001;
pub const ISR_TOK: u16 = 0x0004;
pub const ISR_TER: u16 = 0x0008;
pub const ISR_RXOVW: u16 = 0x0010;

pub const OWN: u32 = 1 << 31;
pub const EOR: u32 = 1 << 30;
pub const FS: u32 = 1 << 29;
pub const LS: u32 = 1 << 28;

pub const MEM_SIZE: u64 = 0x40000;

pub struct Guest {
    pub dev: Rtl8139Device,
    pub mem: DenseMemory,
    pub net: FrameQueueBackend,
    events: Rc<RefCell<Vec<NicEvent>>>,
}

impl Guest {
    pub fn new() -> Self {
        Self::with_config(Rtl8139Config::default())
    }

    pub fn with_config(config: Rtl8139Config) -> Self {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let dev = Rtl8139Device::with_observer(config, move |event: &NicEvent| {
            sink.borrow_mut().push(event.clone());
        })
        .unwrap();
        Self {
            dev,
            mem: DenseMemory::new(MEM_SIZE).unwrap(),
            net: FrameQueueBackend::new(64),
            events,
        }
    }

    pub fn write(&mut self, offset: u64, size: usize, value: u64) {
        self.dev
            .mmio_write(&mut self.mem, &mut self.net, offset, size, value);
    }

    pub fn read(&self, offset: u64, size: usize) -> u64 {
        self.dev.mmio_read(offset, size)
    }

    pub fn isr(&self) -> u16 {
        self.read(REG_ISR, 2) as u16
    }

    pub fn receive(&mut self, frame: &[u8]) -> RxOutcome {
        self.dev.receive_frame(&mut self.mem, frame)
    }

    /// Events recorded since the last call, without IRQ line edges.
    pub fn take_events(&self) -> Vec<NicEvent> {
        self.events
            .borrow_mut()
            .drain(..)
            .filter(|e| !matches!(e, NicEvent::IrqLine { .. }))
            .collect()
    }

    pub fn poke(&mut self, addr: u64, bytes: &[u8]) {
        self.mem.write_from(addr, bytes).unwrap();
    }

    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.mem.read_into(addr, &mut out).unwrap();
        out
    }

    pub fn write_desc(&mut self, addr: u64, dw0: u32, dw1: u32, buf: u64) {
        let mut raw = [0u8; 16];
        raw[0..4].copy_from_slice(&dw0.to_le_bytes());
        raw[4..8].copy_from_slice(&dw1.to_le_bytes());
        raw[8..16].copy_from_slice(&buf.to_le_bytes());
        self.poke(addr, &raw);
    }

    pub fn read_desc(&self, addr: u64) -> [u32; 4] {
        let raw = self.peek(addr, 16);
        let mut out = [0u32; 4];
        for (i, dw) in out.iter_mut().enumerate() {
            *dw = u32::from_le_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]]);
        }
        out
    }

    /// Enter C+ mode with the transmit ring at `tx_ring`.
    pub fn cplus_tx_setup(&mut self, tx_ring: u64) {
        self.write(REG_CPCR, 2, CPCR_TX); // CPCR: C+ TX
        self.write(REG_TNPDS, 4, tx_ring); // TNPDS lo
        self.write(REG_TNPDS + 4, 4, 0); // TNPDS hi
        self.write(REG_CR, 1, CR_TE); // CR: TE
    }

    /// Enter C+ mode with the receive ring at `rx_ring`, accepting our MAC and broadcast.
    pub fn cplus_rx_setup(&mut self, rx_ring: u64, cpcr: u64) {
        self.write(REG_CPCR, 2, CPCR_RX | cpcr); // CPCR
        self.write(REG_RDSAR, 4, rx_ring); // RDSAR lo
        self.write(REG_RDSAR + 4, 4, 0); // RDSAR hi
        self.write(REG_RCR, 4, RCR_APM | RCR_AB); // RCR
        self.write(REG_CR, 1, CR_RE | CR_TE); // CR: RE|TE
    }

    /// C-mode receive into an 8 KiB ring at `ring`.
    pub fn ring_rx_setup(&mut self, ring: u64, rcr: u64) {
        self.write(REG_RBSTART, 4, ring); // RBSTART
        self.write(REG_RCR, 4, rcr); // RCR
        self.write(REG_CR, 1, CR_RE | CR_TE); // CR: RE|TE
    }
}

pub fn frame(dst: [u8; 6], len: usize) -> Vec<u8> {
    let mut f = Vec::with_capacity(len);
    f.extend_from_slice(&dst);
    f.extend_from_slice(&PEER);
    f.extend_from_slice(&0x88b5u16.to_be_bytes());
    let mut fill = 0u8;
    while f.len() < len {
        f.push(fill);
        fill = fill.wrapping_add(1);
    }
    f
}

fn ipv4_frame(dst: [u8; 6], protocol: u8, l4: &[u8]) -> Vec<u8> {
    let mut f = Vec::new();
    f.extend_from_slice(&dst);
    f.extend_from_slice(&PEER);
    f.extend_from_slice(&0x0800u16.to_be_bytes());
    let total = (20 + l4.len()) as u16;
    f.extend_from_slice(&[0x45, 0x00]);
    f.extend_from_slice(&total.to_be_bytes());
    f.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, 64, protocol, 0, 0]);
    f.extend_from_slice(&[10, 0, 0, 2]);
    f.extend_from_slice(&[10, 0, 0, 1]);
    f.extend_from_slice(l4);
    f
}

/// TCP/IPv4 frame with zeroed checksums, PSH|ACK, sequence number 1000.
pub fn tcp_frame(dst: [u8; 6], payload: &[u8]) -> Vec<u8> {
    let mut tcp = vec![
        0x04, 0xd2, 0x00, 0x50, // ports 1234 -> 80
        0x00, 0x00, 0x03, 0xe8, // seq
        0x00, 0x00, 0x00, 0x00, // ack
        0x50, 0x18, 0xff, 0xff, // offset, PSH|ACK, window
        0x00, 0x00, 0x00, 0x00, // checksum, urgent
    ];
    tcp.extend_from_slice(payload);
    ipv4_frame(dst, 6, &tcp)
}

/// UDP/IPv4 frame with zeroed checksums.
pub fn udp_frame(dst: [u8; 6], payload: &[u8]) -> Vec<u8> {
    let len = (8 + payload.len()) as u16;
    let mut udp = vec![0x30, 0x39, 0x00, 0x35];
    udp.extend_from_slice(&len.to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    ipv4_frame(dst, 17, &udp)
}
