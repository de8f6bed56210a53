//! Receive address filtering, match reporting, VLAN stripping and checksum classification.

mod common;

use aero_net_rtl8139::desc::rx::{PID_NON_IP, PID_TCP, PID_UDP};
use aero_net_rtl8139::filter::{ethernet_fcs, multicast_hash_index};
use aero_net_rtl8139::offload::{insert_checksums, ChecksumRequest};
use aero_net_rtl8139::{DropReason, RxOutcome};
use common::*;

const GROUP: [u8; 6] = [0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb];
const OTHER_GROUP: [u8; 6] = [0x33, 0x33, 0x00, 0x00, 0x00, 0x01];

const MAR: u32 = 1 << 26;
const PAM: u32 = 1 << 25;
const BAR: u32 = 1 << 24;
const IPF: u32 = 1 << 15;
const UDPF: u32 = 1 << 14;
const TCPF: u32 = 1 << 13;
const TAVA: u32 = 1 << 16;

fn subscribe(g: &mut Guest, mac: &[u8; 6]) {
    let idx = multicast_hash_index(mac) as u64;
    let byte = g.read(REG_MAR0 + idx / 8, 1);
    g.write(REG_MAR0 + idx / 8, 1, byte | (1 << (idx % 8))); // MARn
}

fn ring_header(g: &Guest, offset: u64) -> u32 {
    u32::from_le_bytes(g.peek(0x8000 + offset, 4).try_into().unwrap())
}

#[test]
fn cmode_header_reports_the_match_kind() {
    let mut g = Guest::new();
    subscribe(&mut g, &GROUP);
    g.ring_rx_setup(0x8000, RCR_APM | RCR_AM | RCR_AB);

    assert_eq!(g.receive(&frame([0xff; 6], 60)), RxOutcome::Delivered);
    assert_eq!(g.receive(&frame(GROUP, 60)), RxOutcome::Delivered);
    assert_eq!(g.receive(&frame(MAC, 60)), RxOutcome::Delivered);

    assert_eq!(ring_header(&g, 0), 0x0040_2001);
    assert_eq!(ring_header(&g, 72), 0x0040_8001);
    assert_eq!(ring_header(&g, 144), 0x0040_4001);

    let tally = g.dev.tally();
    assert_eq!(tally.rx_ok, 3);
    assert_eq!(tally.rx_ok_broadcast, 1);
    assert_eq!(tally.rx_ok_multicast, 1);
    assert_eq!(tally.rx_ok_phys, 1);
}

#[test]
fn frames_outside_the_filter_are_rejected() {
    let mut g = Guest::new();
    subscribe(&mut g, &GROUP);
    g.ring_rx_setup(0x8000, RCR_APM | RCR_AM);

    let unsubscribed = if multicast_hash_index(&OTHER_GROUP) == multicast_hash_index(&GROUP) {
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]
    } else {
        OTHER_GROUP
    };
    for dst in [[0xff; 6], unsubscribed, PEER] {
        assert_eq!(
            g.receive(&frame(dst, 60)),
            RxOutcome::Dropped(DropReason::Filtered)
        );
    }
    assert_eq!(g.read(REG_CBR, 2), 0);
    assert_eq!(g.isr(), 0);
    assert_eq!(g.dev.tally().rx_err, 3);
    // Filtered frames are not missed packets.
    assert_eq!(g.read(REG_MPC, 4), 0);
}

#[test]
fn multicast_needs_am_even_when_hashed() {
    let mut g = Guest::new();
    subscribe(&mut g, &GROUP);
    g.ring_rx_setup(0x8000, RCR_APM);
    assert_eq!(
        g.receive(&frame(GROUP, 60)),
        RxOutcome::Dropped(DropReason::Filtered)
    );

    // All-ones MAR accepts every group address.
    g.write(REG_MAR0, 4, 0xffff_ffff); // MAR0-3
    g.write(REG_MAR0 + 4, 4, 0xffff_ffff); // MAR4-7
    g.write(REG_RCR, 4, RCR_APM | RCR_AM); // RCR
    assert_eq!(g.receive(&frame(OTHER_GROUP, 60)), RxOutcome::Delivered);
}

#[test]
fn promiscuous_mode_accepts_anything_without_match_bits() {
    let mut g = Guest::new();
    g.ring_rx_setup(0x8000, RCR_AAP);

    assert_eq!(g.receive(&frame(PEER, 60)), RxOutcome::Delivered);
    assert_eq!(g.receive(&frame([0xff; 6], 60)), RxOutcome::Delivered);
    assert_eq!(ring_header(&g, 0), 0x0040_0001);
    assert_eq!(ring_header(&g, 72), 0x0040_0001);
    assert_eq!(g.dev.tally().rx_ok_broadcast, 0);
}

#[test]
fn station_address_follows_idr_writes() {
    let mut g = Guest::new();
    g.ring_rx_setup(0x8000, RCR_APM);

    let new_mac = [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee];
    g.write(REG_IDR0, 4, u64::from(u32::from_le_bytes([2, 0xaa, 0xbb, 0xcc]))); // IDR0-3
    g.write(REG_IDR0 + 4, 2, u64::from(u16::from_le_bytes([0xdd, 0xee]))); // IDR4-5
    assert_eq!(g.dev.mac_addr(), new_mac);

    assert_eq!(
        g.receive(&frame(MAC, 60)),
        RxOutcome::Dropped(DropReason::Filtered)
    );
    assert_eq!(g.receive(&frame(new_mac, 60)), RxOutcome::Delivered);
}

#[test]
fn cplus_descriptor_reports_the_match_kind() {
    let mut g = Guest::new();
    subscribe(&mut g, &GROUP);
    g.cplus_rx_setup(0x5000, 0);
    g.write(REG_RCR, 4, RCR_APM | RCR_AM | RCR_AB); // RCR
    for i in 0..3u64 {
        g.write_desc(0x5000 + i * 16, OWN | 1536, 0, 0x6000 + i * 0x800);
    }

    g.receive(&frame([0xff; 6], 60));
    g.receive(&frame(GROUP, 60));
    g.receive(&frame(MAC, 60));

    assert_eq!(g.read_desc(0x5000)[0], FS | LS | BAR | 64);
    assert_eq!(g.read_desc(0x5010)[0], FS | LS | MAR | 64);
    assert_eq!(g.read_desc(0x5020)[0], FS | LS | PAM | 64);
}

#[test]
fn vlan_tag_is_stripped_into_the_descriptor() {
    let mut g = Guest::new();
    g.cplus_rx_setup(0x5000, CPCR_RX_VLAN);
    g.write_desc(0x5000, OWN | EOR | 1536, 0, 0x6000);

    let mut tagged = MAC.to_vec();
    tagged.extend_from_slice(&PEER);
    tagged.extend_from_slice(&[0x81, 0x00, 0x20, 0x05, 0x88, 0xb5]);
    tagged.resize(100, 0x5a);

    assert_eq!(g.receive(&tagged), RxOutcome::Delivered);
    let desc = g.read_desc(0x5000);
    assert_eq!(desc[0], EOR | FS | LS | PAM | 100);
    assert_eq!(desc[1], TAVA | 0x0520);

    let mut untagged = tagged[..12].to_vec();
    untagged.extend_from_slice(&tagged[16..]);
    assert_eq!(g.peek(0x6000, 96), untagged);
    assert_eq!(g.peek(0x6000 + 96, 4), ethernet_fcs(&untagged).to_le_bytes());
}

#[test]
fn vlan_tag_is_kept_without_rx_vlan() {
    let mut g = Guest::new();
    g.cplus_rx_setup(0x5000, 0);
    g.write_desc(0x5000, OWN | EOR | 1536, TAVA | 0x1234, 0x6000);

    let mut tagged = MAC.to_vec();
    tagged.extend_from_slice(&PEER);
    tagged.extend_from_slice(&[0x81, 0x00, 0x20, 0x05, 0x88, 0xb5]);
    tagged.resize(100, 0x5a);

    g.receive(&tagged);
    assert_eq!(g.read_desc(0x5000)[1], 0x1234);
    assert_eq!(g.peek(0x6000, 100), tagged);
}

#[test]
fn rx_checksum_offload_classifies_and_verifies() {
    let mut g = Guest::new();
    g.cplus_rx_setup(0x5000, CPCR_RX_CHKSUM);
    for i in 0..4u64 {
        g.write_desc(0x5000 + i * 16, OWN | 1536, 0, 0x6000 + i * 0x800);
    }
    let all = ChecksumRequest {
        ip: true,
        tcp: true,
        udp: true,
    };

    let mut udp = udp_frame(MAC, b"good udp");
    insert_checksums(&mut udp, all).unwrap();
    g.receive(&udp);

    let mut tcp = tcp_frame(MAC, b"good tcp");
    insert_checksums(&mut tcp, all).unwrap();
    tcp[24] ^= 0xff;
    g.receive(&tcp);

    let mut bad_udp = udp_frame(MAC, b"bad udp");
    insert_checksums(&mut bad_udp, all).unwrap();
    let last = bad_udp.len() - 1;
    bad_udp[last] ^= 0xff;
    g.receive(&bad_udp);

    g.receive(&frame(MAC, 60));

    let status = |g: &Guest, i: u64| g.read_desc(0x5000 + i * 16)[0] & 0x0003_e000;
    assert_eq!(status(&g, 0), PID_UDP << 16);
    assert_eq!(status(&g, 1), (PID_TCP << 16) | IPF);
    assert_eq!(status(&g, 2), (PID_UDP << 16) | UDPF);
    assert_eq!(status(&g, 3), PID_NON_IP << 16);
    assert_eq!(status(&g, 2) & TCPF, 0);
}

#[test]
fn disabled_receiver_discards_without_side_effects() {
    let mut g = Guest::new();
    g.write(REG_RBSTART, 4, 0x8000); // RBSTART
    g.write(REG_RCR, 4, RCR_AAP); // RCR
    g.write(REG_IMR, 2, 0xffff); // IMR

    assert!(g.dev.can_receive());
    assert_eq!(
        g.receive(&frame(MAC, 60)),
        RxOutcome::Dropped(DropReason::Disabled)
    );
    assert_eq!(g.peek(0x8000, 4), vec![0; 4]);
    assert_eq!(g.isr(), 0);
    assert_eq!(g.dev.tally().rx_err, 0);
}
