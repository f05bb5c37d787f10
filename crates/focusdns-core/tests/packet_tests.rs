//! Integration tests for packet module
//!
//! These tests verify end-to-end query parsing, spoofed answer synthesis and
//! pass-through of everything else.

use focusdns_core::packet::checksum::{verify_ipv4_header, verify_udp_ipv4};
use focusdns_core::packet::*;
use proptest::prelude::*;
use std::net::Ipv4Addr;

/// Test data: minimal valid IPv4 TCP SYN packet to port 443
fn create_tcp_syn_packet() -> Vec<u8> {
    vec![
        // IPv4 header (20 bytes)
        0x45, 0x00, 0x00, 0x28, // Version, IHL, DSCP, ECN, Total Length (40)
        0x00, 0x01, 0x40, 0x00, // Identification, Flags (DF), Fragment Offset
        0x40, 0x06, 0x00, 0x00, // TTL (64), Protocol (TCP), Checksum
        0xC0, 0xA8, 0x01, 0x01, // Source IP: 192.168.1.1
        0x5D, 0xB8, 0xD8, 0x22, // Dest IP: 93.184.216.34
        // TCP header (20 bytes)
        0x04, 0xD2, 0x01, 0xBB, // Src Port (1234), Dst Port (443)
        0x00, 0x00, 0x00, 0x01, // Sequence Number
        0x00, 0x00, 0x00, 0x00, // Acknowledgment Number
        0x50, 0x02, 0xFF, 0xFF, // Data Offset, SYN flag, Window Size
        0x00, 0x00, 0x00, 0x00, // Checksum, Urgent Pointer
    ]
}

/// Test data: hand-assembled DNS query for blocked.test, ID 0x1234
fn create_blocked_test_query() -> Vec<u8> {
    let mut packet = vec![
        // IPv4 header (20 bytes)
        0x45, 0x00, 0x00, 0x3A, // Total Length (58)
        0xAB, 0xCD, 0x00, 0x00, // Identification, no fragmentation
        0x40, 0x11, 0x00, 0x00, // TTL (64), Protocol (UDP), Checksum
        0x0A, 0x00, 0x00, 0x01, // Source IP: 10.0.0.1
        0x08, 0x08, 0x08, 0x08, // Dest IP: 8.8.8.8
        // UDP header (8 bytes)
        0xD4, 0x31, 0x00, 0x35, // Src Port (54321), Dst Port (53)
        0x00, 0x26, 0x00, 0x00, // Length (38), Checksum (none)
        // DNS header (12 bytes)
        0x12, 0x34, 0x01, 0x00, // ID, flags (RD)
        0x00, 0x01, 0x00, 0x00, // QDCOUNT 1, ANCOUNT 0
        0x00, 0x00, 0x00, 0x00, // NSCOUNT 0, ARCOUNT 0
    ];
    // Question: blocked.test A IN
    packet.extend_from_slice(b"\x07blocked\x04test\x00");
    packet.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    packet
}

/// Run the codec the way the engine does: spoofed answer or the input itself
fn codec_output(packet: &[u8], blocked: &str) -> Vec<u8> {
    match inspect_dns_query(packet) {
        Some(dns) if dns.query.domain == blocked => build_block_response(
            packet,
            dns.ip.header_len(),
            dns.dns_offset(),
            &dns.query,
            &ResponseOptions::default(),
        )
        .unwrap_or_else(|_| packet.to_vec()),
        _ => packet.to_vec(),
    }
}

// ====== Query Parsing Tests ======

#[test]
fn test_parse_hand_built_query() {
    let packet = create_blocked_test_query();
    let dns = inspect_dns_query(&packet).unwrap();

    assert_eq!(dns.ip.src_addr(), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(dns.src_port, 54321);
    assert_eq!(dns.query.transaction_id, 0x1234);
    assert_eq!(dns.query.domain, "blocked.test");
    assert_eq!(dns.query.qtype, rr::TYPE_A);
    assert_eq!(dns.query.question, &packet[40..]);
}

#[test]
fn test_builder_matches_hand_built_question() {
    let built = DnsQueryBuilder::new("blocked.test")
        .transaction_id(0x1234)
        .build()
        .unwrap();
    let hand = create_blocked_test_query();
    assert_eq!(&built[28..], &hand[28..]);
}

#[test]
fn test_aaaa_query_parsed() {
    let packet = DnsQueryBuilder::new("v6.example")
        .qtype(rr::TYPE_AAAA)
        .build()
        .unwrap();
    let dns = inspect_dns_query(&packet).unwrap();
    assert_eq!(dns.query.qtype, rr::TYPE_AAAA);
}

// ====== Response Tests ======

#[test]
fn test_blocked_test_response() {
    let request = create_blocked_test_query();
    let dns = inspect_dns_query(&request).unwrap();
    let response = build_block_response(
        &request,
        dns.ip.header_len(),
        dns.dns_offset(),
        &dns.query,
        &ResponseOptions::default(),
    )
    .unwrap();

    // Parses back as an IPv4/UDP packet from the resolver to the client
    let ip = parse_ipv4_header(&response).unwrap();
    assert_eq!(ip.protocol(), Protocol::Udp);
    assert_eq!(ip.src_addr(), Ipv4Addr::new(8, 8, 8, 8));
    assert_eq!(ip.dst_addr(), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(&response[20..24], &[0x00, 0x35, 0xD4, 0x31]);

    let dns_msg = &response[28..];
    assert_eq!(&dns_msg[0..2], &[0x12, 0x34]);
    let flags = DnsFlags::from_bits_truncate(u16::from_be_bytes([dns_msg[2], dns_msg[3]]));
    assert!(flags.contains(DnsFlags::RESPONSE));
    assert_eq!(u16::from_be_bytes([dns_msg[2], dns_msg[3]]) & DnsFlags::RCODE_MASK, 0);
    assert_eq!(u16::from_be_bytes([dns_msg[6], dns_msg[7]]), 1);

    // Question section byte-identical to the request
    assert_eq!(&dns_msg[12..12 + dns.query.question.len()], dns.query.question);

    // Answer resolves to 127.0.0.1
    assert_eq!(&response[response.len() - 4..], &[127, 0, 0, 1]);

    // Checksums verify
    assert!(verify_ipv4_header(&response[..20]));
    assert!(verify_udp_ipv4(ip.src_addr(), ip.dst_addr(), &response[20..]));
}

#[test]
fn test_response_is_not_reparsed_as_query() {
    let request = create_blocked_test_query();
    let response = codec_output(&request, "blocked.test");
    assert_ne!(response, request);
    assert!(inspect_dns_query(&response).is_none());
}

// ====== Pass-through Tests ======

#[test]
fn test_tcp_syn_passes_unchanged() {
    let packet = create_tcp_syn_packet();
    assert_eq!(codec_output(&packet, "blocked.test"), packet);
}

#[test]
fn test_short_packets_pass_unchanged() {
    for len in 0..20 {
        let packet = vec![0x45; len];
        assert!(parse_ipv4_header(&packet).is_err());
        assert_eq!(codec_output(&packet, "blocked.test"), packet);
    }
}

#[test]
fn test_ihl_beyond_buffer_passes_unchanged() {
    let mut packet = create_blocked_test_query();
    packet[0] = 0x4F; // IHL 60 bytes
    packet.truncate(40);
    assert_eq!(codec_output(&packet, "blocked.test"), packet);
}

#[test]
fn test_unblocked_query_passes_unchanged() {
    let packet = build_dns_query("allowed.test", 1).unwrap();
    assert_eq!(codec_output(&packet, "blocked.test"), packet);
}

#[test]
fn test_dns_response_passes_unchanged() {
    let mut packet = create_blocked_test_query();
    packet[30] |= 0x80; // QR
    assert_eq!(codec_output(&packet, "blocked.test"), packet);
}

// ====== Robustness Tests ======

proptest! {
    #[test]
    fn prop_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = parse_ipv4_header(&data);
        let out = codec_output(&data, "blocked.test");
        if inspect_dns_query(&data).is_none() {
            prop_assert_eq!(out, data);
        }
    }

    #[test]
    fn prop_dns_parser_never_panics(data in proptest::collection::vec(any::<u8>(), 0..300), offset in 0usize..320) {
        let _ = try_parse_dns_query(&data, offset);
    }

    #[test]
    fn prop_corrupted_query_never_panics(index in 0usize..58, value in any::<u8>()) {
        let mut packet = create_blocked_test_query();
        packet[index] = value;
        let _ = codec_output(&packet, "blocked.test");
    }

    #[test]
    fn prop_valid_names_survive_parsing(labels in proptest::collection::vec("[a-z0-9]{1,20}", 1..5), id in any::<u16>()) {
        let domain = labels.join(".");
        let packet = build_dns_query(&domain, id).unwrap();
        let dns = inspect_dns_query(&packet).unwrap();
        prop_assert_eq!(dns.query.domain, domain);
        prop_assert_eq!(dns.query.transaction_id, id);
    }
}
