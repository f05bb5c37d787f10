//! Packet builder utilities
//!
//! [`build_block_response`] turns an intercepted query into the spoofed
//! answer sent back through the tunnel. [`DnsQueryBuilder`] produces
//! well-formed query packets for diagnostics and tests.

use super::checksum::{ipv4_header_checksum, udp_checksum_ipv4};
use super::dns::encode_name;
use super::{
    ports, rr, DnsFlags, DnsQuery, Protocol, DNS_HEADER_LEN, IPV4_MIN_HEADER_LEN,
    MAX_PACKET_SIZE, UDP_HEADER_LEN,
};
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Default TTL of spoofed answers, in seconds
pub const DEFAULT_RESPONSE_TTL: u32 = 300;

/// Size of the single A record appended to a spoofed answer
const ANSWER_RECORD_LEN: usize = 16;

/// Compression pointer to the question name at offset 12 of the DNS message
const QUESTION_NAME_POINTER: u16 = 0xC00C;

/// Settings for spoofed answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseOptions {
    /// TTL of the answer record in seconds
    pub ttl: u32,
    /// Address every blocked name resolves to
    pub sinkhole: Ipv4Addr,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_RESPONSE_TTL,
            sinkhole: Ipv4Addr::LOCALHOST,
        }
    }
}

/// Build the spoofed answer for an intercepted query
///
/// The IP header (options included) and UDP header of `original` are
/// reused with addresses and ports swapped. The DNS message carries the
/// original transaction ID and question verbatim, followed by one A record
/// pointing at `options.sinkhole`. Lengths and both checksums are
/// recomputed over the new contents.
pub fn build_block_response(
    original: &[u8],
    ip_header_len: usize,
    dns_offset: usize,
    query: &DnsQuery<'_>,
    options: &ResponseOptions,
) -> Result<Vec<u8>> {
    if ip_header_len < IPV4_MIN_HEADER_LEN || dns_offset != ip_header_len + UDP_HEADER_LEN {
        return Err(Error::PacketBuild(format!(
            "Inconsistent offsets: IP header {ip_header_len}, DNS at {dns_offset}"
        )));
    }
    if original.len() < dns_offset + DNS_HEADER_LEN {
        return Err(Error::PacketTooSmall {
            expected: dns_offset + DNS_HEADER_LEN,
            actual: original.len(),
        });
    }
    let question = original
        .get(query.question_range.clone())
        .filter(|_| query.question_range.start == dns_offset + DNS_HEADER_LEN)
        .ok_or_else(|| Error::PacketBuild("Question lies outside the DNS message".into()))?;

    let udp_len = UDP_HEADER_LEN + DNS_HEADER_LEN + question.len() + ANSWER_RECORD_LEN;
    let total_len = ip_header_len + udp_len;
    if total_len > MAX_PACKET_SIZE {
        return Err(Error::PacketBuild(format!(
            "Response of {total_len} bytes exceeds the IPv4 limit"
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    let (total_len_field, udp_len_field) = (total_len as u16, udp_len as u16);

    let ip = &original[..ip_header_len];
    let udp = &original[ip_header_len..dns_offset];
    let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
    let dst = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);

    let mut packet = BytesMut::with_capacity(total_len);

    // IP header: version through TTL/protocol copied, addresses swapped
    packet.put_slice(&ip[..2]);
    packet.put_u16(total_len_field);
    packet.put_slice(&ip[4..10]);
    packet.put_u16(0); // Header checksum (placeholder)
    packet.put_slice(&dst.octets());
    packet.put_slice(&src.octets());
    packet.put_slice(&ip[IPV4_MIN_HEADER_LEN..]); // Options

    // UDP header with ports swapped
    packet.put_slice(&udp[2..4]);
    packet.put_slice(&udp[0..2]);
    packet.put_u16(udp_len_field);
    packet.put_u16(0); // Checksum (placeholder)

    // DNS header
    let mut flags = DnsFlags::RESPONSE | DnsFlags::RECURSION_AVAILABLE;
    if query.recursion_desired() {
        flags |= DnsFlags::RECURSION_DESIRED;
    }
    packet.put_u16(query.transaction_id);
    packet.put_u16(flags.bits());
    packet.put_u16(1); // QDCOUNT
    packet.put_u16(1); // ANCOUNT
    packet.put_u16(0); // NSCOUNT
    packet.put_u16(0); // ARCOUNT

    packet.put_slice(question);

    // Answer
    packet.put_u16(QUESTION_NAME_POINTER);
    packet.put_u16(rr::TYPE_A);
    packet.put_u16(rr::CLASS_IN);
    packet.put_u32(options.ttl);
    packet.put_u16(4);
    packet.put_slice(&options.sinkhole.octets());

    let ip_sum = ipv4_header_checksum(&packet[..ip_header_len]);
    packet[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    // Source and destination are swapped in the reply
    let udp_sum = udp_checksum_ipv4(dst, src, &packet[ip_header_len..]);
    packet[ip_header_len + 6..ip_header_len + 8].copy_from_slice(&udp_sum.to_be_bytes());

    Ok(packet.to_vec())
}

/// Builder for IPv4/UDP DNS query packets
#[derive(Debug, Clone)]
pub struct DnsQueryBuilder {
    domain: String,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    transaction_id: u16,
    qtype: u16,
    recursion_desired: bool,
}

impl DnsQueryBuilder {
    /// Create a builder for an A query of `domain`
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(8, 8, 8, 8),
            src_port: 50_000,
            dst_port: ports::DNS,
            ttl: 64,
            transaction_id: 0,
            qtype: rr::TYPE_A,
            recursion_desired: true,
        }
    }

    /// Set source IP
    pub fn src_ip(mut self, ip: Ipv4Addr) -> Self {
        self.src_ip = ip;
        self
    }

    /// Set destination IP
    pub fn dst_ip(mut self, ip: Ipv4Addr) -> Self {
        self.dst_ip = ip;
        self
    }

    /// Set source port
    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    /// Set destination port
    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    /// Set IP TTL
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set DNS transaction ID
    pub fn transaction_id(mut self, id: u16) -> Self {
        self.transaction_id = id;
        self
    }

    /// Set question type
    pub fn qtype(mut self, qtype: u16) -> Self {
        self.qtype = qtype;
        self
    }

    /// Set the RD flag
    pub fn recursion_desired(mut self, rd: bool) -> Self {
        self.recursion_desired = rd;
        self
    }

    /// Build the packet with valid IP and UDP checksums
    pub fn build(self) -> Result<Vec<u8>> {
        let name = encode_name(&self.domain)
            .ok_or_else(|| Error::PacketBuild(format!("Invalid domain name: {}", self.domain)))?;

        let udp_len = UDP_HEADER_LEN + DNS_HEADER_LEN + name.len() + 4;
        let total_len = IPV4_MIN_HEADER_LEN + udp_len;
        #[allow(clippy::cast_possible_truncation)]
        let (total_len_field, udp_len_field) = (total_len as u16, udp_len as u16);

        let mut packet = BytesMut::with_capacity(total_len);

        // IPv4 header
        packet.put_u8(0x45); // Version (4) + IHL (5)
        packet.put_u8(0x00); // DSCP + ECN
        packet.put_u16(total_len_field);
        packet.put_u16(self.transaction_id); // Identification
        packet.put_u16(0x4000); // Flags (DF) + Fragment Offset
        packet.put_u8(self.ttl);
        packet.put_u8(Protocol::Udp.to_u8());
        packet.put_u16(0); // Header Checksum (placeholder)
        packet.put_slice(&self.src_ip.octets());
        packet.put_slice(&self.dst_ip.octets());

        // UDP header
        packet.put_u16(self.src_port);
        packet.put_u16(self.dst_port);
        packet.put_u16(udp_len_field);
        packet.put_u16(0); // Checksum (placeholder)

        // DNS header
        let flags = if self.recursion_desired {
            DnsFlags::RECURSION_DESIRED
        } else {
            DnsFlags::empty()
        };
        packet.put_u16(self.transaction_id);
        packet.put_u16(flags.bits());
        packet.put_u16(1); // QDCOUNT
        packet.put_slice(&[0u8; 6]); // AN/NS/AR

        // Question
        packet.put_slice(&name);
        packet.put_u16(self.qtype);
        packet.put_u16(rr::CLASS_IN);

        let ip_sum = ipv4_header_checksum(&packet[..IPV4_MIN_HEADER_LEN]);
        packet[10..12].copy_from_slice(&ip_sum.to_be_bytes());
        let udp_sum = udp_checksum_ipv4(self.src_ip, self.dst_ip, &packet[IPV4_MIN_HEADER_LEN..]);
        packet[26..28].copy_from_slice(&udp_sum.to_be_bytes());

        Ok(packet.to_vec())
    }
}

/// Build an A query for `domain` with default addresses
pub fn build_dns_query(domain: &str, transaction_id: u16) -> Result<Vec<u8>> {
    DnsQueryBuilder::new(domain)
        .transaction_id(transaction_id)
        .build()
}
