//! Packet parsing and synthesis
//!
//! Zero-copy views over raw IPv4 packets read from the tunnel, decoding of
//! the DNS question carried in UDP/53 datagrams, and construction of the
//! spoofed answers written back for blocked names.
//!
//! Nothing in this module panics on malformed input: every length and
//! offset read from the wire is checked against the buffer first.

mod builder;
pub mod checksum;
mod dns;
mod types;

pub use builder::{build_block_response, build_dns_query, DnsQueryBuilder, ResponseOptions};
pub use dns::{encode_name, try_parse_dns_query, DnsFlags, DnsQuery, MAX_LABEL_LEN};
pub use types::*;

use crate::error::{Error, Result};
use std::net::Ipv4Addr;
use tracing::trace;

/// Minimum IPv4 header length (IHL = 5)
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// UDP header length
pub const UDP_HEADER_LEN: usize = 8;

/// DNS message header length
pub const DNS_HEADER_LEN: usize = 12;

/// Maximum encoded length of a DNS name, length octets included
pub const MAX_DOMAIN_WIRE_LEN: usize = 255;

/// Largest IPv4 packet we ever read or write
pub const MAX_PACKET_SIZE: usize = 65_535;

/// Bytes of an unparseable DNS payload included in trace output
const TRACE_DUMP_LEN: usize = 32;

/// Non-owning view over a validated IPv4 header
///
/// Offsets exposed by the view are guaranteed to lie inside the packet's
/// total length, which in turn lies inside the underlying buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4View<'a> {
    data: &'a [u8],
    header_len: usize,
    total_len: usize,
}

impl<'a> Ipv4View<'a> {
    /// IP header length in bytes, options included
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Value of the total-length field
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Transport protocol
    pub fn protocol(&self) -> Protocol {
        Protocol::from_u8(self.data[9])
    }

    /// Source address
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[12], self.data[13], self.data[14], self.data[15])
    }

    /// Destination address
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[16], self.data[17], self.data[18], self.data[19])
    }

    /// Time to live
    pub fn ttl(&self) -> u8 {
        self.data[8]
    }

    /// Identification field
    pub fn identification(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    /// Offset of the transport header within the buffer
    pub fn payload_offset(&self) -> usize {
        self.header_len
    }

    /// Transport header and payload, bounded by the total-length field
    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header_len..self.total_len]
    }

    /// The packet bytes covered by the total-length field
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.data[..self.total_len]
    }

    /// Whether this packet is a fragment (MF set or non-zero offset)
    pub fn is_fragment(&self) -> bool {
        let frag = u16::from_be_bytes([self.data[6], self.data[7]]);
        frag & 0x2000 != 0 || frag & 0x1FFF != 0
    }
}

/// Validate and view the IPv4 header at the start of `buf`
///
/// Trailing bytes past the total-length field (link padding) are tolerated
/// and excluded from the view.
pub fn parse_ipv4_header(buf: &[u8]) -> Result<Ipv4View<'_>> {
    if buf.len() < IPV4_MIN_HEADER_LEN {
        return Err(Error::PacketTooSmall {
            expected: IPV4_MIN_HEADER_LEN,
            actual: buf.len(),
        });
    }

    let version = buf[0] >> 4;
    if version != 4 {
        return Err(Error::packet_parse_at(
            format!("Not an IPv4 packet (version {version})"),
            0,
        ));
    }

    let header_len = usize::from(buf[0] & 0x0F) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(Error::packet_parse_at(
            format!("Invalid IPv4 header length: {header_len}"),
            0,
        ));
    }
    if header_len > buf.len() {
        return Err(Error::PacketTooSmall {
            expected: header_len,
            actual: buf.len(),
        });
    }

    let total_len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
    if total_len < header_len {
        return Err(Error::packet_parse_at(
            format!("Total length {total_len} shorter than header length {header_len}"),
            2,
        ));
    }
    if total_len > buf.len() {
        return Err(Error::PacketTooSmall {
            expected: total_len,
            actual: buf.len(),
        });
    }

    Ok(Ipv4View {
        data: buf,
        header_len,
        total_len,
    })
}

/// A DNS query found in an IPv4/UDP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsPacket<'a> {
    /// The enclosing IPv4 header
    pub ip: Ipv4View<'a>,
    /// UDP source port of the client
    pub src_port: u16,
    /// UDP destination port (always 53)
    pub dst_port: u16,
    /// The decoded question
    pub query: DnsQuery<'a>,
}

impl DnsPacket<'_> {
    /// Offset of the DNS header within the packet
    pub fn dns_offset(&self) -> usize {
        self.query.dns_offset
    }
}

/// Run the full IPv4 → UDP/53 → DNS chain over a raw packet
///
/// Returns `None` for anything that should be forwarded without a
/// decision: non-IPv4, non-UDP, fragments, other destination ports and
/// malformed or non-query DNS payloads.
pub fn inspect_dns_query(buf: &[u8]) -> Option<DnsPacket<'_>> {
    let ip = match parse_ipv4_header(buf) {
        Ok(ip) => ip,
        Err(e) => {
            trace!(len = buf.len(), error = %e, "Not a parseable IPv4 packet");
            return None;
        }
    };

    if ip.protocol() != Protocol::Udp || ip.is_fragment() {
        return None;
    }

    let udp = ip.payload();
    if udp.len() < UDP_HEADER_LEN {
        return None;
    }
    let src_port = u16::from_be_bytes([udp[0], udp[1]]);
    let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
    if dst_port != ports::DNS {
        return None;
    }

    // The UDP length bounds the DNS message; never trust it past the IP total
    let udp_len = usize::from(u16::from_be_bytes([udp[4], udp[5]]));
    if udp_len < UDP_HEADER_LEN {
        return None;
    }
    let datagram_end = ip.payload_offset() + udp_len.min(udp.len());
    let dns_offset = ip.payload_offset() + UDP_HEADER_LEN;

    let Some(query) = try_parse_dns_query(&buf[..datagram_end], dns_offset) else {
        let payload = &buf[dns_offset..datagram_end];
        trace!(
            src = %ip.src_addr(),
            src_port,
            prefix = %hex::encode(&payload[..payload.len().min(TRACE_DUMP_LEN)]),
            "Unparseable DNS payload"
        );
        return None;
    };

    Some(DnsPacket {
        ip,
        src_port,
        dst_port,
        query,
    })
}
