//! DNS question decoding
//!
//! Only the part of a DNS message needed to make a blocking decision is
//! decoded: the fixed header and the first question. Every offset is
//! bounds-checked before use since the input comes straight off the wire.

use bitflags::bitflags;
use std::ops::Range;
use tracing::trace;

use super::{DNS_HEADER_LEN, MAX_DOMAIN_WIRE_LEN};

/// Longest single label allowed by RFC 1035
pub const MAX_LABEL_LEN: usize = 63;

bitflags! {
    /// Single-bit fields of the DNS header flags word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DnsFlags: u16 {
        /// QR: message is a response
        const RESPONSE = 0x8000;
        /// AA: authoritative answer
        const AUTHORITATIVE = 0x0400;
        /// TC: message was truncated
        const TRUNCATED = 0x0200;
        /// RD: recursion desired
        const RECURSION_DESIRED = 0x0100;
        /// RA: recursion available
        const RECURSION_AVAILABLE = 0x0080;
        /// AD: authentic data
        const AUTHENTIC_DATA = 0x0020;
        /// CD: checking disabled
        const CHECKING_DISABLED = 0x0010;
    }
}

impl DnsFlags {
    /// Mask of the 4-bit OPCODE field
    pub const OPCODE_MASK: u16 = 0x7800;
    /// Mask of the 4-bit RCODE field
    pub const RCODE_MASK: u16 = 0x000F;
}

/// A DNS query located inside a raw packet buffer
///
/// Borrowed from the buffer it was parsed from and only valid as long as
/// that buffer is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery<'a> {
    /// Transaction ID copied into the response
    pub transaction_id: u16,
    /// Header flags of the query
    pub flags: DnsFlags,
    /// Queried name, lowercased, labels joined with `.`
    pub domain: String,
    /// Question type (A, AAAA, ...)
    pub qtype: u16,
    /// Question class
    pub qclass: u16,
    /// Offset of the DNS header within the buffer
    pub dns_offset: usize,
    /// Byte range of the first question (name + type + class)
    pub question_range: Range<usize>,
    /// Raw bytes of the first question
    pub question: &'a [u8],
}

impl DnsQuery<'_> {
    /// Whether the client asked for recursion
    pub fn recursion_desired(&self) -> bool {
        self.flags.contains(DnsFlags::RECURSION_DESIRED)
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Try to decode a standard DNS query starting at `dns_offset`
///
/// Returns `None` for anything that is not a well-formed standard query:
/// responses, non-zero opcodes, an empty question section, compressed or
/// oversized names and truncated buffers. Callers forward such packets
/// unchanged.
pub fn try_parse_dns_query(buf: &[u8], dns_offset: usize) -> Option<DnsQuery<'_>> {
    let header = buf.get(dns_offset..dns_offset.checked_add(DNS_HEADER_LEN)?)?;

    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let raw_flags = u16::from_be_bytes([header[2], header[3]]);
    let flags = DnsFlags::from_bits_truncate(raw_flags);
    let qdcount = u16::from_be_bytes([header[4], header[5]]);

    if flags.contains(DnsFlags::RESPONSE) || raw_flags & DnsFlags::OPCODE_MASK != 0 {
        return None;
    }
    if qdcount == 0 {
        return None;
    }

    let question_start = dns_offset + DNS_HEADER_LEN;
    let (domain, name_end) = decode_name(buf, question_start)?;

    let qtype = read_u16(buf, name_end)?;
    let qclass = read_u16(buf, name_end + 2)?;
    let question_end = name_end + 4;

    Some(DnsQuery {
        transaction_id,
        flags,
        domain,
        qtype,
        qclass,
        dns_offset,
        question_range: question_start..question_end,
        question: &buf[question_start..question_end],
    })
}

/// Decode an uncompressed name, returning it with the offset just past the
/// terminating zero label
fn decode_name(buf: &[u8], start: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut pos = start;
    // Wire length including the length octets and the root label
    let mut wire_len = 1usize;

    loop {
        let len = usize::from(*buf.get(pos)?);
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xC0 != 0 {
            trace!(offset = pos, "Compressed or extended label in question");
            return None;
        }
        if len > MAX_LABEL_LEN {
            return None;
        }
        wire_len += len + 1;
        if wire_len > MAX_DOMAIN_WIRE_LEN {
            trace!(offset = pos, "Question name exceeds {} bytes", MAX_DOMAIN_WIRE_LEN);
            return None;
        }

        let label = buf.get(pos + 1..pos + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        for &byte in label {
            if !byte.is_ascii() || byte == b'.' || byte.is_ascii_control() {
                return None;
            }
            name.push(char::from(byte.to_ascii_lowercase()));
        }
        pos += 1 + len;
    }

    if name.is_empty() {
        // Root query; there is nothing to match against
        return None;
    }
    Some((name, pos))
}

/// Encode a dotted name as a sequence of length-prefixed labels
///
/// Returns `None` if any label is empty or too long, or the encoded name
/// exceeds the 255 byte limit.
pub fn encode_name(domain: &str) -> Option<Vec<u8>> {
    let domain = domain.trim_end_matches('.');
    let mut out = Vec::with_capacity(domain.len() + 2);
    for label in domain.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    if out.len() > MAX_DOMAIN_WIRE_LEN {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_message(id: u16, flags: u16, name: &[u8]) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&id.to_be_bytes());
        msg.extend_from_slice(&flags.to_be_bytes());
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        msg.extend_from_slice(name);
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A, IN
        msg
    }

    #[test]
    fn test_parse_simple_query() {
        let msg = query_message(0x1234, 0x0100, b"\x07Blocked\x04Test\x00");
        let query = try_parse_dns_query(&msg, 0).unwrap();

        assert_eq!(query.transaction_id, 0x1234);
        assert_eq!(query.domain, "blocked.test");
        assert_eq!(query.qtype, 1);
        assert_eq!(query.qclass, 1);
        assert!(query.recursion_desired());
        assert_eq!(query.question_range, 12..msg.len());
        assert_eq!(query.question, &msg[12..]);
    }

    #[test]
    fn test_response_is_not_a_query() {
        let msg = query_message(0x1234, 0x8180, b"\x04test\x00");
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_non_standard_opcode_ignored() {
        // OPCODE 2 (STATUS)
        let msg = query_message(0x1234, 0x1000, b"\x04test\x00");
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_empty_question_section() {
        let mut msg = query_message(0x1234, 0x0100, b"\x04test\x00");
        msg[5] = 0;
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_label_overrun_rejected() {
        // Label claims 40 bytes but only 4 follow
        let mut msg = query_message(0x1, 0x0100, b"");
        msg.truncate(12);
        msg.extend_from_slice(&[40, b'a', b'b', b'c', b'd']);
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let mut msg = query_message(0x1, 0x0100, b"");
        msg.truncate(12);
        msg.extend_from_slice(b"\x04test");
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_compression_pointer_rejected() {
        let msg = query_message(0x1, 0x0100, b"\xC0\x0C");
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_overlong_name_rejected() {
        let mut name = Vec::new();
        for _ in 0..5 {
            name.push(60u8);
            name.extend_from_slice(&[b'a'; 60]);
        }
        name.push(0);
        let msg = query_message(0x1, 0x0100, &name);
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_missing_qtype_rejected() {
        let mut msg = query_message(0x1, 0x0100, b"\x04test\x00");
        msg.truncate(msg.len() - 3);
        assert!(try_parse_dns_query(&msg, 0).is_none());
    }

    #[test]
    fn test_offset_past_buffer() {
        let msg = query_message(0x1, 0x0100, b"\x04test\x00");
        assert!(try_parse_dns_query(&msg, msg.len() + 10).is_none());
        assert!(try_parse_dns_query(&msg, usize::MAX).is_none());
    }

    #[test]
    fn test_encode_name() {
        assert_eq!(
            encode_name("video.example").unwrap(),
            b"\x05video\x07example\x00".to_vec()
        );
        assert_eq!(encode_name("a.b."), Some(b"\x01a\x01b\x00".to_vec()));
        assert!(encode_name("bad..name").is_none());
        assert!(encode_name(&"x".repeat(64)).is_none());
    }
}
