//! Internet checksum (RFC 1071) for IPv4 headers and UDP datagrams

use std::net::Ipv4Addr;

use super::types::Protocol;

/// Running one's-complement sum
///
/// Bytes are consumed as big-endian 16-bit words. Only the final chunk
/// passed to [`Checksum::add_bytes`] may have an odd length; it is padded
/// with a zero byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct Checksum {
    sum: u64,
}

impl Checksum {
    /// Start an empty sum
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a 16-bit word
    pub fn add_u16(&mut self, word: u16) -> &mut Self {
        self.sum += u64::from(word);
        self
    }

    /// Add a byte slice
    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        let mut chunks = data.chunks_exact(2);
        for pair in &mut chunks {
            self.sum += u64::from(u16::from_be_bytes([pair[0], pair[1]]));
        }
        if let [last] = chunks.remainder() {
            self.sum += u64::from(*last) << 8;
        }
        self
    }

    /// Add the IPv4 pseudo-header used by TCP and UDP
    pub fn add_pseudo_header(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: Protocol,
        length: u16,
    ) -> &mut Self {
        self.add_bytes(&src.octets())
            .add_bytes(&dst.octets())
            .add_u16(u16::from(protocol.to_u8()))
            .add_u16(length)
    }

    /// Fold the carries and return the complemented 16-bit checksum
    pub fn finish(&self) -> u16 {
        let mut sum = self.sum;
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        #[allow(clippy::cast_possible_truncation)]
        let folded = sum as u16;
        !folded
    }
}

/// Checksum an arbitrary buffer
pub fn internet_checksum(data: &[u8]) -> u16 {
    Checksum::new().add_bytes(data).finish()
}

/// Compute the IPv4 header checksum, ignoring whatever the checksum field
/// currently holds
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    if header.len() < 12 {
        return internet_checksum(header);
    }
    Checksum::new()
        .add_bytes(&header[..10])
        .add_bytes(&header[12..])
        .finish()
}

/// Compute the UDP checksum over the pseudo-header and the datagram,
/// ignoring the datagram's current checksum field
///
/// A computed value of zero is returned as `0xFFFF`, since zero on the
/// wire means "no checksum" (RFC 768).
pub fn udp_checksum_ipv4(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> u16 {
    let length = u16::try_from(datagram.len()).unwrap_or(u16::MAX);
    let mut sum = Checksum::new();
    sum.add_pseudo_header(src, dst, Protocol::Udp, length);
    if datagram.len() >= 8 {
        sum.add_bytes(&datagram[..6]).add_bytes(&datagram[8..]);
    } else {
        sum.add_bytes(datagram);
    }
    match sum.finish() {
        0 => 0xFFFF,
        value => value,
    }
}

/// Check that an IPv4 header carries a valid checksum
pub fn verify_ipv4_header(header: &[u8]) -> bool {
    internet_checksum(header) == 0
}

/// Check that a UDP datagram carries a valid checksum (or none at all)
pub fn verify_udp_ipv4(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> bool {
    if datagram.len() < 8 {
        return false;
    }
    if datagram[6] == 0 && datagram[7] == 0 {
        return true;
    }
    let length = u16::try_from(datagram.len()).unwrap_or(u16::MAX);
    Checksum::new()
        .add_pseudo_header(src, dst, Protocol::Udp, length)
        .add_bytes(datagram)
        .finish()
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internet_checksum_rfc1071() {
        // Example from RFC 1071
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), 0x220d);
    }

    #[test]
    fn test_internet_checksum_edges() {
        assert_eq!(internet_checksum(&[]), 0xFFFF);
        assert_eq!(internet_checksum(&[0x00, 0x00, 0x00, 0x00]), 0xFFFF);
        assert_eq!(internet_checksum(&[0xFF, 0xFF, 0xFF, 0xFF]), 0x0000);
    }

    #[test]
    fn test_odd_length_is_zero_padded() {
        assert_eq!(
            internet_checksum(&[0x12, 0x34, 0x56]),
            internet_checksum(&[0x12, 0x34, 0x56, 0x00])
        );
    }

    #[test]
    fn test_ipv4_header_checksum() {
        let header = [
            0x45, 0x00, 0x00, 0x3c, // Version, IHL, TOS, total length 60
            0x1c, 0x46, 0x40, 0x00, // Identification, flags
            0x40, 0x06, 0xAB, 0xCD, // TTL 64, TCP, stale checksum
            0xac, 0x10, 0x0a, 0x63, // 172.16.10.99
            0xac, 0x10, 0x0a, 0x0c, // 172.16.10.12
        ];

        // The stale checksum field must not influence the result
        assert_eq!(ipv4_header_checksum(&header), 0xb1e6);

        let mut fixed = header;
        fixed[10..12].copy_from_slice(&0xb1e6u16.to_be_bytes());
        assert!(verify_ipv4_header(&fixed));
        assert!(!verify_ipv4_header(&header));
    }

    #[test]
    fn test_udp_checksum_verifies() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(8, 8, 8, 8);
        let mut datagram = vec![
            0xC3, 0x50, // src port 50000
            0x00, 0x35, // dst port 53
            0x00, 0x0B, // length 11
            0x00, 0x00, // checksum
            0xDE, 0xAD, 0xBE, // odd-length payload
        ];

        let sum = udp_checksum_ipv4(src, dst, &datagram);
        datagram[6..8].copy_from_slice(&sum.to_be_bytes());
        assert!(verify_udp_ipv4(src, dst, &datagram));

        datagram[9] ^= 0x01;
        assert!(!verify_udp_ipv4(src, dst, &datagram));
    }

    #[test]
    fn test_udp_without_checksum_accepted() {
        let datagram = [0x00, 0x35, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00];
        assert!(verify_udp_ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            &datagram
        ));
    }
}
