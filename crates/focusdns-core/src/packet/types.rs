//! Packet type definitions

use std::fmt;

/// Transport protocol carried by an IPv4 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// ICMP (protocol number 1)
    Icmp,
    /// TCP (protocol number 6)
    Tcp,
    /// UDP (protocol number 17)
    Udp,
    /// Anything else, with its protocol number
    Other(u8),
}

impl Protocol {
    /// Create from protocol number
    pub fn from_u8(proto: u8) -> Self {
        match proto {
            1 => Protocol::Icmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            other => Protocol::Other(other),
        }
    }

    /// Get protocol number
    pub fn to_u8(self) -> u8 {
        match self {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Other(n) => n,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Icmp => f.write_str("icmp"),
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
            Protocol::Other(n) => write!(f, "proto-{n}"),
        }
    }
}

/// Well-known ports
pub mod ports {
    /// DNS port
    pub const DNS: u16 = 53;
    /// HTTPS port
    pub const HTTPS: u16 = 443;
}

/// DNS record types and classes used by the codec
pub mod rr {
    /// A record (IPv4 address)
    pub const TYPE_A: u16 = 1;
    /// AAAA record (IPv6 address)
    pub const TYPE_AAAA: u16 = 28;
    /// Internet class
    pub const CLASS_IN: u16 = 1;
}
