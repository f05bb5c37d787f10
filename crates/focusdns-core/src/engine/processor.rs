//! Per-packet decision
//!
//! Pure function of the packet and the current rules; the worker only adds
//! tunnel I/O and event emission around it.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::stats::Stats;
use crate::filter::{BlockRule, Decision, DomainBlockRegistry};
use crate::packet::{build_block_response, inspect_dns_query, ResponseOptions};

/// What to write back for a packet read from the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketAction {
    /// Write the original bytes unchanged
    Forward,
    /// Write `response` instead of the original
    Block {
        /// Spoofed answer
        response: Vec<u8>,
        /// Queried domain
        domain: String,
        /// Rule that matched
        rule: Arc<BlockRule>,
    },
}

/// Decide what to do with one raw packet
pub fn process_packet(
    registry: &DomainBlockRegistry,
    options: &ResponseOptions,
    packet: &[u8],
    stats: &Stats,
) -> PacketAction {
    let Some(dns) = inspect_dns_query(packet) else {
        return PacketAction::Forward;
    };
    stats.record_query();

    let rule = match registry.classify(&dns.query.domain) {
        Decision::Blocked(rule) => rule,
        Decision::Critical => {
            stats.record_critical();
            trace!(domain = %dns.query.domain, "Critical domain allowed");
            return PacketAction::Forward;
        }
        Decision::Allowed => {
            trace!(domain = %dns.query.domain, "Domain allowed");
            return PacketAction::Forward;
        }
    };

    match build_block_response(
        packet,
        dns.ip.header_len(),
        dns.dns_offset(),
        &dns.query,
        options,
    ) {
        Ok(response) => {
            debug!(
                domain = %dns.query.domain,
                client = %dns.ip.src_addr(),
                port = dns.src_port,
                id = dns.query.transaction_id,
                "Spoofing DNS answer"
            );
            PacketAction::Block {
                response,
                domain: dns.query.domain,
                rule,
            }
        }
        Err(e) => {
            stats.record_build_failure();
            warn!(domain = %dns.query.domain, error = %e, "Could not build block response");
            PacketAction::Forward
        }
    }
}
