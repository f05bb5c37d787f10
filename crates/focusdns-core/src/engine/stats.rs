//! Engine counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by the worker and the dispatcher
#[derive(Debug, Default)]
pub struct Stats {
    packets_read: AtomicU64,
    packets_forwarded: AtomicU64,
    dns_queries: AtomicU64,
    queries_blocked: AtomicU64,
    critical_allowed: AtomicU64,
    build_failures: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    io_errors: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Packets read from the tunnel
    pub packets_read: u64,
    /// Packets written back unchanged
    pub packets_forwarded: u64,
    /// DNS queries decoded
    pub dns_queries: u64,
    /// Queries answered with a spoofed response
    pub queries_blocked: u64,
    /// Queries for critical domains
    pub critical_allowed: u64,
    /// Blocked queries forwarded because no response could be built
    pub build_failures: u64,
    /// Blocked events handed to collaborators
    pub events_delivered: u64,
    /// Blocked events dropped on a full queue
    pub events_dropped: u64,
    /// Tunnel read or write failures
    pub io_errors: u64,
    /// Automatic restarts after a failure
    pub restarts: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Stats {
    counter! {
        record_read => packets_read,
        record_forward => packets_forwarded,
        record_query => dns_queries,
        record_block => queries_blocked,
        record_critical => critical_allowed,
        record_build_failure => build_failures,
        record_delivered => events_delivered,
        record_dropped_event => events_dropped,
        record_io_error => io_errors,
        record_restart => restarts,
    }

    /// Copy the current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            dns_queries: self.dns_queries.load(Ordering::Relaxed),
            queries_blocked: self.queries_blocked.load(Ordering::Relaxed),
            critical_allowed: self.critical_allowed.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}
