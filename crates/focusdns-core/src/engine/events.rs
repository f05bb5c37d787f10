//! Blocked-domain events and the collaborators that receive them
//!
//! The packet loop never waits on a collaborator: events go through a
//! bounded queue with `try_send` and are delivered by a dedicated
//! dispatcher thread.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;
use tracing::{debug, trace, warn};

use super::stats::Stats;

/// A DNS query that was answered with the sinkhole address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    /// Queried domain
    pub domain: String,
    /// Human-readable reason, naming the matching rule
    pub reason: String,
    /// When the query was blocked
    pub at: SystemTime,
}

impl BlockEvent {
    /// Create an event stamped with the current time
    pub fn new(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            reason: reason.into(),
            at: SystemTime::now(),
        }
    }
}

/// The focus session driving the engine
pub trait SessionMonitor: Send + Sync {
    /// Whether blocking should stay active; consulted before every restart
    fn should_remain_active(&self) -> bool;

    /// A blocked domain interrupted the session
    fn record_interruption(&self, domain: &str);
}

/// Presentation of blocking to the user
pub trait BlockNotifier: Send + Sync {
    /// Tell the user a site was blocked
    fn show_blocked_notice(&self, domain: &str, reason: &str);

    /// Website blocking could not be started or restarted
    fn blocking_unavailable(&self, reason: &str);
}

/// Session monitor for engines not tied to a session
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl SessionMonitor for AlwaysActive {
    fn should_remain_active(&self) -> bool {
        true
    }

    fn record_interruption(&self, _domain: &str) {}
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl BlockNotifier for LogNotifier {
    fn show_blocked_notice(&self, domain: &str, reason: &str) {
        debug!(domain, reason, "Blocked");
    }

    fn blocking_unavailable(&self, reason: &str) {
        warn!(reason, "Website blocking unavailable");
    }
}

/// Owns the event queue and the dispatcher thread
///
/// Dropping it closes the queue and waits for queued events to be
/// delivered.
pub(crate) struct EventDispatcher {
    tx: Option<Sender<BlockEvent>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<Stats>,
}

impl EventDispatcher {
    pub(crate) fn spawn(
        capacity: usize,
        session: Arc<dyn SessionMonitor>,
        notifier: Arc<dyn BlockNotifier>,
        stats: Arc<Stats>,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        let handle = {
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("focusdns-events".into())
                .spawn(move || dispatch(&rx, session.as_ref(), notifier.as_ref(), &stats))?
        };
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            stats,
        })
    }

    /// Queue an event without blocking; returns false if it was dropped
    pub(crate) fn emit(&self, event: BlockEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.stats.record_dropped_event();
                trace!(domain = %event.domain, "Event queue full, dropping block event");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn dispatch(
    rx: &Receiver<BlockEvent>,
    session: &dyn SessionMonitor,
    notifier: &dyn BlockNotifier,
    stats: &Stats,
) {
    for event in rx {
        session.record_interruption(&event.domain);
        notifier.show_blocked_notice(&event.domain, &event.reason);
        stats.record_delivered();
    }
    debug!("Event dispatcher stopped");
}
