//! The blocking engine
//!
//! [`BlockingEngine`] owns the rule registry and the tunnel driver and runs
//! the packet loop on one dedicated worker thread:
//!
//! ```text
//! read -> parse IPv4 -> UDP/53? -> parse DNS -> blocked? -> write response
//!                  \________\____________\___________\--> write original
//! ```
//!
//! Lifecycle operations (`start`, `stop`, automatic restart) are serialized
//! by one lock that the worker never takes. Rule updates go straight to the
//! registry and are safe at any time.

mod events;
mod processor;
mod state;
mod stats;

pub use events::{AlwaysActive, BlockEvent, BlockNotifier, LogNotifier, SessionMonitor};
pub use processor::{process_packet, PacketAction};
pub use state::EngineState;
pub use stats::{Stats, StatsSnapshot};

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{CriticalDomainSet, DomainBlockRegistry, RuleSpec, RuleUpdate};
use crate::packet::{ResponseOptions, MAX_PACKET_SIZE};
use crate::tunnel::{TunnelConfig, TunnelDevice, TunnelDriver, TunnelError, TunnelProvider};

use events::EventDispatcher;
use state::AtomicState;

/// Default delay before restarting after a tunnel failure
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// Default capacity of the blocked-event queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Delay before an automatic restart
    pub restart_backoff: Duration,
    /// Capacity of the blocked-event queue
    pub event_queue_capacity: usize,
    /// Spoofed answer settings
    pub response: ResponseOptions,
    /// Read buffer size
    pub max_packet_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            restart_backoff: DEFAULT_RESTART_BACKOFF,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            response: ResponseOptions::default(),
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

/// Builder for [`BlockingEngine`]
pub struct EngineBuilder {
    provider: Arc<dyn TunnelProvider>,
    tunnel: TunnelConfig,
    options: EngineOptions,
    critical: CriticalDomainSet,
    session: Arc<dyn SessionMonitor>,
    notifier: Arc<dyn BlockNotifier>,
}

impl EngineBuilder {
    /// Interface settings
    #[must_use]
    pub fn tunnel_config(mut self, config: TunnelConfig) -> Self {
        self.tunnel = config;
        self
    }

    /// Engine tuning
    #[must_use]
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Critical allowlist
    #[must_use]
    pub fn critical_domains(mut self, critical: CriticalDomainSet) -> Self {
        self.critical = critical;
        self
    }

    /// Session collaborator
    #[must_use]
    pub fn session_monitor(mut self, session: Arc<dyn SessionMonitor>) -> Self {
        self.session = session;
        self
    }

    /// Presentation collaborator
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn BlockNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Apply the engine, tunnel and critical sections of a configuration
    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.options(EngineOptions::from(&config.engine))
            .tunnel_config(config.tunnel.clone())
            .critical_domains(CriticalDomainSet::with_extra(&config.critical.extra_domains))
    }

    /// Build the engine; spawns the event dispatcher thread
    pub fn build(self) -> Result<BlockingEngine> {
        let stats = Arc::new(Stats::default());
        let events = EventDispatcher::spawn(
            self.options.event_queue_capacity,
            Arc::clone(&self.session),
            Arc::clone(&self.notifier),
            Arc::clone(&stats),
        )?;

        Ok(BlockingEngine {
            inner: Arc::new(EngineInner {
                registry: DomainBlockRegistry::new(self.critical),
                driver: TunnelDriver::new(self.provider, self.tunnel),
                options: self.options,
                session: self.session,
                notifier: self.notifier,
                events,
                stats,
                state: AtomicState::new(EngineState::Stopped),
                desired: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                restart_pending: AtomicBool::new(false),
                last_rules: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(Lifecycle { worker: None }),
            }),
        })
    }
}

struct Lifecycle {
    worker: Option<JoinHandle<()>>,
}

struct EngineInner {
    registry: DomainBlockRegistry,
    driver: TunnelDriver,
    options: EngineOptions,
    session: Arc<dyn SessionMonitor>,
    notifier: Arc<dyn BlockNotifier>,
    events: EventDispatcher,
    stats: Arc<Stats>,
    state: AtomicState,
    /// Whether the control plane wants blocking active
    desired: AtomicBool,
    /// Bumped by every control-plane start and stop
    generation: AtomicU64,
    restart_pending: AtomicBool,
    /// Rules of the last start or update, reapplied on restart
    last_rules: Mutex<Vec<RuleSpec>>,
    lifecycle: Mutex<Lifecycle>,
}

/// DNS-level website blocker
///
/// One engine owns one registry and one tunnel driver. All methods take
/// `&self` and may be called from any thread; dropping the engine stops it.
pub struct BlockingEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for BlockingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingEngine")
            .field("state", &self.state())
            .field("rules", &self.inner.registry.len())
            .field("tunnel", &self.inner.driver)
            .finish()
    }
}

impl BlockingEngine {
    /// Start building an engine on top of a tunnel provider
    pub fn builder(provider: Arc<dyn TunnelProvider>) -> EngineBuilder {
        EngineBuilder {
            provider,
            tunnel: TunnelConfig::default(),
            options: EngineOptions::default(),
            critical: CriticalDomainSet::new(),
            session: Arc::new(AlwaysActive),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Apply `rules`, establish the tunnel and launch the packet loop
    ///
    /// Only valid while stopped. On failure the rules are cleared, the
    /// engine stays stopped and the notifier is told blocking is
    /// unavailable.
    #[instrument(skip_all, fields(rules = rules.len()))]
    pub fn start(&self, rules: Vec<RuleSpec>) -> Result<RuleUpdate> {
        let mut lifecycle = self.inner.lifecycle.lock();
        let state = self.inner.state.load();
        if state != EngineState::Stopped {
            return Err(Error::InvalidState {
                operation: "start",
                state,
            });
        }

        self.inner.desired.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.last_rules.lock().clone_from(&rules);

        let result = EngineInner::start_locked(&self.inner, &mut lifecycle, &rules);
        if result.is_err() {
            self.inner.desired.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Stop the packet loop, close the tunnel and clear all rules
    ///
    /// Idempotent; unblocks a pending read and waits for the worker to
    /// exit. Also cancels a pending automatic restart.
    #[instrument(skip_all)]
    pub fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        self.inner.desired.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.stop_locked(&mut lifecycle);
    }

    /// Replace the rules; safe while the loop is running
    ///
    /// The rules are also remembered for automatic restarts.
    pub fn update_rules(&self, rules: Vec<RuleSpec>) -> RuleUpdate {
        let update = self.inner.registry.replace_rules(&rules);
        *self.inner.last_rules.lock() = rules;
        update
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.inner.state.load()
    }

    /// Whether the packet loop is running
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Whether an automatic restart is scheduled
    pub fn restart_pending(&self) -> bool {
        self.inner.restart_pending.load(Ordering::SeqCst)
    }

    /// Counters
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// The rule registry, for inspection
    pub fn registry(&self) -> &DomainBlockRegistry {
        &self.inner.registry
    }
}

impl Drop for BlockingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EngineInner {
    fn start_locked(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        rules: &[RuleSpec],
    ) -> Result<RuleUpdate> {
        self.state.store(EngineState::Starting);
        let update = self.registry.replace_rules(rules);
        if !update.is_clean() {
            warn!(rejected = update.rejected.len(), "Some block rules were rejected");
        }

        let device = match self.driver.establish() {
            Ok(device) => device,
            Err(e) => {
                self.fail_start(&e.to_string());
                return Err(e.into());
            }
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let worker = {
            let inner = Arc::clone(self);
            let device = Arc::clone(&device);
            thread::Builder::new()
                .name("focusdns-worker".into())
                .spawn(move || inner.run_worker(device.as_ref(), generation))
        };

        match worker {
            Ok(handle) => {
                lifecycle.worker = Some(handle);
                self.state.store(EngineState::Running);
                info!(device = device.name(), rules = self.registry.len(), "Blocking engine running");
                Ok(update)
            }
            Err(e) => {
                self.driver.close();
                self.fail_start(&e.to_string());
                Err(e.into())
            }
        }
    }

    fn fail_start(&self, reason: &str) {
        error!(reason, "Failed to start blocking engine");
        self.registry.clear();
        self.state.store(EngineState::Stopped);
        self.notifier.blocking_unavailable(reason);
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        if self.state.load() == EngineState::Stopped && lifecycle.worker.is_none() {
            return;
        }

        self.state.store(EngineState::Stopping);
        self.driver.close();
        if let Some(handle) = lifecycle.worker.take() {
            if handle.thread().id() == thread::current().id() {
                debug!("Stop requested from the worker itself, not joining");
            } else if handle.join().is_err() {
                error!("Packet worker panicked");
            }
        }
        self.registry.clear();
        self.state.store(EngineState::Stopped);
        info!("Blocking engine stopped");
    }

    fn run_worker(self: Arc<Self>, device: &dyn TunnelDevice, generation: u64) {
        // A buffer shorter than the MTU would truncate forwarded packets
        let buf_len = self
            .options
            .max_packet_size
            .max(usize::from(self.driver.config().mtu));
        let mut buf = vec![0u8; buf_len];
        debug!(generation, buf_len, "Packet worker started");

        let failure = loop {
            let len = match device.read_packet(&mut buf) {
                Ok(Some(len)) => len,
                Ok(None) => continue,
                Err(e) => break e,
            };
            self.stats.record_read();
            let packet = &buf[..len];

            let action = process_packet(&self.registry, &self.options.response, packet, &self.stats);
            let written = match &action {
                PacketAction::Forward => device.write_packet(packet),
                PacketAction::Block { response, .. } => device.write_packet(response),
            };
            if let Err(e) = written {
                break e;
            }

            match action {
                PacketAction::Forward => self.stats.record_forward(),
                PacketAction::Block { domain, rule, .. } => {
                    self.stats.record_block();
                    info!(%domain, rule = %rule, "Blocked DNS query");
                    self.events.emit(BlockEvent::new(domain, format!("Blocked by {rule}")));
                }
            }
        };

        // Closed by stop() is the normal exit; anything else is a failure
        let expected = matches!(failure, TunnelError::Closed)
            && (self.state.load() != EngineState::Running
                || self.generation.load(Ordering::SeqCst) != generation);
        if expected {
            debug!(generation, "Packet worker stopped");
            return;
        }

        self.stats.record_io_error();
        error!(error = %failure, generation, "Packet loop failed");
        Self::schedule_restart(&self, generation);
    }

    fn schedule_restart(this: &Arc<Self>, generation: u64) {
        if this
            .restart_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Restart already pending");
            return;
        }

        let inner = Arc::clone(this);
        let spawned = thread::Builder::new()
            .name("focusdns-restart".into())
            .spawn(move || {
                inner.restart(generation);
                inner.restart_pending.store(false, Ordering::SeqCst);
            });
        if let Err(e) = spawned {
            this.restart_pending.store(false, Ordering::SeqCst);
            error!(error = %e, "Could not spawn restart thread");
            this.notifier.blocking_unavailable(&e.to_string());
        }
    }

    fn should_restart(&self, generation: u64) -> bool {
        self.desired.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst) == generation
            && self.session.should_remain_active()
    }

    fn restart(self: &Arc<Self>, generation: u64) {
        if self.should_restart(generation) {
            info!(backoff = ?self.options.restart_backoff, "Restarting blocking engine");
            thread::sleep(self.options.restart_backoff);
        }

        let mut lifecycle = self.lifecycle.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            // The control plane took over while we waited
            debug!("Restart cancelled");
            return;
        }
        self.stop_locked(&mut lifecycle);

        if !self.should_restart(generation) {
            info!("Blocking no longer wanted, not restarting");
            self.desired.store(false, Ordering::SeqCst);
            return;
        }

        let rules = self.last_rules.lock().clone();
        match self.start_locked(&mut lifecycle, &rules) {
            Ok(_) => self.stats.record_restart(),
            Err(e) => {
                warn!(error = %e, "Restart failed");
                self.desired.store(false, Ordering::SeqCst);
            }
        }
    }
}
