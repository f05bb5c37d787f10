//! In-process tunnel backed by channels
//!
//! Packets injected through [`MemoryProvider::inject`] are returned by the
//! device's reads; packets the engine writes are collected and can be taken
//! with [`MemoryProvider::recv_written`]. I/O and establishment failures can
//! be scripted. Every device established by one provider shares the same
//! queues, so a restarted engine keeps reading where the old one stopped.

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{TunnelConfig, TunnelDevice, TunnelError, TunnelProvider, TunnelResult};

/// How long a read waits before reporting "no data"
const READ_TIMEOUT: Duration = Duration::from_millis(50);

enum Inbound {
    Packet(Vec<u8>),
    Fail(io::ErrorKind),
}

struct Shared {
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
    written_tx: Sender<Vec<u8>>,
    written_rx: Receiver<Vec<u8>>,
    establish_failures: Mutex<VecDeque<TunnelError>>,
    established: AtomicUsize,
    last_config: Mutex<Option<TunnelConfig>>,
    current: Mutex<Option<Arc<MemoryDevice>>>,
}

/// Provider of in-memory tunnel devices
///
/// Cloning yields another handle to the same queues.
#[derive(Clone)]
pub struct MemoryProvider {
    shared: Arc<Shared>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Create a provider with empty queues
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        let (written_tx, written_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                inbound_tx,
                inbound_rx,
                written_tx,
                written_rx,
                establish_failures: Mutex::new(VecDeque::new()),
                established: AtomicUsize::new(0),
                last_config: Mutex::new(None),
                current: Mutex::new(None),
            }),
        }
    }

    /// Queue a packet for the device to read
    pub fn inject(&self, packet: impl Into<Vec<u8>>) {
        // The provider holds a receiver, so the channel never disconnects
        let _ = self.shared.inbound_tx.send(Inbound::Packet(packet.into()));
    }

    /// Queue a read failure behind any packets already injected
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        let _ = self.shared.inbound_tx.send(Inbound::Fail(kind));
    }

    /// Make the next establishment attempt fail with `error`
    pub fn fail_next_establish(&self, error: TunnelError) {
        self.shared.establish_failures.lock().push_back(error);
    }

    /// Wait up to `timeout` for a packet written by the device's user
    pub fn recv_written(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.shared.written_rx.recv_timeout(timeout).ok()
    }

    /// Take every written packet without waiting
    pub fn drain_written(&self) -> Vec<Vec<u8>> {
        self.shared.written_rx.try_iter().collect()
    }

    /// Number of successful establishments
    pub fn establish_count(&self) -> usize {
        self.shared.established.load(Ordering::SeqCst)
    }

    /// Configuration passed to the last successful establishment
    pub fn last_config(&self) -> Option<TunnelConfig> {
        self.shared.last_config.lock().clone()
    }

    /// Whether a device is currently open
    pub fn is_open(&self) -> bool {
        self.shared
            .current
            .lock()
            .as_ref()
            .is_some_and(|d| !d.closed.load(Ordering::SeqCst))
    }
}

impl TunnelProvider for MemoryProvider {
    fn establish(&self, config: &TunnelConfig) -> TunnelResult<Arc<dyn TunnelDevice>> {
        if let Some(error) = self.shared.establish_failures.lock().pop_front() {
            return Err(error);
        }

        let (close_tx, close_rx) = crossbeam_channel::bounded(0);
        let device = Arc::new(MemoryDevice {
            name: config.name.clone(),
            inbound: self.shared.inbound_rx.clone(),
            written: self.shared.written_tx.clone(),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            closed: AtomicBool::new(false),
        });

        *self.shared.current.lock() = Some(Arc::clone(&device));
        *self.shared.last_config.lock() = Some(config.clone());
        self.shared.established.fetch_add(1, Ordering::SeqCst);
        Ok(device)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// A device created by [`MemoryProvider`]
pub struct MemoryDevice {
    name: String,
    inbound: Receiver<Inbound>,
    written: Sender<Vec<u8>>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
}

impl TunnelDevice for MemoryDevice {
    fn read_packet(&self, buf: &mut [u8]) -> TunnelResult<Option<usize>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }

        select! {
            recv(self.inbound) -> msg => match msg {
                Ok(Inbound::Packet(packet)) => {
                    let len = packet.len().min(buf.len());
                    buf[..len].copy_from_slice(&packet[..len]);
                    Ok(Some(len))
                }
                Ok(Inbound::Fail(kind)) => Err(TunnelError::Io(io::Error::new(
                    kind,
                    "injected read failure",
                ))),
                Err(_) => Err(TunnelError::Closed),
            },
            // Dropping the sender in `close` disconnects this channel
            recv(self.close_rx) -> _ => Err(TunnelError::Closed),
            default(READ_TIMEOUT) => Ok(None),
        }
    }

    fn write_packet(&self, packet: &[u8]) -> TunnelResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }
        self.written
            .send(packet.to_vec())
            .map_err(|_| TunnelError::Closed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_tx.lock().take();
    }

    fn name(&self) -> &str {
        &self.name
    }
}
