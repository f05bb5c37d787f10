//! Virtual network interface abstraction
//!
//! The engine talks to the interface through two traits: a
//! [`TunnelProvider`] that establishes a device from a [`TunnelConfig`],
//! and the [`TunnelDevice`] itself, which reads and writes one raw IPv4
//! packet at a time. [`TunnelDriver`] tracks the lifecycle of the current
//! device.
//!
//! Platform implementations live in `focusdns-platform`; an in-process
//! device for tests lives in [`memory`].

pub mod memory;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Tunnel failures
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The platform refused to create or configure the interface
    #[error("failed to establish tunnel: {0}")]
    Establish(String),

    /// Insufficient privileges to create or configure the interface
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Read or write failure on an open interface
    #[error("tunnel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The interface was closed
    #[error("tunnel is closed")]
    Closed,
}

impl TunnelError {
    /// Whether this error happened while establishing the interface
    pub fn is_establish_error(&self) -> bool {
        matches!(self, Self::Establish(_) | Self::PermissionDenied(_))
    }
}

/// Result type for tunnel operations
pub type TunnelResult<T> = std::result::Result<T, TunnelError>;

/// An open virtual network interface
///
/// `read_packet` blocks until a packet arrives, the device is closed, or the
/// implementation decides to return `Ok(None)` ("no data yet", not an
/// error). `close` may be called from any thread and must unblock a pending
/// read, which then returns [`TunnelError::Closed`].
pub trait TunnelDevice: Send + Sync {
    /// Read one packet into `buf`, returning its length
    fn read_packet(&self, buf: &mut [u8]) -> TunnelResult<Option<usize>>;

    /// Write one packet
    fn write_packet(&self, packet: &[u8]) -> TunnelResult<()>;

    /// Close the interface and release everything installed for it
    fn close(&self);

    /// Interface name
    fn name(&self) -> &str;
}

/// Creates virtual network interfaces
pub trait TunnelProvider: Send + Sync {
    /// Establish an interface; failures are terminal for this attempt
    fn establish(&self, config: &TunnelConfig) -> TunnelResult<Arc<dyn TunnelDevice>>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// An IPv4 route in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteSpec {
    /// Network address
    pub network: Ipv4Addr,
    /// Prefix length (0-32)
    pub prefix_len: u8,
}

impl RouteSpec {
    /// The catch-all route `0.0.0.0/0`
    pub const DEFAULT: RouteSpec = RouteSpec {
        network: Ipv4Addr::UNSPECIFIED,
        prefix_len: 0,
    };

    /// Create a route, masking host bits off the network address
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let mask = prefix_mask(prefix_len);
        Self {
            network: Ipv4Addr::from(u32::from(network) & mask),
            prefix_len,
        }
    }

    /// Whether `addr` lies inside this route
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & prefix_mask(self.prefix_len) == u32::from(self.network)
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        n => u32::MAX << (32 - u32::from(n.min(32))),
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for RouteSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s.split_once('/').unwrap_or((s, "32"));
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("invalid route address '{addr}'"))?;
        let prefix_len: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| format!("invalid prefix length '{prefix}'"))?;
        Ok(Self::new(network, prefix_len))
    }
}

impl TryFrom<String> for RouteSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RouteSpec> for String {
    fn from(route: RouteSpec) -> Self {
        route.to_string()
    }
}

/// Interface settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Interface name
    pub name: String,
    /// Private address assigned to the interface
    pub address: Ipv4Addr,
    /// Prefix length of the interface address
    pub prefix_len: u8,
    /// Routes sent through the interface
    pub routes: Vec<RouteSpec>,
    /// DNS servers configured for the interface
    pub dns_servers: Vec<Ipv4Addr>,
    /// Interface MTU
    pub mtu: u16,
    /// Keep this process's own traffic off the tunnel
    pub exclude_self: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            name: "focusdns0".to_string(),
            address: Ipv4Addr::new(10, 0, 0, 1),
            prefix_len: 32,
            routes: vec![RouteSpec::DEFAULT],
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            mtu: 1500,
            exclude_self: true,
        }
    }
}

/// Lifecycle of the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// No interface
    Closed,
    /// Establishment in progress
    Establishing,
    /// Interface open
    Open,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Closed => "Closed",
            TunnelState::Establishing => "Establishing",
            TunnelState::Open => "Open",
        };
        f.write_str(s)
    }
}

struct DriverInner {
    state: TunnelState,
    device: Option<Arc<dyn TunnelDevice>>,
}

/// Owns the provider and the currently open device
///
/// Establishment is attempted exactly once per call; retry policy belongs
/// to the caller.
pub struct TunnelDriver {
    provider: Arc<dyn TunnelProvider>,
    config: TunnelConfig,
    inner: Mutex<DriverInner>,
}

impl fmt::Debug for TunnelDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelDriver")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl TunnelDriver {
    /// Create a driver with no open device
    pub fn new(provider: Arc<dyn TunnelProvider>, config: TunnelConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(DriverInner {
                state: TunnelState::Closed,
                device: None,
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> TunnelState {
        self.inner.lock().state
    }

    /// Interface settings
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// The open device, if any
    pub fn device(&self) -> Option<Arc<dyn TunnelDevice>> {
        self.inner.lock().device.clone()
    }

    /// Establish the interface
    ///
    /// Only valid while closed. The state lock is not held across the
    /// provider call, so `close` stays responsive.
    #[instrument(skip(self), fields(provider = self.provider.name(), name = %self.config.name))]
    pub fn establish(&self) -> TunnelResult<Arc<dyn TunnelDevice>> {
        {
            let mut inner = self.inner.lock();
            if inner.state != TunnelState::Closed {
                return Err(TunnelError::Establish(format!(
                    "tunnel is already {}",
                    inner.state
                )));
            }
            inner.state = TunnelState::Establishing;
        }

        match self.provider.establish(&self.config) {
            Ok(device) => {
                let mut inner = self.inner.lock();
                if inner.state != TunnelState::Establishing {
                    // Closed while establishing
                    drop(inner);
                    device.close();
                    return Err(TunnelError::Closed);
                }
                inner.state = TunnelState::Open;
                inner.device = Some(Arc::clone(&device));
                info!(device = device.name(), "Tunnel established");
                Ok(device)
            }
            Err(e) => {
                warn!(error = %e, "Tunnel establishment failed");
                self.inner.lock().state = TunnelState::Closed;
                Err(e)
            }
        }
    }

    /// Close the open device, unblocking any pending read
    pub fn close(&self) {
        let device = {
            let mut inner = self.inner.lock();
            inner.state = TunnelState::Closed;
            inner.device.take()
        };
        if let Some(device) = device {
            debug!(device = device.name(), "Closing tunnel");
            device.close();
        }
    }
}

impl Drop for TunnelDriver {
    fn drop(&mut self) {
        self.close();
    }
}
