//! Linux implementation using the kernel TUN driver
//!
//! Needs `CAP_NET_ADMIN` (usually root) to create the interface and to
//! install routing rules.

mod device;
pub mod routes;

pub use device::LinuxTunDevice;
pub use routes::{CommandRunner, IpCommand, RoutePlan, SystemRunner};

use focusdns_core::tunnel::{TunnelDevice, TunnelProvider, TunnelResult};
use focusdns_core::TunnelConfig;
use std::sync::Arc;
use tracing::{info, instrument};

/// Provider of Linux TUN devices
#[derive(Clone)]
pub struct LinuxTunProvider {
    runner: Arc<dyn CommandRunner>,
}

impl Default for LinuxTunProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxTunProvider {
    /// Provider that configures routing with the system `ip` tools
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    /// Provider that runs setup commands through `runner`
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl TunnelProvider for LinuxTunProvider {
    #[instrument(skip_all, fields(interface = %config.name))]
    fn establish(&self, config: &TunnelConfig) -> TunnelResult<Arc<dyn TunnelDevice>> {
        // SAFETY: geteuid has no failure modes
        let uid = unsafe { libc::geteuid() };
        info!(uid, exclude_self = config.exclude_self, "Establishing TUN device");

        let device = LinuxTunDevice::open(config, Arc::clone(&self.runner), uid)?;
        Ok(Arc::new(device))
    }

    fn name(&self) -> &'static str {
        "linux-tun"
    }
}
