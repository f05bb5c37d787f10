//! Fallback for operating systems without a virtual interface backend

use crate::error::PlatformError;
use focusdns_core::tunnel::{TunnelDevice, TunnelProvider, TunnelResult};
use focusdns_core::TunnelConfig;
use std::sync::Arc;
use tracing::warn;

/// Provider whose establishment always fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedProvider;

impl TunnelProvider for UnsupportedProvider {
    fn establish(&self, _config: &TunnelConfig) -> TunnelResult<Arc<dyn TunnelDevice>> {
        warn!(os = std::env::consts::OS, "No TUN backend for this platform");
        Err(PlatformError::Unsupported(std::env::consts::OS).into())
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}
