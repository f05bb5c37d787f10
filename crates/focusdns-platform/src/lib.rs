//! focusdns Platform Layer
//!
//! This crate provides the virtual network interface the blocking engine
//! reads from.
//!
//! ## Supported Platforms
//!
//! - **Linux**: kernel TUN driver with policy routing
//! - **Others**: an [`UnsupportedProvider`] whose establishment fails

#![warn(missing_docs)]
#![warn(clippy::all)]

use focusdns_core::TunnelProvider;
use std::sync::Arc;

mod error;
pub use error::{PlatformError, Result};

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::LinuxTunProvider;

mod unsupported;
pub use unsupported::UnsupportedProvider;

/// Tunnel provider for the current operating system
pub fn default_provider() -> Arc<dyn TunnelProvider> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(LinuxTunProvider::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedProvider)
    }
}

/// Whether the current operating system has a TUN backend
pub const fn is_supported() -> bool {
    cfg!(target_os = "linux")
}
