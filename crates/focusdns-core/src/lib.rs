//! # focusdns Core
//!
//! Platform-independent core of a DNS-level website blocker.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Packet codec** - IPv4/UDP/DNS parsing and spoofed answer synthesis
//! - **Rule registry** - Hot-swappable block rules with a critical allowlist
//! - **Tunnel abstraction** - Provider/device traits for the virtual interface
//! - **Blocking engine** - Packet loop, blocked events and automatic restart
//! - **Configuration** - TOML configuration and JSON/TOML rules files
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use focusdns_core::filter::{MatchKind, RuleSpec};
//! use focusdns_core::tunnel::memory::MemoryProvider;
//! use focusdns_core::{BlockingEngine, Config};
//!
//! let config = Config::load("focusdns.toml")?;
//! let engine = BlockingEngine::builder(Arc::new(MemoryProvider::new()))
//!     .with_config(&config)
//!     .build()?;
//!
//! let update = engine.start(vec![RuleSpec::new("video.example", MatchKind::Subdomain)])?;
//! assert!(update.is_clean());
//! # Ok::<(), focusdns_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod packet;
pub mod tunnel;

// Re-exports for convenience
pub use config::Config;
pub use engine::{BlockEvent, BlockNotifier, BlockingEngine, EngineState, SessionMonitor};
pub use error::{Error, Result};
pub use filter::{DomainBlockRegistry, RuleSpec, RuleUpdate};
pub use tunnel::{TunnelConfig, TunnelDevice, TunnelDriver, TunnelError, TunnelProvider};
