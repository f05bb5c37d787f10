//! Error types for focusdns-core
//!
//! Centralized error handling using `thiserror`. Per-rule configuration
//! problems live in [`crate::filter::RuleError`] and tunnel failures in
//! [`crate::tunnel::TunnelError`]; both convert into [`Error`].

use crate::engine::EngineState;
use crate::filter::RuleError;
use crate::tunnel::TunnelError;
use thiserror::Error;

/// Main error type for focusdns-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Packet parsing failed
    #[error("Packet parsing error: {message}")]
    PacketParse {
        /// Detailed error message
        message: String,
        /// Offset in packet where error occurred
        offset: Option<usize>,
    },

    /// Packet is too small to process
    #[error("Packet too small: expected at least {expected} bytes, got {actual}")]
    PacketTooSmall {
        /// Minimum expected size
        expected: usize,
        /// Actual packet size
        actual: usize,
    },

    /// Response synthesis failed
    #[error("Failed to build response packet: {0}")]
    PacketBuild(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// A single block rule was rejected
    #[error("Invalid block rule: {0}")]
    Rule(#[from] RuleError),

    /// Virtual interface failure
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Lifecycle operation not allowed in the current state
    #[error("Operation '{operation}' not allowed while engine is {state}")]
    InvalidState {
        /// Requested operation
        operation: &'static str,
        /// State the engine was in
        state: EngineState,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a packet parse error
    pub fn packet_parse(message: impl Into<String>) -> Self {
        Self::PacketParse {
            message: message.into(),
            offset: None,
        }
    }

    /// Create a packet parse error with offset
    pub fn packet_parse_at(message: impl Into<String>, offset: usize) -> Self {
        Self::PacketParse {
            message: message.into(),
            offset: Some(offset),
        }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether this error only concerns a single packet and the packet
    /// should simply be forwarded
    pub fn is_packet_local(&self) -> bool {
        matches!(
            self,
            Self::PacketParse { .. } | Self::PacketTooSmall { .. } | Self::PacketBuild(_)
        )
    }
}
