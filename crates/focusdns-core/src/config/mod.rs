//! Configuration management for focusdns
//!
//! A strongly-typed TOML configuration covering the engine, the tunnel, the
//! critical allowlist, logging and the block rules themselves. Rules can
//! also live in a separate JSON or TOML rules file.

use crate::engine::{EngineOptions, DEFAULT_EVENT_QUEUE_CAPACITY};
use crate::error::{Error, Result};
use crate::filter::{BlockRule, RuleRejection, RuleSpec};
use crate::packet::{ResponseOptions, MAX_PACKET_SIZE};
use crate::tunnel::TunnelConfig;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Smallest packet every IPv4 host must accept
const MIN_PACKET_SIZE: usize = 576;

/// Longest interface name on Linux (IFNAMSIZ - 1)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Largest TTL allowed by RFC 2181
const MAX_RESPONSE_TTL: u32 = i32::MAX as u32;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General application settings
    pub general: GeneralConfig,

    /// Engine tuning
    pub engine: EngineConfig,

    /// Virtual interface settings
    pub tunnel: TunnelConfig,

    /// Critical allowlist additions
    pub critical: CriticalConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Block rules
    pub rules: Vec<RuleSpec>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate the configuration
    ///
    /// Individual rules are not checked here; see [`Config::check_rules`].
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.event_queue_capacity == 0 {
            return Err(Error::config_value(
                "engine.event_queue_capacity",
                "Must be at least 1",
            ));
        }
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&engine.max_packet_size) {
            return Err(Error::config_value(
                "engine.max_packet_size",
                format!("Must be between {MIN_PACKET_SIZE} and {MAX_PACKET_SIZE}"),
            ));
        }
        if engine.response_ttl_secs > MAX_RESPONSE_TTL {
            return Err(Error::config_value(
                "engine.response_ttl_secs",
                format!("Must be at most {MAX_RESPONSE_TTL}"),
            ));
        }

        let tunnel = &self.tunnel;
        if tunnel.name.is_empty() || tunnel.name.len() > MAX_INTERFACE_NAME_LEN {
            return Err(Error::config_value(
                "tunnel.name",
                format!("Must be 1-{MAX_INTERFACE_NAME_LEN} characters"),
            ));
        }
        if tunnel.prefix_len > 32 {
            return Err(Error::config_value("tunnel.prefix_len", "Must be 0-32"));
        }
        if usize::from(tunnel.mtu) < MIN_PACKET_SIZE {
            return Err(Error::config_value(
                "tunnel.mtu",
                format!("Must be at least {MIN_PACKET_SIZE}"),
            ));
        }
        if engine.max_packet_size < usize::from(tunnel.mtu) {
            return Err(Error::config_value(
                "engine.max_packet_size",
                format!("Must be at least tunnel.mtu ({})", tunnel.mtu),
            ));
        }
        if tunnel.routes.is_empty() {
            return Err(Error::config_value(
                "tunnel.routes",
                "At least one route is required",
            ));
        }

        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(Error::config_value(
                "logging.level",
                format!("Unknown level '{}'", self.logging.level),
            ));
        }

        Ok(())
    }

    /// Compile every rule and report the ones that would be rejected
    pub fn check_rules(&self) -> Vec<RuleRejection> {
        check_rules(&self.rules)
    }
}

/// Compile `rules` without applying them and report rejections
pub fn check_rules(rules: &[RuleSpec]) -> Vec<RuleRejection> {
    rules
        .iter()
        .enumerate()
        .filter_map(|(index, spec)| {
            BlockRule::compile(spec).err().map(|error| RuleRejection {
                index,
                domain: spec.domain.clone(),
                error,
            })
        })
        .collect()
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Profile name
    pub name: String,
    /// Default focus session length in minutes (0 = until interrupted)
    pub session_minutes: u64,
    /// Seconds between checks of the rules file for changes
    pub reload_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            session_minutes: 0,
            reload_interval_secs: 2,
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before restarting after a tunnel failure, in milliseconds
    pub restart_backoff_ms: u64,
    /// Capacity of the blocked-event queue
    pub event_queue_capacity: usize,
    /// TTL of spoofed answers in seconds
    pub response_ttl_secs: u32,
    /// Address blocked names resolve to
    pub sinkhole_address: Ipv4Addr,
    /// Read buffer size
    pub max_packet_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = EngineOptions::default();
        Self {
            restart_backoff_ms: 2000,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            response_ttl_secs: defaults.response.ttl,
            sinkhole_address: defaults.response.sinkhole,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            restart_backoff: Duration::from_millis(config.restart_backoff_ms),
            event_queue_capacity: config.event_queue_capacity,
            response: ResponseOptions {
                ttl: config.response_ttl_secs,
                sinkhole: config.sinkhole_address,
            },
            max_packet_size: config.max_packet_size,
        }
    }
}

/// Critical allowlist additions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalConfig {
    /// Domains added to the built-in critical set
    pub extra_domains: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log file path (None = stderr only)
    pub file: Option<String>,
    /// Enable JSON format logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json_format: false,
        }
    }
}

/// Standalone rules file contents
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RulesDocument {
    List(Vec<RuleSpec>),
    Table {
        #[serde(default)]
        rules: Vec<RuleSpec>,
    },
}

impl From<RulesDocument> for Vec<RuleSpec> {
    fn from(doc: RulesDocument) -> Self {
        match doc {
            RulesDocument::List(rules) | RulesDocument::Table { rules } => rules,
        }
    }
}

/// Parse rules from JSON: a list of rules or `{"rules": [...]}`
pub fn rules_from_json(content: &str) -> Result<Vec<RuleSpec>> {
    let doc: RulesDocument = serde_json::from_str(content)?;
    Ok(doc.into())
}

/// Parse rules from TOML: `[[rules]]` tables
pub fn rules_from_toml(content: &str) -> Result<Vec<RuleSpec>> {
    let doc: RulesDocument = toml::from_str(content)?;
    Ok(doc.into())
}

/// Load a rules file, choosing the format by extension (`.json` or TOML)
pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<Vec<RuleSpec>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
        path: path.display().to_string(),
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        rules_from_json(&content)
    } else {
        rules_from_toml(&content)
    }
}
