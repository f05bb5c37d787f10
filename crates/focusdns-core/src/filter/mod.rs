//! Domain blocking rules
//!
//! This module decides whether a queried name should be blocked:
//! - Critical infrastructure domains are never blocked
//! - Exact, subdomain, keyword and regex pattern rules
//! - Lock-free reads with atomic wholesale replacement
//! - Per-entry rejection of malformed configuration

mod critical;
mod registry;
mod rule;

pub use critical::{CriticalDomainSet, DEFAULT_CRITICAL_DOMAINS};
pub use registry::{Decision, DomainBlockRegistry, RuleRejection, RuleSet, RuleUpdate};
pub use rule::{
    is_same_or_subdomain, normalize_query_name, normalize_rule_domain, BlockRule, MatchKind,
    RuleError, RuleSpec,
};
