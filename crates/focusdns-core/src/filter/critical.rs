//! Domains that are never blocked
//!
//! Blocking these would break name resolution, certificate validation,
//! time sync or system updates, so they are checked before any rule.

use std::collections::BTreeSet;

use super::rule::normalize_rule_domain;

/// Built-in infrastructure domains
pub const DEFAULT_CRITICAL_DOMAINS: &[&str] = &[
    "localhost",
    // Connectivity checks and platform APIs
    "connectivitycheck.gstatic.com",
    "gstatic.com",
    "googleapis.com",
    "android.com",
    "gvt1.com",
    // DNS resolvers
    "dns.google",
    "cloudflare-dns.com",
    // Certificate validation
    "pki.goog",
    "letsencrypt.org",
    "lencr.org",
    "digicert.com",
    // Time
    "ntp.org",
    "time.google.com",
    // OS updates
    "ubuntu.com",
    "debian.org",
    "fedoraproject.org",
    "archlinux.org",
];

/// Immutable allowlist consulted before every rule
///
/// A name is critical when it equals an entry or is a subdomain of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalDomainSet {
    domains: BTreeSet<String>,
}

impl Default for CriticalDomainSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalDomainSet {
    /// Create the set with the built-in defaults
    pub fn new() -> Self {
        Self::with_extra(std::iter::empty::<&str>())
    }

    /// Create the set with the built-in defaults plus `extra`
    ///
    /// Extra entries are normalized like rule domains; empty ones are
    /// ignored.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = DEFAULT_CRITICAL_DOMAINS
            .iter()
            .map(|d| (*d).to_string())
            .chain(extra.into_iter().map(|d| normalize_rule_domain(d.as_ref())))
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    /// Whether `name` (already normalized) is critical
    pub fn contains(&self, name: &str) -> bool {
        // Walk every dot-boundary suffix: a.b.c, b.c, c
        let mut rest = name;
        loop {
            if self.domains.contains(rest) {
                return true;
            }
            match rest.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => rest = parent,
                _ => return false,
            }
        }
    }

    /// Iterate over the entries in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
