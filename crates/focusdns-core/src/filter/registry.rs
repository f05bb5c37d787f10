//! Hot-swappable rule registry
//!
//! The packet loop reads an immutable [`RuleSet`] through `ArcSwap`, so
//! classification never takes a lock and never observes a half-applied
//! update. Writers build a complete new set and swap it in.

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::critical::CriticalDomainSet;
use super::rule::{normalize_query_name, BlockRule, MatchKind, RuleError, RuleSpec};

/// Outcome of classifying a queried name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Name is on the critical allowlist
    Critical,
    /// Name matched an active rule
    Blocked(Arc<BlockRule>),
    /// No active rule matched
    Allowed,
}

impl Decision {
    /// Whether the name should be blocked
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Blocked(_))
    }
}

/// A rule entry that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRejection {
    /// Position of the entry in the submitted list
    pub index: usize,
    /// Domain as submitted
    pub domain: String,
    /// Reason for the rejection
    pub error: RuleError,
}

/// Result of a rule replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleUpdate {
    /// Entries compiled and applied
    pub applied: usize,
    /// Previous rules kept in effect because an entry for them was rejected
    pub retained: usize,
    /// Entries that could not be applied
    pub rejected: Vec<RuleRejection>,
}

impl RuleUpdate {
    /// Whether every entry was applied
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Immutable snapshot of compiled rules, indexed for lookup
///
/// Every compiled rule is kept, including several rules for the same
/// domain. A name is blocked when any active rule matches it.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Arc<BlockRule>>,
    exact: HashMap<String, Arc<BlockRule>>,
    subdomain: HashMap<String, Arc<BlockRule>>,
    keywords: Vec<Arc<BlockRule>>,
    patterns: Vec<Arc<BlockRule>>,
    active: usize,
}

impl RuleSet {
    fn from_rules(rules: Vec<Arc<BlockRule>>) -> Self {
        let mut set = Self::default();
        for rule in rules.iter().filter(|r| r.is_active()) {
            set.active += 1;
            match rule.kind() {
                MatchKind::Exact => {
                    set.exact
                        .entry(rule.domain().to_string())
                        .or_insert_with(|| Arc::clone(rule));
                }
                MatchKind::Subdomain => {
                    set.subdomain
                        .entry(rule.domain().to_string())
                        .or_insert_with(|| Arc::clone(rule));
                }
                MatchKind::Keyword => set.keywords.push(Arc::clone(rule)),
                MatchKind::Pattern => set.patterns.push(Arc::clone(rule)),
            }
        }
        set.rules = rules;
        set
    }

    /// First active rule matching a normalized name
    ///
    /// Whether any rule matches does not depend on the order of the rules;
    /// only which rule is reported does.
    pub fn find_match(&self, name: &str) -> Option<&Arc<BlockRule>> {
        if let Some(rule) = self.exact.get(name) {
            return Some(rule);
        }

        let mut rest = name;
        loop {
            if let Some(rule) = self.subdomain.get(rest) {
                return Some(rule);
            }
            match rest.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => rest = parent,
                _ => break,
            }
        }

        self.keywords
            .iter()
            .chain(self.patterns.iter())
            .find(|rule| rule.matches(name))
    }

    /// All rules, active or not, in submission order
    pub fn rules(&self) -> impl Iterator<Item = &Arc<BlockRule>> {
        self.rules.iter()
    }

    /// Rules stored for a normalized domain
    pub fn get<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a Arc<BlockRule>> + 'a {
        self.rules.iter().filter(move |rule| rule.domain() == domain)
    }

    /// Number of rules, active or not
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Number of active rules
    pub fn active_len(&self) -> usize {
        self.active
    }

    /// Whether the set holds no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Identity of a rejected entry, used to find the rules it replaces
struct RejectedKey {
    domain: String,
    kind: Option<MatchKind>,
}

impl RejectedKey {
    fn from_spec(spec: &RuleSpec) -> Self {
        Self {
            domain: spec.key(),
            kind: spec.kind().ok(),
        }
    }

    fn covers(&self, rule: &BlockRule) -> bool {
        rule.domain() == self.domain && self.kind.map_or(true, |kind| kind == rule.kind())
    }
}

/// Decides whether a queried domain should be blocked
///
/// Owns the critical allowlist (fixed at construction) and the current rule
/// snapshot (replaced wholesale at any time from any thread).
#[derive(Debug)]
pub struct DomainBlockRegistry {
    critical: CriticalDomainSet,
    rules: ArcSwap<RuleSet>,
    /// Serializes writers so each update builds on the latest snapshot
    write_lock: Mutex<()>,
}

impl Default for DomainBlockRegistry {
    fn default() -> Self {
        Self::new(CriticalDomainSet::new())
    }
}

impl DomainBlockRegistry {
    /// Create an empty registry
    pub fn new(critical: CriticalDomainSet) -> Self {
        Self {
            critical,
            rules: ArcSwap::from_pointee(RuleSet::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// The critical allowlist
    pub fn critical(&self) -> &CriticalDomainSet {
        &self.critical
    }

    /// Replace all rules
    ///
    /// Entries are compiled independently and all valid ones are kept,
    /// duplicates included. A rejected entry keeps the previous rules with
    /// the same domain and kind in effect. Everything else in the previous
    /// snapshot is discarded.
    pub fn replace_rules(&self, specs: &[RuleSpec]) -> RuleUpdate {
        let _writer = self.write_lock.lock();
        let previous = self.rules.load();

        let mut update = RuleUpdate::default();
        let mut rules = Vec::with_capacity(specs.len());
        let mut rejected_keys = Vec::new();

        for (index, spec) in specs.iter().enumerate() {
            match BlockRule::compile(spec) {
                Ok(rule) => {
                    update.applied += 1;
                    rules.push(Arc::new(rule));
                }
                Err(error) => {
                    warn!(index, domain = %spec.domain, %error, "Rejected block rule");
                    rejected_keys.push(RejectedKey::from_spec(spec));
                    update.rejected.push(RuleRejection {
                        index,
                        domain: spec.domain.clone(),
                        error,
                    });
                }
            }
        }

        if !rejected_keys.is_empty() {
            let kept: Vec<_> = previous
                .rules()
                .filter(|prev| rejected_keys.iter().any(|key| key.covers(prev)))
                .filter(|prev| !rules.iter().any(|rule| rule == *prev))
                .cloned()
                .collect();
            update.retained = kept.len();
            rules.extend(kept);
        }

        let set = RuleSet::from_rules(rules);
        info!(
            rules = set.len(),
            active = set.active_len(),
            rejected = update.rejected.len(),
            "Block rules replaced"
        );
        self.rules.store(Arc::new(set));
        update
    }

    /// Remove every rule
    pub fn clear(&self) {
        let _writer = self.write_lock.lock();
        self.rules.store(Arc::new(RuleSet::default()));
        debug!("Block rules cleared");
    }

    /// Classify a queried name
    pub fn classify(&self, domain: &str) -> Decision {
        let name = normalize_query_name(domain);
        if name.is_empty() {
            return Decision::Allowed;
        }
        if self.critical.contains(&name) {
            return Decision::Critical;
        }
        match self.rules.load().find_match(&name) {
            Some(rule) => Decision::Blocked(Arc::clone(rule)),
            None => Decision::Allowed,
        }
    }

    /// Whether a queried name should be blocked
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.classify(domain).is_blocked()
    }

    /// Current snapshot, for consistent inspection of several rules
    pub fn snapshot(&self) -> Guard<Arc<RuleSet>> {
        self.rules.load()
    }

    /// Number of rules, active or not
    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    /// Whether no rules are loaded
    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }
}
