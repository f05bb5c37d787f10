//! Block rule definitions
//!
//! [`RuleSpec`] is the raw entry as it arrives from configuration.
//! [`BlockRule`] is the validated, compiled form held by the registry.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Compiled size limit for pattern rules
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// How a rule's domain is compared against a queried name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Identical name only
    Exact,
    /// The name itself and every name below it
    Subdomain,
    /// Regular expression over the whole name
    Pattern,
    /// Substring anywhere in the name
    Keyword,
}

impl MatchKind {
    /// All kinds, in evaluation order
    pub const ALL: [MatchKind; 4] = [
        MatchKind::Exact,
        MatchKind::Subdomain,
        MatchKind::Keyword,
        MatchKind::Pattern,
    ];

    /// Lowercase name used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Subdomain => "subdomain",
            MatchKind::Pattern => "pattern",
            MatchKind::Keyword => "keyword",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchKind::Exact),
            "subdomain" | "wildcard" => Ok(MatchKind::Subdomain),
            "pattern" | "regex" => Ok(MatchKind::Pattern),
            "keyword" | "contains" => Ok(MatchKind::Keyword),
            _ => Err(RuleError::UnknownMatchKind(s.to_string())),
        }
    }
}

/// Why a single rule entry was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Domain was empty after normalization
    #[error("domain is empty")]
    EmptyDomain,

    /// Domain contains characters that never appear in a DNS name
    #[error("invalid domain '{0}'")]
    InvalidDomain(String),

    /// The match kind string was not recognized
    #[error("unknown match kind '{0}'")]
    UnknownMatchKind(String),

    /// A pattern rule carried no pattern
    #[error("pattern rule has no pattern")]
    MissingPattern,

    /// The pattern did not compile
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Pattern as given
        pattern: String,
        /// Compiler message
        message: String,
    },
}

fn default_active() -> bool {
    true
}

/// A block rule entry as supplied by configuration
///
/// Accepts both `block_type` and `blockType` for the match kind. Unknown
/// kinds and a missing domain are reported per entry when the rule is
/// compiled rather than failing the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Domain, keyword or rule label
    #[serde(default)]
    pub domain: String,

    /// Match kind name (`exact`, `subdomain`, `pattern`, `keyword`)
    #[serde(default, alias = "blockType", skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,

    /// Regular expression for pattern rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Inactive rules are kept but never match
    #[serde(default = "default_active")]
    pub active: bool,
}

impl RuleSpec {
    /// Create an active rule entry
    pub fn new(domain: impl Into<String>, kind: MatchKind) -> Self {
        Self {
            domain: domain.into(),
            block_type: Some(kind.as_str().to_string()),
            pattern: None,
            active: true,
        }
    }

    /// Create an active pattern rule entry
    pub fn pattern(label: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::new(label, MatchKind::Pattern)
        }
    }

    /// Set the active flag
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Normalized domain the entry applies to
    pub fn key(&self) -> String {
        normalize_rule_domain(&self.domain)
    }

    /// Match kind of the entry
    ///
    /// Without an explicit kind, `*.example.com` is a subdomain rule and
    /// anything else an exact rule.
    pub fn kind(&self) -> Result<MatchKind, RuleError> {
        match self.block_type.as_deref() {
            Some(kind) => kind.parse(),
            None if self.domain.trim().starts_with("*.") => Ok(MatchKind::Subdomain),
            None => Ok(MatchKind::Exact),
        }
    }
}

/// A validated block rule
#[derive(Debug, Clone)]
pub struct BlockRule {
    domain: String,
    kind: MatchKind,
    pattern: Option<Regex>,
    active: bool,
}

impl BlockRule {
    /// Compile a configuration entry
    pub fn compile(spec: &RuleSpec) -> Result<Self, RuleError> {
        let kind = spec.kind()?;

        let domain = normalize_rule_domain(&spec.domain);
        if domain.is_empty() {
            return Err(RuleError::EmptyDomain);
        }
        if kind != MatchKind::Pattern && !is_valid_name(&domain) {
            return Err(RuleError::InvalidDomain(spec.domain.clone()));
        }

        let pattern = if kind == MatchKind::Pattern {
            let source = spec
                .pattern
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or(RuleError::MissingPattern)?;
            let regex = RegexBuilder::new(source)
                .case_insensitive(true)
                .size_limit(PATTERN_SIZE_LIMIT)
                .build()
                .map_err(|e| RuleError::InvalidPattern {
                    pattern: source.to_string(),
                    message: e.to_string(),
                })?;
            Some(regex)
        } else {
            None
        };

        Ok(Self {
            domain,
            kind,
            pattern,
            active: spec.active,
        })
    }

    /// Active exact rule
    pub fn exact(domain: &str) -> Result<Self, RuleError> {
        Self::compile(&RuleSpec::new(domain, MatchKind::Exact))
    }

    /// Active subdomain rule
    pub fn subdomain(domain: &str) -> Result<Self, RuleError> {
        Self::compile(&RuleSpec::new(domain, MatchKind::Subdomain))
    }

    /// Active keyword rule
    pub fn keyword(keyword: &str) -> Result<Self, RuleError> {
        Self::compile(&RuleSpec::new(keyword, MatchKind::Keyword))
    }

    /// Normalized domain (or keyword, or label for pattern rules)
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Match kind
    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// Whether the rule takes part in matching
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Regex source of a pattern rule
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    /// Test a normalized name against this rule, ignoring the active flag
    pub fn matches(&self, name: &str) -> bool {
        match self.kind {
            MatchKind::Exact => name == self.domain,
            MatchKind::Subdomain => is_same_or_subdomain(name, &self.domain),
            MatchKind::Keyword => name.contains(self.domain.as_str()),
            MatchKind::Pattern => self.pattern.as_ref().is_some_and(|re| re.is_match(name)),
        }
    }

    /// Convert back into a configuration entry
    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            domain: self.domain.clone(),
            block_type: Some(self.kind.as_str().to_string()),
            pattern: self.pattern().map(str::to_string),
            active: self.active,
        }
    }
}

impl PartialEq for BlockRule {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.kind == other.kind
            && self.active == other.active
            && self.pattern() == other.pattern()
    }
}

impl Eq for BlockRule {}

impl fmt::Display for BlockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pattern() {
            Some(pattern) => write!(f, "pattern rule '{}' (/{pattern}/)", self.domain),
            None => write!(f, "{} rule '{}'", self.kind, self.domain),
        }
    }
}

/// Whether `name` equals `domain` or ends with `.` + `domain`
pub fn is_same_or_subdomain(name: &str, domain: &str) -> bool {
    match name.strip_suffix(domain) {
        Some("") => true,
        Some(prefix) => prefix.ends_with('.'),
        None => false,
    }
}

/// Normalize a name from a DNS query: lowercase, trimmed, no root dot
pub fn normalize_query_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Normalize a configured domain
///
/// Lowercases and trims the input, then strips a URL scheme, any path,
/// query or fragment, a `:port` suffix, a leading `*.` and a trailing dot.
pub fn normalize_rule_domain(input: &str) -> String {
    let mut s = input.trim();

    if let Some((_, rest)) = s.split_once("://") {
        s = rest;
    }
    if let Some(end) = s.find(&['/', '?', '#'][..]) {
        s = &s[..end];
    }
    // Userinfo never names the host
    if let Some((_, host)) = s.rsplit_once('@') {
        s = host;
    }
    if let Some((host, port)) = s.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            s = host;
        }
    }
    let s = s.strip_prefix("*.").unwrap_or(s);

    s.trim_end_matches('.').to_ascii_lowercase()
}

fn is_valid_name(domain: &str) -> bool {
    domain.len() <= 253
        && domain
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_kind_parse() {
        assert_eq!("Exact".parse::<MatchKind>().unwrap(), MatchKind::Exact);
        assert_eq!("SUBDOMAIN".parse::<MatchKind>().unwrap(), MatchKind::Subdomain);
        assert_eq!("regex".parse::<MatchKind>().unwrap(), MatchKind::Pattern);
        assert_eq!(" keyword ".parse::<MatchKind>().unwrap(), MatchKind::Keyword);
        assert_eq!(
            "prefix".parse::<MatchKind>(),
            Err(RuleError::UnknownMatchKind("prefix".into()))
        );
    }

    #[test]
    fn test_normalize_rule_domain() {
        assert_eq!(normalize_rule_domain("Example.COM"), "example.com");
        assert_eq!(normalize_rule_domain("https://www.example.com/path?q=1"), "www.example.com");
        assert_eq!(normalize_rule_domain("example.com:8080"), "example.com");
        assert_eq!(normalize_rule_domain("*.example.com"), "example.com");
        assert_eq!(normalize_rule_domain("  example.com.  "), "example.com");
        assert_eq!(normalize_rule_domain("http://user@example.com"), "example.com");
        assert_eq!(normalize_rule_domain(""), "");
    }

    #[test]
    fn test_subdomain_boundary() {
        assert!(is_same_or_subdomain("example.com", "example.com"));
        assert!(is_same_or_subdomain("a.b.example.com", "example.com"));
        assert!(!is_same_or_subdomain("notexample.com", "example.com"));
        assert!(!is_same_or_subdomain("example.com.evil", "example.com"));
    }

    #[test]
    fn test_compile_each_kind() {
        let exact = BlockRule::exact("video.example").unwrap();
        assert!(exact.matches("video.example"));
        assert!(!exact.matches("cdn.video.example"));

        let sub = BlockRule::subdomain("example.com").unwrap();
        assert!(sub.matches("www.example.com"));
        assert!(!sub.matches("notexample.com"));

        let kw = BlockRule::keyword("tiktok").unwrap();
        assert!(kw.matches("v16.tiktokcdn.com"));
        assert!(!kw.matches("example.com"));

        let pat = BlockRule::compile(&RuleSpec::pattern("shorts", r"^(m\.)?shorts\.")).unwrap();
        assert!(pat.matches("shorts.example"));
        assert!(pat.matches("m.shorts.example"));
        assert!(!pat.matches("example.shorts"));
    }

    #[test]
    fn test_wildcard_without_kind_is_subdomain() {
        let spec = RuleSpec {
            domain: "*.reddit.com".into(),
            block_type: None,
            pattern: None,
            active: true,
        };
        let rule = BlockRule::compile(&spec).unwrap();
        assert_eq!(rule.kind(), MatchKind::Subdomain);
        assert_eq!(rule.domain(), "reddit.com");

        let plain = RuleSpec { domain: "reddit.com".into(), ..spec };
        assert_eq!(BlockRule::compile(&plain).unwrap().kind(), MatchKind::Exact);
    }

    #[test]
    fn test_compile_rejections() {
        assert_eq!(
            BlockRule::compile(&RuleSpec::new("  ", MatchKind::Exact)),
            Err(RuleError::EmptyDomain)
        );
        assert!(matches!(
            BlockRule::compile(&RuleSpec::new("bad domain", MatchKind::Exact)),
            Err(RuleError::InvalidDomain(_))
        ));
        assert_eq!(
            BlockRule::compile(&RuleSpec::new("x", MatchKind::Pattern)),
            Err(RuleError::MissingPattern)
        );
        assert!(matches!(
            BlockRule::compile(&RuleSpec::pattern("x", "(unclosed")),
            Err(RuleError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_spec_deserialize_camel_case() {
        let json = r#"{"domain": "Example.com", "blockType": "SUBDOMAIN"}"#;
        let spec: RuleSpec = serde_json::from_str(json).unwrap();
        assert!(spec.active);
        assert_eq!(spec.block_type.as_deref(), Some("SUBDOMAIN"));

        let rule = BlockRule::compile(&spec).unwrap();
        assert_eq!(rule.to_spec(), RuleSpec::new("example.com", MatchKind::Subdomain));
    }

    #[test]
    fn test_rule_display() {
        let rule = BlockRule::subdomain("example.com").unwrap();
        assert_eq!(rule.to_string(), "subdomain rule 'example.com'");
    }
}
