//! Domain policy store
//!
//! Builds every policy group from `capability.policy.*` preferences and
//! maps origins to groups. Site patterns are kept in buckets keyed by the
//! last two host labels (or `scheme:` for scheme-only patterns); within a
//! bucket, more specific patterns come first.
//!
//! A database is immutable once built. The engine swaps in a new one with a
//! higher generation when configuration changes.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Write;
use hashbrown::HashMap;

use crate::atom::AtomTable;
use crate::capability::CapabilityTable;
use crate::policy::{AccessMode, DomainPolicy, SecurityLevel, DEFAULT_GROUP};
use crate::prefs::{split_list, Preferences, POLICY_PREFIX};

/// `capability.policy.policynames`
pub const POLICY_NAMES: &str = "capability.policy.policynames";
/// `capability.policy.default_policynames`
pub const DEFAULT_POLICY_NAMES: &str = "capability.policy.default_policynames";

/// One site pattern and the group it selects.
#[derive(Debug, Clone)]
pub struct DomainEntry {
    pattern: String,
    policy: Arc<DomainPolicy>,
}

impl DomainEntry {
    /// Create an entry.
    pub fn new(pattern: &str, policy: Arc<DomainPolicy>) -> Self {
        Self {
            pattern: pattern.to_string(),
            policy,
        }
    }

    /// Site pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Selected group.
    pub fn policy(&self) -> &Arc<DomainPolicy> {
        &self.policy
    }

    /// Whether the pattern matches an origin.
    ///
    /// A pattern ending in `:` matches every origin of that scheme. Any
    /// other pattern must be a suffix of the origin (or of the origin with
    /// its port or path removed) starting at a `.`, `:` or `/` boundary.
    pub fn matches(&self, origin: &str) -> bool {
        let pattern = self.pattern.as_str();
        if pattern.ends_with(':') {
            return origin.len() >= pattern.len()
                && origin.as_bytes()[..pattern.len()].eq_ignore_ascii_case(pattern.as_bytes());
        }
        suffix_matches(origin, pattern) || suffix_matches(strip_port_and_path(origin), pattern)
    }
}

fn suffix_matches(origin: &str, pattern: &str) -> bool {
    if !origin.ends_with(pattern) {
        return false;
    }
    let start = origin.len() - pattern.len();
    if start == 0 {
        return true;
    }
    matches!(origin.as_bytes()[start - 1], b'.' | b':' | b'/')
}

/// Offset of the host in an origin or pattern.
fn host_start(text: &str) -> usize {
    text.find("://").map(|pos| pos + 3).unwrap_or(0)
}

/// Origin with any port or path after the host removed.
fn strip_port_and_path(origin: &str) -> &str {
    let start = host_start(origin);
    let host = &origin[start..];
    // Bracketed IPv6 literals carry their own colons.
    let skip = if host.starts_with('[') {
        host.find(']').map_or(0, |pos| pos + 1)
    } else {
        0
    };
    match host[skip..].find([':', '/']) {
        Some(end) => &origin[..start + skip + end],
        None => origin,
    }
}

/// Origin cut at its third slash.
fn truncate_origin(origin: &str) -> &str {
    match origin.match_indices('/').nth(2) {
        Some((pos, _)) => &origin[..pos],
        None => origin,
    }
}

/// Bucket key of an origin or site pattern: the last two labels of the
/// host, or `scheme:` for a scheme-only pattern.
pub fn bucket_key(text: &str) -> String {
    if text.ends_with(':') && !text.contains('/') {
        return text.to_ascii_lowercase();
    }
    let host = &strip_port_and_path(text)[host_start(text)..];
    let mut labels = host.rsplitn(3, '.');
    let last = labels.next().unwrap_or("");
    match labels.next() {
        Some(second) => format!("{}.{}", second, last),
        None => last.to_string(),
    }
}

/// Scheme key of an origin, `scheme:`.
fn scheme_key(origin: &str) -> Option<String> {
    origin
        .find(':')
        .map(|pos| origin[..=pos].to_ascii_lowercase())
}

/// All policy groups and the origin map.
#[derive(Debug)]
pub struct PolicyDatabase {
    generation: u64,
    default_policy: Arc<DomainPolicy>,
    groups: Vec<Arc<DomainPolicy>>,
    buckets: HashMap<String, Vec<DomainEntry>>,
}

impl PolicyDatabase {
    /// Database with only an empty default group.
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            default_policy: Arc::new(DomainPolicy::new(DEFAULT_GROUP, generation)),
            groups: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    /// Build every group from preferences.
    pub fn build(prefs: &Preferences, capabilities: &mut CapabilityTable, generation: u64) -> Self {
        let mut atoms = AtomTable::new();

        let mut default_policy = DomainPolicy::new(DEFAULT_GROUP, generation);
        populate_group(&mut default_policy, prefs, &mut atoms, capabilities);

        let mut db = Self {
            generation,
            default_policy: Arc::new(default_policy),
            groups: Vec::new(),
            buckets: HashMap::new(),
        };

        let names = format!(
            "{} {}",
            prefs.get_str(POLICY_NAMES).unwrap_or(""),
            prefs.get_str(DEFAULT_POLICY_NAMES).unwrap_or("")
        );

        for name in split_list(&names) {
            if name == DEFAULT_GROUP || db.groups.iter().any(|g| g.name() == name) {
                continue;
            }

            let sites_pref = format!("{}{}.sites", POLICY_PREFIX, name);
            let Some(sites) = prefs.get_str(&sites_pref) else {
                log::warn!("[KPIO Caps] policy group '{}' has no sites, skipped", name);
                continue;
            };

            let mut policy = DomainPolicy::new(name, generation);
            populate_group(&mut policy, prefs, &mut atoms, capabilities);
            let policy = Arc::new(policy);

            for pattern in split_list(sites) {
                db.insert_entry(DomainEntry::new(pattern, policy.clone()));
            }
            db.groups.push(policy);
        }

        log::debug!(
            "[KPIO Caps] policy database generation {} built: {} groups, {} buckets",
            generation,
            db.groups.len() + 1,
            db.buckets.len()
        );
        db
    }

    /// Insert an entry before the first entry its pattern matches.
    fn insert_entry(&mut self, entry: DomainEntry) {
        let chain = self.buckets.entry(bucket_key(&entry.pattern)).or_default();
        let pos = chain
            .iter()
            .position(|existing| existing.matches(&entry.pattern))
            .unwrap_or(chain.len());
        chain.insert(pos, entry);
    }

    /// Generation this database was built at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Built-in default group.
    pub fn default_policy(&self) -> &Arc<DomainPolicy> {
        &self.default_policy
    }

    /// Named groups in configuration order.
    pub fn groups(&self) -> &[Arc<DomainPolicy>] {
        &self.groups
    }

    /// Entries of a bucket, most specific first.
    pub fn bucket(&self, key: &str) -> &[DomainEntry] {
        self.buckets.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Group for an origin, falling back to the default group.
    pub fn resolve(&self, origin: &str) -> Arc<DomainPolicy> {
        let origin = truncate_origin(origin);

        let host_bucket = self.buckets.get(&bucket_key(origin));
        let scheme_bucket = scheme_key(origin).and_then(|key| self.buckets.get(&key));

        host_bucket
            .into_iter()
            .chain(scheme_bucket)
            .flat_map(|chain| chain.iter())
            .find(|entry| entry.matches(origin))
            .map(|entry| entry.policy.clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Human-readable dump of groups, site buckets and capabilities.
    pub fn describe(&self, capabilities: &CapabilityTable) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "policy generation {}", self.generation);

        let mut groups: Vec<&Arc<DomainPolicy>> = Vec::new();
        groups.push(&self.default_policy);
        groups.extend(self.groups.iter());

        for group in groups {
            let _ = writeln!(out, "[{}]", group.name());
            for class in group.classes() {
                for (property, policy) in class.properties() {
                    let get = policy.get.map(|l| l.describe(capabilities));
                    let set = policy.set.map(|l| l.describe(capabilities));
                    let _ = writeln!(
                        out,
                        "  {}.{} get={} set={}",
                        class.name(),
                        property,
                        get.as_deref().unwrap_or("-"),
                        set.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        let mut keys: Vec<&String> = self.buckets.keys().collect();
        keys.sort();
        for key in keys {
            let patterns: Vec<String> = self.bucket(key)
                .iter()
                .map(|e| format!("{} -> {}", e.pattern, e.policy.name()))
                .collect();
            let _ = writeln!(out, "sites {}: {}", key, patterns.join(", "));
        }

        let names: Vec<&str> = capabilities.names().collect();
        let _ = writeln!(out, "capabilities: {}", names.join(" "));
        out
    }
}

/// Fill a group from `capability.policy.<group>.<Class>.<property>[.get|.set]`.
fn populate_group(
    policy: &mut DomainPolicy,
    prefs: &Preferences,
    atoms: &mut AtomTable,
    capabilities: &mut CapabilityTable,
) {
    let prefix = format!("{}{}.", POLICY_PREFIX, policy.name());

    for key in prefs.child_list(&prefix) {
        let rest = &key[prefix.len()..];
        let Some((class, property)) = rest.split_once('.') else {
            // `sites` and other group-level entries
            continue;
        };
        let (property, mode) = match property.split_once('.') {
            Some((property, "set")) => (property, AccessMode::Set),
            Some((property, "get")) => (property, AccessMode::Get),
            Some((property, other)) => {
                log::warn!("[KPIO Caps] unknown access mode '{}' in {}, treated as get", other, key);
                (property, AccessMode::Get)
            }
            None => (property, AccessMode::Both),
        };
        if class.is_empty() || property.is_empty() {
            log::warn!("[KPIO Caps] malformed policy entry {}", key);
            continue;
        }

        let Some(value) = prefs.get_str(key) else {
            continue;
        };
        let Some(level) = SecurityLevel::parse(value, capabilities) else {
            continue;
        };

        let class = atoms.intern(class);
        let property = atoms.intern(property);
        policy.class_mut(class).set_level(property, mode, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Action;

    fn entry(pattern: &str) -> DomainEntry {
        DomainEntry::new(pattern, Arc::new(DomainPolicy::new("g", 0)))
    }

    #[test]
    fn test_suffix_boundary() {
        let e = entry("example.com");
        assert!(e.matches("example.com"));
        assert!(e.matches("a.example.com"));
        assert!(e.matches("http://security.example.com"));
        assert!(e.matches("example.com:8080"));
        assert!(e.matches("example.com/x"));
        assert!(!e.matches("evilexample.com"));
        assert!(!e.matches("http://evilsecurity-example.com"));
    }

    #[test]
    fn test_scheme_pattern() {
        let e = entry("file:");
        assert!(e.matches("file:///home/user"));
        assert!(e.matches("FILE://"));
        assert!(!e.matches("https://file.example"));
    }

    #[test]
    fn test_bucket_key() {
        assert_eq!(bucket_key("http://www.example.com:8080"), "example.com");
        assert_eq!(bucket_key("example.com"), "example.com");
        assert_eq!(bucket_key("https://intranet"), "intranet");
        assert_eq!(bucket_key("file:"), "file:");
        assert_eq!(truncate_origin("http://a.example/path/x"), "http://a.example");
    }

    #[test]
    fn test_bracketed_ipv6_host() {
        assert_eq!(strip_port_and_path("http://[::1]:8080/x"), "http://[::1]");
        assert_eq!(strip_port_and_path("[::1]"), "[::1]");
        assert_eq!(bucket_key("http://[::1]:8080"), "[::1]");
        assert_eq!(bucket_key("[::1]"), "[::1]");

        let e = entry("[::1]");
        assert!(e.matches("http://[::1]:8080"));
        assert!(e.matches("http://[::1]"));
        assert!(!e.matches("http://[::2]:8080"));

        let mut caps = CapabilityTable::new();
        let db = PolicyDatabase::build(
            &Preferences::parse(
                r#"
capability.policy.policynames = "loopback"
capability.policy.loopback.sites = "[::1]"
"#,
            ),
            &mut caps,
            1,
        );
        assert_eq!(db.resolve("http://[::1]:8080/app").name(), "loopback");
        assert_eq!(db.resolve("http://[::2]:8080/app").name(), "default");
    }

    const PREFS: &str = r#"
capability.policy.policynames = "trusted, blocked"
capability.policy.default_policynames = "mailnews"
capability.policy.trusted.sites = "https://example.com intranet.example.com"
capability.policy.blocked.sites = "ads.intranet.example.com file:"
capability.policy.mailnews.sites = ""
capability.policy.default.Window.open = "sameOrigin"
capability.policy.default.*.location = "allAccess"
capability.policy.trusted.Window.open = "allAccess"
capability.policy.trusted.Window.name.set = "noAccess"
capability.policy.blocked.*.cookie = "UniversalAccess"
capability.policy.ghost.Window.open = "allAccess"
"#;

    fn build() -> (PolicyDatabase, CapabilityTable) {
        let prefs = Preferences::parse(PREFS);
        let mut caps = CapabilityTable::new();
        let db = PolicyDatabase::build(&prefs, &mut caps, 3);
        (db, caps)
    }

    #[test]
    fn test_build_groups() {
        let (db, caps) = build();
        let names: Vec<&str> = db.groups().iter().map(|g| g.name()).collect();
        assert_eq!(names, alloc::vec!["trusted", "blocked", "mailnews"]);
        assert_eq!(db.generation(), 3);
        assert!(caps.lookup("UniversalAccess").is_some());

        let default = db.default_policy();
        let open = default.class("Window").unwrap().property("open").unwrap();
        assert_eq!(open.level(Action::GetProperty), Some(SecurityLevel::SameOriginOnly));
        assert!(default.wildcard().unwrap().property("location").is_some());
    }

    #[test]
    fn test_most_specific_first() {
        let (db, _) = build();
        let chain = db.bucket("example.com");
        let patterns: Vec<&str> = chain.iter().map(|e| e.pattern()).collect();
        assert_eq!(
            patterns,
            alloc::vec!["https://example.com", "ads.intranet.example.com", "intranet.example.com"]
        );
    }

    #[test]
    fn test_resolve() {
        let (db, _) = build();
        assert_eq!(db.resolve("https://example.com").name(), "trusted");
        assert_eq!(db.resolve("https://www.intranet.example.com:8443").name(), "trusted");
        assert_eq!(db.resolve("http://ads.intranet.example.com/banner").name(), "blocked");
        assert_eq!(db.resolve("http://example.com").name(), "default");
        assert_eq!(db.resolve("file:///tmp/x.html").name(), "blocked");
        assert_eq!(db.resolve("https://unrelated.example").name(), "default");
    }

    #[test]
    fn test_describe() {
        let (db, caps) = build();
        let dump = db.describe(&caps);
        assert!(dump.contains("[trusted]"));
        assert!(dump.contains("Window.name get=- set=noAccess"));
        assert!(dump.contains("capabilities: UniversalAccess"));
    }
}
