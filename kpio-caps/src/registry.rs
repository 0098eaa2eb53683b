//! Principal registry
//!
//! Deduplicates live principals so repeated loads of one origin share an
//! identity and its grants, and holds the principals configured
//! under `capability.principal.*` together with their capability grants.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::{Mutex, RwLock};

use crate::capability::CapabilityGrants;
use crate::prefs::{Preferences, PRINCIPAL_PREFIX};
use crate::principal::{Principal, WeakPrincipal};
use crate::uri::Uri;

/// Kind of a configured principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfiguredKind {
    /// `capability.principal.codebase.*`
    Codebase { uri: Uri },
    /// `capability.principal.codebaseTrusted.*`: grants honoured even when
    /// codebase principal support is off.
    CodebaseTrusted { uri: Uri },
    /// `capability.principal.certificate.*`
    Certificate { fingerprint: String, subject_name: String },
}

/// Principal configured with capability grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredPrincipal {
    /// Preference name of the `id` entry.
    pub pref_name: String,
    pub kind: ConfiguredKind,
    pub grants: CapabilityGrants,
}

impl ConfiguredPrincipal {
    /// Whether grants apply regardless of codebase principal support.
    pub fn is_trusted(&self) -> bool {
        matches!(self.kind, ConfiguredKind::CodebaseTrusted { .. })
    }

    fn codebase_uri(&self) -> Option<&Uri> {
        match &self.kind {
            ConfiguredKind::Codebase { uri } | ConfiguredKind::CodebaseTrusted { uri } => Some(uri),
            ConfiguredKind::Certificate { .. } => None,
        }
    }
}

/// Outcome of matching a certificate against the configured table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateMatch {
    /// No configured entry for the fingerprint.
    Unknown,
    /// Configured entry with these grants.
    Granted(CapabilityGrants),
    /// Fingerprint configured for a different subject.
    SubjectMismatch,
}

/// Principal dedup table plus configured principals.
#[derive(Debug, Default)]
pub struct PrincipalRegistry {
    live: Mutex<HashMap<u32, Vec<WeakPrincipal>>>,
    configured: RwLock<Vec<ConfiguredPrincipal>>,
}

impl PrincipalRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new load of the live principal equal to `candidate`, or
    /// register and return `candidate`. Loads never share a relaxed domain.
    pub fn intern(&self, candidate: Principal, strict_file_origin: bool) -> Principal {
        let hash = candidate.origin_hash();
        let mut live = self.live.lock();
        let bucket = live.entry(hash).or_default();
        bucket.retain(|weak| weak.is_live());

        for weak in bucket.iter() {
            if let Some(existing) = weak.upgrade() {
                if existing.equals(&candidate, strict_file_origin) {
                    return existing;
                }
            }
        }

        bucket.push(candidate.downgrade());
        candidate
    }

    /// Number of live interned principals.
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .values()
            .map(|bucket| bucket.iter().filter(|w| w.is_live()).count())
            .sum()
    }

    /// Drop entries of principals that are gone.
    pub fn prune(&self) {
        let mut live = self.live.lock();
        live.retain(|_, bucket| {
            bucket.retain(|weak| weak.is_live());
            !bucket.is_empty()
        });
    }

    /// Reload configured principals from preferences.
    ///
    /// Syntax: `capability.principal.<codebase|codebaseTrusted|certificate>.<name>.id`
    /// with sibling `granted`, `denied` and `subjectName` entries. Entries
    /// with an empty id or no grants at all are skipped.
    pub fn load_configured(&self, prefs: &Preferences) {
        let mut configured = Vec::new();

        for name in prefs.child_list(PRINCIPAL_PREFIX) {
            let Some(base) = name.strip_suffix(".id") else {
                continue;
            };
            match parse_configured(prefs, name, base) {
                Some(principal) => configured.push(principal),
                None => log::warn!("[KPIO Caps] ignoring configured principal {}", name),
            }
        }

        log::debug!("[KPIO Caps] loaded {} configured principals", configured.len());
        *self.configured.write() = configured;
    }

    /// Configured principals.
    pub fn configured(&self) -> Vec<ConfiguredPrincipal> {
        self.configured.read().clone()
    }

    /// Grants configured for a codebase URI, with the trusted flag.
    pub fn codebase_grants(&self, uri: &Uri, strict_file_origin: bool) -> Option<(CapabilityGrants, bool)> {
        self.configured
            .read()
            .iter()
            .find(|c| {
                c.codebase_uri()
                    .is_some_and(|own| own.security_equals(uri, strict_file_origin))
            })
            .map(|c| (c.grants.clone(), c.is_trusted()))
    }

    /// Match a certificate against the configured table.
    pub fn certificate_grants(&self, fingerprint: &str, subject_name: &str) -> CertificateMatch {
        for entry in self.configured.read().iter() {
            if let ConfiguredKind::Certificate {
                fingerprint: fp,
                subject_name: configured_subject,
            } = &entry.kind
            {
                if fp != fingerprint {
                    continue;
                }
                if !configured_subject.is_empty() && configured_subject != subject_name {
                    return CertificateMatch::SubjectMismatch;
                }
                return CertificateMatch::Granted(entry.grants.clone());
            }
        }
        CertificateMatch::Unknown
    }
}

fn parse_configured(prefs: &Preferences, id_pref: &str, base: &str) -> Option<ConfiguredPrincipal> {
    let id = prefs.get_str(id_pref)?.trim();
    let granted = prefs.get_str(&alloc::format!("{}.granted", base)).unwrap_or("");
    let denied = prefs.get_str(&alloc::format!("{}.denied", base)).unwrap_or("");
    let subject_name = prefs
        .get_str(&alloc::format!("{}.subjectName", base))
        .unwrap_or("");

    if id.is_empty() {
        return None;
    }
    let grants = CapabilityGrants::from_lists(granted, denied);
    if grants.is_empty() {
        return None;
    }

    let rest = base.strip_prefix(PRINCIPAL_PREFIX)?;
    let (kind, _name) = rest.split_once('.')?;
    let kind = match kind {
        "certificate" => ConfiguredKind::Certificate {
            fingerprint: id.to_string(),
            subject_name: subject_name.to_string(),
        },
        "codebase" => ConfiguredKind::Codebase {
            uri: Uri::parse(id).ok()?,
        },
        "codebaseTrusted" => ConfiguredKind::CodebaseTrusted {
            uri: Uri::parse(id).ok()?,
        },
        _ => return None,
    };

    Some(ConfiguredPrincipal {
        pref_name: id_pref.to_string(),
        kind,
        grants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::NO_APP_ID;

    fn codebase(spec: &str) -> Principal {
        Principal::new_codebase(Uri::parse(spec).unwrap(), NO_APP_ID, false)
    }

    #[test]
    fn test_intern_dedups() {
        let registry = PrincipalRegistry::new();
        let a = registry.intern(codebase("https://example.com/a"), true);
        let b = registry.intern(codebase("https://example.com/b"), true);
        let c = registry.intern(codebase("https://other.example/"), true);
        assert!(a.shares_identity(&b));
        assert!(!a.ptr_eq(&b));
        assert!(!a.shares_identity(&c));
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn test_dropped_principals_pruned() {
        let registry = PrincipalRegistry::new();
        {
            let _a = registry.intern(codebase("https://example.com/"), true);
        }
        assert_eq!(registry.live_count(), 0);
        registry.prune();
        let again = registry.intern(codebase("https://example.com/"), true);
        assert_eq!(registry.live_count(), 1);
        drop(again);
    }

    #[test]
    fn test_relaxed_domain_stays_with_its_load() {
        let registry = PrincipalRegistry::new();
        let a = registry.intern(codebase("http://a.example.com/"), true);
        a.set_domain(Uri::parse("http://example.com/").unwrap()).unwrap();
        let b = registry.intern(codebase("http://a.example.com/"), true);
        assert!(a.shares_identity(&b));
        assert!(a.has_domain());
        assert!(!b.has_domain());
        assert!(!a.same_origin(&b, true));
    }

    #[test]
    fn test_load_configured() {
        let prefs = Preferences::parse(
            r#"
capability.principal.codebase.p0.id = "https://tools.example"
capability.principal.codebase.p0.granted = "UniversalAccess"
capability.principal.codebaseTrusted.p1.id = "https://admin.example"
capability.principal.codebaseTrusted.p1.granted = "UniversalAccess"
capability.principal.certificate.c0.id = "AA:BB"
capability.principal.certificate.c0.subjectName = "CN=Vendor"
capability.principal.certificate.c0.denied = "UniversalAccess"
capability.principal.codebase.empty.id = "https://nothing.example"
"#,
        );
        let registry = PrincipalRegistry::new();
        registry.load_configured(&prefs);
        assert_eq!(registry.configured().len(), 3);

        let tools = Uri::parse("https://tools.example/page").unwrap();
        let (grants, trusted) = registry.codebase_grants(&tools, true).unwrap();
        assert!(grants.is_granted("UniversalAccess"));
        assert!(!trusted);

        let admin = Uri::parse("https://admin.example/").unwrap();
        assert!(registry.codebase_grants(&admin, true).unwrap().1);

        assert!(matches!(
            registry.certificate_grants("AA:BB", "CN=Vendor"),
            CertificateMatch::Granted(_)
        ));
        assert_eq!(
            registry.certificate_grants("AA:BB", "CN=Impostor"),
            CertificateMatch::SubjectMismatch
        );
        assert_eq!(registry.certificate_grants("CC:DD", "CN=Vendor"), CertificateMatch::Unknown);
    }
}
