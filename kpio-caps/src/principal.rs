//! Principals
//!
//! A principal is the identity an access decision is made for. Principals
//! are shared handles: cloning a [`Principal`] clones the handle, not the
//! identity. Configured grants live on the identity; the relaxed domain and
//! the cached domain policy belong to one load, so one document relaxing its
//! domain never relaxes another document of the same origin.
//!
//! Equality and hashing follow one rule: two principals that compare equal
//! under [`Principal::equals`] or [`Principal::same_origin`] always have the
//! same [`Principal::origin_hash`].

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::{Mutex, RwLock};

use crate::capability::{CapabilityGrants, EnableDecision};
use crate::error::{AccessError, CapsResult};
use crate::policy::DomainPolicy;
use crate::protocol::NULL_PRINCIPAL_SCHEME;
use crate::uri::{hash_bytes, Uri, HASH_SEED};

/// Application id of a principal.
pub type AppId = u32;

/// Not inside an application.
pub const NO_APP_ID: AppId = 0;

/// Application not known yet.
pub const UNKNOWN_APP_ID: AppId = u32::MAX;

/// Origin reported for the system principal.
pub const SYSTEM_PRINCIPAL_ORIGIN: &str = "[System Principal]";

/// Static counter for null principal URIs.
static NEXT_NULL_PRINCIPAL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a principal.
#[derive(Debug, Clone)]
pub enum PrincipalKind {
    /// Full trust.
    System,
    /// Identity derived from a load origin.
    Codebase {
        uri: Uri,
        app_id: AppId,
        in_browser: bool,
    },
    /// Identity derived from a signing certificate.
    Certificate {
        fingerprint: String,
        subject_name: String,
        pretty_name: String,
        uri: Option<Uri>,
    },
    /// Unique identity that trusts nothing but itself.
    Null { uri: Uri },
    /// Union of member principals.
    Expanded { whitelist: Vec<Principal> },
}

/// Policy tree cached on a principal, valid for one database generation.
#[derive(Debug, Clone)]
pub(crate) struct PolicyCache {
    generation: u64,
    policy: Weak<DomainPolicy>,
}

#[derive(Debug)]
struct PrincipalCore {
    kind: PrincipalKind,
    grants: RwLock<CapabilityGrants>,
    trusted: AtomicBool,
}

/// State owned by one document: its relaxed domain and the policy resolved
/// for it.
#[derive(Debug, Default)]
struct LoadState {
    domain: Mutex<Option<Uri>>,
    policy_cache: Mutex<Option<PolicyCache>>,
}

/// Shared principal handle.
///
/// Clones share everything. Handles produced by the registry for separate
/// loads share identity and grants but each own their domain.
#[derive(Clone)]
pub struct Principal {
    core: Arc<PrincipalCore>,
    load: Arc<LoadState>,
}

/// Non-owning principal handle held by the registry.
#[derive(Debug, Clone)]
pub(crate) struct WeakPrincipal(Weak<PrincipalCore>);

impl WeakPrincipal {
    /// New load handle for the principal, if it is still alive.
    pub(crate) fn upgrade(&self) -> Option<Principal> {
        self.0.upgrade().map(Principal::with_core)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Principal {
    fn with_core(core: Arc<PrincipalCore>) -> Self {
        Self {
            core,
            load: Arc::new(LoadState::default()),
        }
    }

    fn from_kind(kind: PrincipalKind) -> Self {
        Self::with_core(Arc::new(PrincipalCore {
            kind,
            grants: RwLock::new(CapabilityGrants::new()),
            trusted: AtomicBool::new(false),
        }))
    }

    /// New system principal. The engine owns the single instance.
    pub(crate) fn new_system() -> Self {
        Self::from_kind(PrincipalKind::System)
    }

    /// New codebase principal for a load origin.
    pub fn new_codebase(uri: Uri, app_id: AppId, in_browser: bool) -> Self {
        Self::from_kind(PrincipalKind::Codebase {
            uri,
            app_id,
            in_browser,
        })
    }

    /// New certificate principal.
    pub fn new_certificate(
        fingerprint: &str,
        subject_name: &str,
        pretty_name: &str,
        uri: Option<Uri>,
    ) -> Self {
        Self::from_kind(PrincipalKind::Certificate {
            fingerprint: fingerprint.to_string(),
            subject_name: subject_name.to_string(),
            pretty_name: pretty_name.to_string(),
            uri,
        })
    }

    /// New null principal with a fresh unique URI.
    pub fn new_null() -> CapsResult<Self> {
        let id = NEXT_NULL_PRINCIPAL_ID.fetch_add(1, Ordering::SeqCst);
        let uri = Uri::parse(&format!("{}:{}", NULL_PRINCIPAL_SCHEME, id))?;
        Ok(Self::from_kind(PrincipalKind::Null { uri }))
    }

    /// New expanded principal. Members equal to an earlier member are
    /// dropped.
    pub fn new_expanded(members: Vec<Principal>) -> Self {
        let mut whitelist: Vec<Principal> = Vec::with_capacity(members.len());
        for member in members {
            if !whitelist.iter().any(|kept| kept.equals(&member, true)) {
                whitelist.push(member);
            }
        }
        Self::from_kind(PrincipalKind::Expanded { whitelist })
    }

    pub(crate) fn downgrade(&self) -> WeakPrincipal {
        WeakPrincipal(Arc::downgrade(&self.core))
    }

    /// Handle for another load of the same principal: shares identity and
    /// grants, starts without a relaxed domain.
    pub fn new_load(&self) -> Principal {
        Self::with_core(self.core.clone())
    }

    /// Identity.
    pub fn kind(&self) -> &PrincipalKind {
        &self.core.kind
    }

    /// Whether two handles refer to the same principal object.
    pub fn ptr_eq(&self, other: &Principal) -> bool {
        Arc::ptr_eq(&self.core, &other.core) && Arc::ptr_eq(&self.load, &other.load)
    }

    /// Whether two handles share identity and grants, possibly as
    /// separate loads.
    pub fn shares_identity(&self, other: &Principal) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Whether this is a system principal.
    pub fn is_system(&self) -> bool {
        matches!(self.core.kind, PrincipalKind::System)
    }

    /// Whether this is a null principal.
    pub fn is_null(&self) -> bool {
        matches!(self.core.kind, PrincipalKind::Null { .. })
    }

    /// Whether this is an expanded principal.
    pub fn is_expanded(&self) -> bool {
        matches!(self.core.kind, PrincipalKind::Expanded { .. })
    }

    /// Whether this is a codebase principal.
    pub fn is_codebase(&self) -> bool {
        matches!(self.core.kind, PrincipalKind::Codebase { .. })
    }

    /// Whether this principal carries a certificate.
    pub fn has_certificate(&self) -> bool {
        matches!(self.core.kind, PrincipalKind::Certificate { .. })
    }

    /// Members of an expanded principal.
    pub fn whitelist(&self) -> Option<&[Principal]> {
        match &self.core.kind {
            PrincipalKind::Expanded { whitelist } => Some(whitelist),
            _ => None,
        }
    }

    /// Natural load URI.
    pub fn uri(&self) -> Option<&Uri> {
        match &self.core.kind {
            PrincipalKind::Codebase { uri, .. } | PrincipalKind::Null { uri } => Some(uri),
            PrincipalKind::Certificate { uri, .. } => uri.as_ref(),
            PrincipalKind::System | PrincipalKind::Expanded { .. } => None,
        }
    }

    /// Application id, `NO_APP_ID` for non-codebase principals.
    pub fn app_id(&self) -> AppId {
        match &self.core.kind {
            PrincipalKind::Codebase { app_id, .. } => *app_id,
            _ => NO_APP_ID,
        }
    }

    /// Whether the principal belongs to an in-browser frame.
    pub fn in_browser(&self) -> bool {
        match &self.core.kind {
            PrincipalKind::Codebase { in_browser, .. } => *in_browser,
            _ => false,
        }
    }

    /// Certificate fingerprint.
    pub fn fingerprint(&self) -> Option<&str> {
        match &self.core.kind {
            PrincipalKind::Certificate { fingerprint, .. } => Some(fingerprint),
            _ => None,
        }
    }

    /// Certificate subject name.
    pub fn subject_name(&self) -> Option<&str> {
        match &self.core.kind {
            PrincipalKind::Certificate { subject_name, .. } => Some(subject_name),
            _ => None,
        }
    }

    /// Display name: certificate pretty name, else the origin.
    pub fn pretty_name(&self) -> String {
        match &self.core.kind {
            PrincipalKind::Certificate { pretty_name, .. } if !pretty_name.is_empty() => {
                pretty_name.clone()
            }
            _ => self.origin(),
        }
    }

    /// Relaxed domain, if one was set.
    pub fn domain(&self) -> Option<Uri> {
        self.load.domain.lock().clone()
    }

    /// Whether a relaxed domain was set.
    pub fn has_domain(&self) -> bool {
        self.load.domain.lock().is_some()
    }

    /// Relax the origin to `domain`. Only codebase and certificate
    /// principals carry a domain.
    pub fn set_domain(&self, domain: Uri) -> CapsResult<()> {
        match &self.core.kind {
            PrincipalKind::Codebase { .. } | PrincipalKind::Certificate { .. } => {
                *self.load.domain.lock() = Some(domain);
                self.clear_policy_cache();
                Ok(())
            }
            _ => Err(AccessError::unavailable("principal does not support domain relaxation")),
        }
    }

    /// Relaxed domain if set, else the natural URI.
    pub fn effective_uri(&self) -> Option<Uri> {
        if let Some(domain) = self.domain() {
            return Some(domain);
        }
        self.uri().cloned()
    }

    /// Natural origin string.
    pub fn origin(&self) -> String {
        match &self.core.kind {
            PrincipalKind::System => SYSTEM_PRINCIPAL_ORIGIN.to_string(),
            PrincipalKind::Codebase { uri, .. } | PrincipalKind::Null { uri } => uri.origin(),
            PrincipalKind::Certificate { uri: Some(uri), .. } => uri.origin(),
            PrincipalKind::Certificate {
                uri: None,
                fingerprint,
                ..
            } => format!("[Certificate Principal {}]", fingerprint),
            PrincipalKind::Expanded { whitelist } => {
                let members: Vec<String> = whitelist.iter().map(|p| p.origin()).collect();
                format!("[Expanded Principal [{}]]", members.join(", "))
            }
        }
    }

    /// Same-origin comparison honouring domain relaxation.
    ///
    /// Effective origins (relaxed domain or natural URI) must match, and
    /// either both principals set a domain or neither did.
    pub fn same_origin(&self, other: &Principal, strict_file_origin: bool) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.is_null() || other.is_null() {
            return false;
        }
        let (a, b) = match (self.effective_uri(), other.effective_uri()) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        a.security_equals(&b, strict_file_origin) && self.has_domain() == other.has_domain()
    }

    /// Identity equality used for interning.
    pub fn equals(&self, other: &Principal, strict_file_origin: bool) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (&self.core.kind, &other.core.kind) {
            (
                PrincipalKind::Codebase {
                    app_id: a_app,
                    in_browser: a_browser,
                    ..
                },
                PrincipalKind::Codebase {
                    app_id: b_app,
                    in_browser: b_browser,
                    ..
                },
            ) => {
                a_app == b_app
                    && a_browser == b_browser
                    && self.same_origin(other, strict_file_origin)
            }
            (
                PrincipalKind::Certificate {
                    fingerprint: a_fp,
                    uri: a_uri,
                    ..
                },
                PrincipalKind::Certificate {
                    fingerprint: b_fp,
                    uri: b_uri,
                    ..
                },
            ) => {
                a_fp == b_fp
                    && match (a_uri, b_uri) {
                        (None, None) => match (self.has_domain(), other.has_domain()) {
                            (false, false) => true,
                            (true, true) => self.same_origin(other, strict_file_origin),
                            _ => false,
                        },
                        (Some(_), Some(_)) => self.same_origin(other, strict_file_origin),
                        _ => false,
                    }
            }
            (PrincipalKind::Expanded { whitelist: a }, PrincipalKind::Expanded { whitelist: b }) => {
                a.len() == b.len()
                    && a.iter().all(|p| b.iter().any(|q| p.equals(q, strict_file_origin)))
                    && b.iter().all(|q| a.iter().any(|p| p.equals(q, strict_file_origin)))
            }
            _ => false,
        }
    }

    /// Hash of the domain-or-URI; consistent with [`Principal::equals`] and
    /// [`Principal::same_origin`].
    pub fn origin_hash(&self) -> u32 {
        match &self.core.kind {
            PrincipalKind::System => hash_bytes(HASH_SEED, SYSTEM_PRINCIPAL_ORIGIN.as_bytes()),
            PrincipalKind::Expanded { whitelist } => whitelist
                .iter()
                .fold(0u32, |acc, p| acc.wrapping_add(p.origin_hash())),
            PrincipalKind::Certificate {
                fingerprint, uri: None, ..
            } if !self.has_domain() => hash_bytes(HASH_SEED, fingerprint.as_bytes()),
            _ => match self.effective_uri() {
                Some(uri) => uri.security_hash(),
                None => HASH_SEED,
            },
        }
    }

    /// Whether this principal's rights are a superset of `other`'s.
    pub fn subsumes(&self, other: &Principal, strict_file_origin: bool) -> bool {
        if self.is_system() || self.ptr_eq(other) {
            return true;
        }
        if other.is_system() {
            return false;
        }
        if let Some(members) = other.whitelist() {
            return members.iter().all(|m| self.subsumes(m, strict_file_origin));
        }
        if let Some(members) = self.whitelist() {
            return members.iter().any(|m| m.subsumes(other, strict_file_origin));
        }
        if let (Some(a), Some(b)) = (self.fingerprint(), other.fingerprint()) {
            if a != b {
                return false;
            }
        }
        self.same_origin(other, strict_file_origin)
    }

    /// Whether this principal may load `uri` as a subsumer. Ignores any
    /// relaxed domain.
    pub fn may_load(&self, uri: &Uri, strict_file_origin: bool) -> bool {
        match &self.core.kind {
            PrincipalKind::System => true,
            PrincipalKind::Expanded { whitelist } => {
                whitelist.iter().any(|p| p.may_load(uri, strict_file_origin))
            }
            PrincipalKind::Null { uri: own } => own.spec() == uri.spec(),
            _ => self
                .uri()
                .is_some_and(|own| own.security_equals(uri, strict_file_origin)),
        }
    }

    /// Copy without sharing domain or cache state. Grants are copied. A
    /// forked null principal keeps its URI but is a distinct identity.
    pub fn fork(&self) -> Principal {
        let copy = Self::from_kind(self.core.kind.clone());
        *copy.load.domain.lock() = self.domain();
        *copy.core.grants.write() = self.grants();
        copy.core
            .trusted
            .store(self.is_trusted(), Ordering::SeqCst);
        copy
    }

    /// Configured grants.
    pub fn grants(&self) -> CapabilityGrants {
        self.core.grants.read().clone()
    }

    /// Replace configured grants.
    pub fn set_grants(&self, grants: CapabilityGrants, trusted: bool) {
        *self.core.grants.write() = grants;
        self.core.trusted.store(trusted, Ordering::SeqCst);
    }

    /// Whether grants are honoured regardless of codebase principal support.
    pub fn is_trusted(&self) -> bool {
        self.core.trusted.load(Ordering::SeqCst)
    }

    /// Whether a capability may be enabled for this principal.
    pub fn can_enable_capability(&self, capability: &str, codebase_support: bool) -> EnableDecision {
        match &self.core.kind {
            PrincipalKind::System => EnableDecision::Granted,
            PrincipalKind::Null { .. } => EnableDecision::Denied,
            PrincipalKind::Expanded { whitelist } => {
                let granted = whitelist.iter().any(|p| {
                    p.can_enable_capability(capability, codebase_support) == EnableDecision::Granted
                });
                if granted {
                    EnableDecision::Granted
                } else {
                    EnableDecision::Denied
                }
            }
            PrincipalKind::Codebase { .. } => {
                if !self.is_trusted() && !codebase_support {
                    return EnableDecision::Denied;
                }
                match self.core.grants.read().decide(capability) {
                    EnableDecision::NoDecision if !self.is_trusted() => EnableDecision::UserPermission,
                    decision => decision,
                }
            }
            PrincipalKind::Certificate { .. } => match self.core.grants.read().decide(capability) {
                EnableDecision::NoDecision => EnableDecision::UserPermission,
                decision => decision,
            },
        }
    }

    pub(crate) fn cached_policy(&self, generation: u64) -> Option<Arc<DomainPolicy>> {
        match &*self.load.policy_cache.lock() {
            Some(cache) if cache.generation == generation => cache.policy.upgrade(),
            _ => None,
        }
    }

    pub(crate) fn cache_policy(&self, generation: u64, policy: &Arc<DomainPolicy>) {
        *self.load.policy_cache.lock() = Some(PolicyCache {
            generation,
            policy: Arc::downgrade(policy),
        });
    }

    pub(crate) fn clear_policy_cache(&self) {
        *self.load.policy_cache.lock() = None;
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("kind", &self.core.kind)
            .field("domain", &self.domain())
            .finish()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.core.kind {
            PrincipalKind::Certificate { pretty_name, .. } => {
                write!(f, "[Certificate Principal {}]", pretty_name)
            }
            PrincipalKind::Codebase { uri, .. } | PrincipalKind::Null { uri } => {
                f.write_str(uri.spec())
            }
            _ => f.write_str(&self.origin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codebase(spec: &str) -> Principal {
        Principal::new_codebase(Uri::parse(spec).unwrap(), NO_APP_ID, false)
    }

    #[test]
    fn test_codebase_equality() {
        let a = codebase("http://example.com/a");
        let b = codebase("http://example.com:80/b");
        let c = codebase("http://other.example.com/");
        assert!(a.equals(&b, true));
        assert!(!a.equals(&c, true));
        assert_eq!(a.origin_hash(), b.origin_hash());
    }

    #[test]
    fn test_app_id_separates_identity() {
        let a = codebase("https://app.example/");
        let b = Principal::new_codebase(Uri::parse("https://app.example/").unwrap(), 7, false);
        assert!(!a.equals(&b, true));
        assert!(a.same_origin(&b, true));
        assert_eq!(a.origin_hash(), b.origin_hash());
    }

    #[test]
    fn test_domain_relaxation_rule() {
        let a = codebase("http://a.example.com/");
        let b = codebase("http://b.example.com/");
        let parent = Uri::parse("http://example.com/").unwrap();

        a.set_domain(parent.clone()).unwrap();
        assert!(!a.same_origin(&b, true));

        b.set_domain(parent).unwrap();
        assert!(a.same_origin(&b, true));
        assert_eq!(a.origin_hash(), b.origin_hash());

        // One side relaxed to its own origin, the other not.
        let c = codebase("http://example.com/");
        let d = codebase("http://example.com/");
        c.set_domain(Uri::parse("http://example.com/").unwrap()).unwrap();
        assert!(!c.same_origin(&d, true));
    }

    #[test]
    fn test_null_unique() {
        let a = Principal::new_null().unwrap();
        let b = Principal::new_null().unwrap();
        assert!(a.equals(&a, true));
        assert!(!a.equals(&b, true));
        assert!(!a.subsumes(&b, true));
        assert!(a.uri().unwrap().scheme_is(NULL_PRINCIPAL_SCHEME));
        assert!(a.set_domain(Uri::parse("http://x.example/").unwrap()).is_err());
    }

    #[test]
    fn test_subsumes() {
        let system = Principal::new_system();
        let a = codebase("https://a.example/");
        let b = codebase("https://b.example/");
        assert!(system.subsumes(&a, true));
        assert!(!a.subsumes(&system, true));
        assert!(!a.subsumes(&b, true));

        let expanded = Principal::new_expanded(alloc::vec![a.clone(), b.clone()]);
        assert!(expanded.subsumes(&a, true));
        assert!(!a.subsumes(&expanded, true));
        assert!(system.subsumes(&expanded, true));
    }

    #[test]
    fn test_fork_isolates_domain() {
        let a = codebase("http://a.example.com/");
        let forked = a.fork();
        forked.set_domain(Uri::parse("http://example.com/").unwrap()).unwrap();
        assert!(!a.has_domain());
        assert!(forked.has_domain());
        assert!(!a.ptr_eq(&forked));
    }

    #[test]
    fn test_expanded_drops_duplicate_members() {
        let x = codebase("https://x.example/");
        let y = codebase("https://y.example/");
        let a = Principal::new_expanded(alloc::vec![x.clone(), x.clone(), y.clone()]);
        let b = Principal::new_expanded(alloc::vec![x.clone(), y.clone(), y.clone()]);
        assert_eq!(a.whitelist().map(|w| w.len()), Some(2));
        assert!(a.equals(&b, true));
        assert_eq!(a.origin_hash(), b.origin_hash());
    }

    #[test]
    fn test_new_load_keeps_grants_not_domain() {
        let first = codebase("http://a.example.com/");
        first.set_grants(CapabilityGrants::from_lists("UniversalAccess", ""), true);
        first.set_domain(Uri::parse("http://example.com/").unwrap()).unwrap();

        let second = first.new_load();
        assert!(second.shares_identity(&first));
        assert!(!second.has_domain());
        assert!(second.is_trusted());
        assert_eq!(second.grants(), first.grants());
        assert!(!first.same_origin(&second, true));
    }

    #[test]
    fn test_certificate_equality() {
        let a = Principal::new_certificate("AA:BB", "CN=Vendor", "Vendor", None);
        let b = Principal::new_certificate("AA:BB", "CN=Vendor", "Vendor", None);
        let c = Principal::new_certificate("CC:DD", "CN=Vendor", "Vendor", None);
        assert!(a.equals(&b, true));
        assert_eq!(a.origin_hash(), b.origin_hash());
        assert!(!a.equals(&c, true));
    }

    #[test]
    fn test_can_enable_capability() {
        let page = codebase("https://a.example/");
        page.set_grants(CapabilityGrants::from_lists("UniversalAccess", ""), false);
        assert_eq!(page.can_enable_capability("UniversalAccess", false), EnableDecision::Denied);
        assert_eq!(page.can_enable_capability("UniversalAccess", true), EnableDecision::Granted);
        assert_eq!(page.can_enable_capability("Other", true), EnableDecision::UserPermission);

        page.set_grants(CapabilityGrants::from_lists("UniversalAccess", ""), true);
        assert_eq!(page.can_enable_capability("UniversalAccess", false), EnableDecision::Granted);
        assert_eq!(page.can_enable_capability("Other", false), EnableDecision::NoDecision);
    }
}
