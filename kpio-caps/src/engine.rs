//! Security engine
//!
//! [`SecurityEngine`] owns every table the checks need: preferences, the
//! principal registry, the policy database and the capability table. It is
//! built once at startup and shared by reference with the script engine
//! hooks, the loader and the wrapper layer.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::RwLock;

use crate::capability::{validate_capability_name, CapabilityTable, EnableDecision, UNIVERSAL_CAPABILITY};
use crate::context::ExecutionContext;
use crate::error::{AccessError, CapsResult};
use crate::fixup::{DefaultUriFixup, FixupFlags, UriFixup};
use crate::lookup;
use crate::object::SecuredObject;
use crate::policy::{Action, PropertyKey, SecurityLevel};
use crate::prefs::{
    PrefValue, Preferences, CODEBASE_PRINCIPAL_SUPPORT, FILE_STRICT_ORIGIN_POLICY, JAVASCRIPT_ENABLED,
    KEYWORD_URL, POLICY_PREFIX, PRINCIPAL_PREFIX,
};
use crate::principal::{AppId, Principal, NO_APP_ID, UNKNOWN_APP_ID};
use crate::protocol::{
    ChromeRegistry, LoadFlags, ProtocolFlags, ProtocolHandlers, StaticChromeRegistry,
    StaticProtocolTable, NULL_PRINCIPAL_SCHEME,
};
use crate::registry::{CertificateMatch, PrincipalRegistry};
use crate::report::{self, OriginScope};
use crate::store::PolicyDatabase;
use crate::uri::Uri;

/// Pseudo class whose `enabled` property lets a site load local files.
pub const CHECK_LOAD_URI_CLASS: &str = "checkloaduri";

/// Pseudo class whose `enabled` property controls scripting for a site.
pub const JAVASCRIPT_CLASS: &str = "javascript";

/// Property of the pseudo classes.
pub const ENABLED_PROPERTY: &str = "enabled";

/// Settings read from preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// `javascript.enabled`
    pub javascript_enabled: bool,
    /// `security.fileuri.strict_origin_policy`
    pub strict_file_origin: bool,
    /// `signed.applets.codebase_principal_support`
    pub codebase_principal_support: bool,
    /// `keyword.URL`
    pub keyword_url: String,
}

impl EngineSettings {
    /// Read settings, using defaults for missing entries.
    pub fn from_prefs(prefs: &Preferences) -> Self {
        Self {
            javascript_enabled: prefs.get_bool(JAVASCRIPT_ENABLED, true),
            strict_file_origin: prefs.get_bool(FILE_STRICT_ORIGIN_POLICY, true),
            codebase_principal_support: prefs.get_bool(CODEBASE_PRINCIPAL_SUPPORT, false),
            keyword_url: String::from(prefs.get_str(KEYWORD_URL).unwrap_or("")),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_prefs(&Preferences::new())
    }
}

/// Builder for [`SecurityEngine`].
pub struct SecurityEngineBuilder {
    prefs: Preferences,
    protocols: Option<Box<dyn ProtocolHandlers>>,
    chrome: Option<Box<dyn ChromeRegistry>>,
    fixup: Option<Arc<dyn UriFixup>>,
}

impl Default for SecurityEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityEngineBuilder {
    /// Builder with empty preferences and the built-in collaborators.
    pub fn new() -> Self {
        Self {
            prefs: Preferences::new(),
            protocols: None,
            chrome: None,
            fixup: None,
        }
    }

    /// Initial preferences.
    pub fn preferences(mut self, prefs: Preferences) -> Self {
        self.prefs = prefs;
        self
    }

    /// Protocol handler flags source.
    pub fn protocols<P: ProtocolHandlers + 'static>(mut self, protocols: P) -> Self {
        self.protocols = Some(Box::new(protocols));
        self
    }

    /// Chrome package allow-list.
    pub fn chrome_registry<C: ChromeRegistry + 'static>(mut self, chrome: C) -> Self {
        self.chrome = Some(Box::new(chrome));
        self
    }

    /// URI fix-up service. Without one, [`DefaultUriFixup`] follows `keyword.URL`.
    pub fn uri_fixup<F: UriFixup + 'static>(mut self, fixup: F) -> Self {
        self.fixup = Some(Arc::new(fixup));
        self
    }

    /// Build the engine.
    pub fn build(self) -> SecurityEngine {
        let settings = EngineSettings::from_prefs(&self.prefs);
        let custom_fixup = self.fixup.is_some();
        let fixup: Arc<dyn UriFixup> = match self.fixup {
            Some(fixup) => fixup,
            None => Arc::new(DefaultUriFixup::new(&settings.keyword_url)),
        };

        let mut capabilities = CapabilityTable::new();
        let db = PolicyDatabase::build(&self.prefs, &mut capabilities, 1);

        let registry = PrincipalRegistry::new();
        registry.load_configured(&self.prefs);

        log::info!(
            "[KPIO Caps] security engine ready: {} policy groups, {} configured principals",
            db.groups().len() + 1,
            registry.configured().len()
        );

        SecurityEngine {
            prefs: RwLock::new(self.prefs),
            settings: RwLock::new(settings),
            registry,
            policies: RwLock::new(Arc::new(db)),
            capabilities: RwLock::new(capabilities),
            protocols: self
                .protocols
                .unwrap_or_else(|| Box::new(StaticProtocolTable::new())),
            chrome: self
                .chrome
                .unwrap_or_else(|| Box::new(StaticChromeRegistry::new())),
            fixup: RwLock::new(fixup),
            custom_fixup,
            generation: AtomicU64::new(1),
            origin_depth: AtomicU32::new(0),
            system: Principal::new_system(),
        }
    }
}

/// Principal-based origin security engine.
pub struct SecurityEngine {
    prefs: RwLock<Preferences>,
    settings: RwLock<EngineSettings>,
    registry: PrincipalRegistry,
    policies: RwLock<Arc<PolicyDatabase>>,
    capabilities: RwLock<CapabilityTable>,
    protocols: Box<dyn ProtocolHandlers>,
    chrome: Box<dyn ChromeRegistry>,
    fixup: RwLock<Arc<dyn UriFixup>>,
    custom_fixup: bool,
    generation: AtomicU64,
    origin_depth: AtomicU32,
    system: Principal,
}

impl Default for SecurityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityEngine {
    /// Engine with empty preferences and the built-in collaborators.
    pub fn new() -> Self {
        SecurityEngineBuilder::new().build()
    }

    /// Engine configured from `prefs`.
    pub fn with_preferences(prefs: Preferences) -> Self {
        SecurityEngineBuilder::new().preferences(prefs).build()
    }

    /// Builder.
    pub fn builder() -> SecurityEngineBuilder {
        SecurityEngineBuilder::new()
    }

    /// Current settings.
    pub fn settings(&self) -> EngineSettings {
        self.settings.read().clone()
    }

    fn strict_file_origin(&self) -> bool {
        self.settings.read().strict_file_origin
    }

    /// Principal registry.
    pub fn registry(&self) -> &PrincipalRegistry {
        &self.registry
    }

    /// Generation of the current policy database.
    pub fn policy_generation(&self) -> u64 {
        self.policies.read().generation()
    }

    /// Current policy database.
    pub fn policies(&self) -> Arc<PolicyDatabase> {
        self.policies.read().clone()
    }

    // ---- principals ----

    /// Principal of the running script, `None` for native callers.
    pub fn subject_principal(&self, ctx: &ExecutionContext) -> Option<Principal> {
        ctx.subject_principal()
    }

    /// The system principal.
    pub fn system_principal(&self) -> Principal {
        self.system.clone()
    }

    /// Whether `principal` is the system principal.
    pub fn is_system(&self, principal: &Principal) -> bool {
        principal.ptr_eq(&self.system) || principal.is_system()
    }

    /// Whether the running code has full trust. Native callers do.
    pub fn subject_is_system(&self, ctx: &ExecutionContext) -> bool {
        match ctx.subject_principal() {
            Some(subject) => self.is_system(&subject),
            None => true,
        }
    }

    /// Codebase principal for a load origin.
    ///
    /// URIs that inherit their security context get a fresh null
    /// principal. Every call returns a separate load: loads of one origin
    /// share identity and configured grants, never a relaxed domain.
    pub fn codebase_principal(&self, uri: Uri, app_id: AppId, in_browser: bool) -> CapsResult<Principal> {
        if self
            .protocols
            .uri_chain_has_flags(&uri, ProtocolFlags::INHERITS_SECURITY_CONTEXT)
        {
            return Principal::new_null();
        }

        let strict = self.strict_file_origin();
        let configured = self.registry.codebase_grants(&uri, strict);
        let principal = self
            .registry
            .intern(Principal::new_codebase(uri, app_id, in_browser), strict);

        match configured {
            Some((grants, trusted)) => principal.set_grants(grants, trusted),
            None => principal.set_grants(Default::default(), false),
        }
        Ok(principal)
    }

    /// Certificate principal.
    ///
    /// A fingerprint configured for a different subject yields a principal
    /// without grants that is not shared.
    pub fn certificate_principal(
        &self,
        fingerprint: &str,
        subject_name: &str,
        pretty_name: &str,
        uri: Option<Uri>,
    ) -> CapsResult<Principal> {
        if fingerprint.is_empty() {
            return Err(AccessError::unexpected("certificate principal without fingerprint"));
        }

        let candidate = Principal::new_certificate(fingerprint, subject_name, pretty_name, uri);
        match self.registry.certificate_grants(fingerprint, subject_name) {
            CertificateMatch::SubjectMismatch => {
                log::warn!(
                    "[KPIO Caps] certificate {} presented with unexpected subject {}",
                    fingerprint,
                    subject_name
                );
                Ok(candidate)
            }
            CertificateMatch::Granted(grants) => {
                let principal = self.registry.intern(candidate, self.strict_file_origin());
                principal.set_grants(grants, false);
                Ok(principal)
            }
            CertificateMatch::Unknown => Ok(self.registry.intern(candidate, self.strict_file_origin())),
        }
    }

    /// Fresh null principal.
    pub fn null_principal(&self) -> CapsResult<Principal> {
        Principal::new_null()
    }

    /// Expanded principal over `members`, with duplicates removed.
    pub fn expanded_principal(&self, members: Vec<Principal>) -> Principal {
        let strict = self.strict_file_origin();
        let mut unique: Vec<Principal> = Vec::with_capacity(members.len());
        for member in members {
            if !unique.iter().any(|m| m.equals(&member, strict)) {
                unique.push(member);
            }
        }
        Principal::new_expanded(unique)
    }

    /// Same-origin comparison honouring domain relaxation.
    pub fn origin_equals(&self, a: &Principal, b: &Principal) -> bool {
        a.same_origin(b, self.strict_file_origin())
    }

    /// Hash consistent with [`SecurityEngine::origin_equals`].
    pub fn origin_hash(&self, principal: &Principal) -> u32 {
        principal.origin_hash()
    }

    /// Whether `a`'s rights are a superset of `b`'s.
    pub fn subsumes(&self, a: &Principal, b: &Principal) -> bool {
        a.subsumes(b, self.strict_file_origin())
    }

    /// Whether `subject` may access objects owned by `object`.
    pub fn can_access(&self, subject: &Principal, object: &Principal) -> bool {
        self.is_system(subject) || self.subsumes(subject, object)
    }

    /// `appId+origin+t|f`, or the plain origin outside applications.
    pub fn extended_origin(&self, uri: &Uri, app_id: AppId, in_browser: bool) -> String {
        let app_id = if app_id == UNKNOWN_APP_ID { NO_APP_ID } else { app_id };
        let origin = uri.origin();
        if app_id == NO_APP_ID && !in_browser {
            return origin;
        }
        format!("{}+{}+{}", app_id, origin, if in_browser { 't' } else { 'f' })
    }

    /// Origin of the relaxed domain or natural URI, for reports.
    pub fn principal_domain_origin(&self, principal: &Principal) -> CapsResult<String> {
        report::domain_origin(principal, &self.origin_depth)
    }

    /// Mark an origin computation in progress for host hooks that compute
    /// origins themselves.
    pub fn enter_origin_scope(&self) -> CapsResult<OriginScope<'_>> {
        OriginScope::enter(&self.origin_depth)
    }

    // ---- property policy ----

    /// Configured level for an access, if any.
    pub fn policy_level(
        &self,
        principal: &Principal,
        class_name: &str,
        property: &PropertyKey,
        action: Action,
    ) -> CapsResult<Option<SecurityLevel>> {
        let db = self.policies.read().clone();
        lookup::lookup(&db, principal, class_name, property, action, |p| {
            report::domain_origin(p, &self.origin_depth)
        })
    }

    /// Check a script access to a property of `target`. Classes without a
    /// policy default to same-origin access.
    pub fn check_property_access(
        &self,
        ctx: &ExecutionContext,
        target: &dyn SecuredObject,
        class_name: &str,
        property: &PropertyKey,
        action: Action,
    ) -> CapsResult<()> {
        let Some(subject) = ctx.subject_principal() else {
            return Ok(());
        };
        if self.is_system(&subject) {
            return Ok(());
        }
        self.check_access(ctx, &subject, target, class_name, property, action, SecurityLevel::SameOriginOnly)
    }

    /// Check an access made through a native wrapper. Without a policy, DOM
    /// classes get same-origin access and other classes none.
    pub fn check_native_access(
        &self,
        ctx: &ExecutionContext,
        target: &dyn SecuredObject,
        property: &PropertyKey,
        action: Action,
    ) -> CapsResult<()> {
        let Some(subject) = ctx.subject_principal() else {
            return Ok(());
        };
        if self.is_system(&subject) {
            return Ok(());
        }
        let class_info = target.class_info();
        let fallback = if class_info.is_dom() {
            SecurityLevel::SameOriginOnly
        } else {
            SecurityLevel::NoAccess
        };
        self.check_access(ctx, &subject, target, class_info.name(), property, action, fallback)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_access(
        &self,
        ctx: &ExecutionContext,
        subject: &Principal,
        target: &dyn SecuredObject,
        class_name: &str,
        property: &PropertyKey,
        action: Action,
        fallback: SecurityLevel,
    ) -> CapsResult<()> {
        let level = self
            .policy_level(subject, class_name, property, action)?
            .unwrap_or(fallback);

        let outcome = match level {
            SecurityLevel::AllAccess => Ok(()),
            SecurityLevel::NoAccess => Err(AccessError::denied("noAccess")),
            SecurityLevel::SameOriginOnly => match target.principal() {
                Some(object) if self.subsumes(subject, &object) => Ok(()),
                Some(_) => Err(AccessError::denied("not same origin")),
                None => Err(AccessError::security("object has no principal")),
            },
            SecurityLevel::Capability(id) => {
                let name = self.capabilities.read().name(id).map(String::from);
                match name {
                    Some(name) if self.is_capability_enabled(ctx, &name) => Ok(()),
                    _ => Err(AccessError::security("capability not enabled")),
                }
            }
        };

        let err = match outcome {
            Ok(()) => {
                log::trace!(
                    "[KPIO Caps] {} {}.{} by {} granted",
                    action,
                    class_name,
                    property,
                    subject
                );
                return Ok(());
            }
            Err(err) => err,
        };

        let advertised = target.advertised_access(action, property);
        let object = target.principal();
        if self.check_advertised(ctx, Some(subject), object.as_ref(), advertised.as_deref()) {
            return Ok(());
        }

        let message = report::property_denied_message(subject, class_name, property, action, &self.origin_depth);
        log::trace!("[KPIO Caps] {}", message);
        Err(match err {
            AccessError::SecurityError(_) => AccessError::security(message),
            _ => AccessError::denied(message),
        })
    }

    /// Level an object advertises for itself, re-evaluated for the caller.
    fn check_advertised(
        &self,
        ctx: &ExecutionContext,
        subject: Option<&Principal>,
        object: Option<&Principal>,
        level: Option<&str>,
    ) -> bool {
        if self.is_capability_enabled(ctx, UNIVERSAL_CAPABILITY) {
            return true;
        }
        let Some(level) = level else {
            return false;
        };
        if level.eq_ignore_ascii_case("allAccess") {
            return true;
        }
        if level.eq_ignore_ascii_case("sameOrigin") {
            return match (subject, object) {
                (Some(subject), Some(object)) => self.subsumes(subject, object),
                _ => false,
            };
        }
        if level.eq_ignore_ascii_case("noAccess") {
            return false;
        }
        self.is_capability_enabled(ctx, level)
    }

    // ---- URI loads ----

    fn uri_has(&self, uri: &Uri, flags: ProtocolFlags) -> bool {
        self.protocols.uri_chain_has_flags(uri, flags)
    }

    /// Whether `principal` may load `target`.
    pub fn check_load_uri(&self, principal: &Principal, target: &Uri, flags: LoadFlags) -> CapsResult<()> {
        if flags.bits() & !LoadFlags::all().bits() != 0 {
            return Err(AccessError::unexpected(format!(
                "unknown load flags {:#x}",
                flags.bits()
            )));
        }

        // Enforced even for the system principal.
        if flags.contains(LoadFlags::DISALLOW_INHERIT_PRINCIPAL)
            && self.uri_has(target, ProtocolFlags::INHERITS_SECURITY_CONTEXT)
        {
            return Err(AccessError::bad_uri(format!(
                "{} would inherit the caller's principal",
                target.spec()
            )));
        }

        if self.is_system(principal) {
            return Ok(());
        }

        let Some(source) = principal.uri() else {
            if let Some(members) = principal.whitelist() {
                if members
                    .iter()
                    .any(|m| self.check_load_uri(m, target, flags).is_ok())
                {
                    return Ok(());
                }
                return Err(AccessError::bad_uri(format!(
                    "no member of {} may load {}",
                    principal.origin(),
                    target.spec()
                )));
            }
            return Err(AccessError::unexpected(format!(
                "principal {} has no URI",
                principal
            )));
        };

        if flags.contains(LoadFlags::LOAD_IS_AUTOMATIC_DOCUMENT_REPLACEMENT)
            && self.uri_has(source, ProtocolFlags::FORBIDS_AUTOMATIC_DOCUMENT_REPLACEMENT)
        {
            return Err(AccessError::bad_uri(format!(
                "automatic loads are not allowed from {}",
                source.spec()
            )));
        }

        let source_base = source.innermost();
        let target_base = target.innermost();
        let target_scheme = target_base.scheme();

        if flags.contains(LoadFlags::DISALLOW_SCRIPT) && target_scheme == "javascript" {
            return Err(AccessError::bad_uri(format!(
                "script URI {} not allowed here",
                target.spec()
            )));
        }

        let denied = || AccessError::bad_uri(report::load_denied_message(source, target));

        if self.uri_has(target_base, ProtocolFlags::LOADABLE_BY_SUBSUMERS) {
            return if principal.may_load(target_base, self.strict_file_origin()) {
                Ok(())
            } else {
                Err(denied())
            };
        }

        let source_scheme = source_base.scheme();
        if source_scheme.eq_ignore_ascii_case(NULL_PRINCIPAL_SCHEME) {
            // A null principal may target its own URI.
            if source.spec() == target.spec() {
                return Ok(());
            }
        } else if target_scheme.eq_ignore_ascii_case(source_scheme) {
            return Ok(());
        }

        // Most restrictive first.
        if self.uri_has(target_base, ProtocolFlags::DANGEROUS_TO_LOAD) {
            return Err(denied());
        }

        if self.uri_has(target_base, ProtocolFlags::IS_UI_RESOURCE) {
            if flags.contains(LoadFlags::ALLOW_CHROME) {
                if target_scheme != "chrome" {
                    return Ok(());
                }
                if self.chrome.allow_content_access(target_base) {
                    return Ok(());
                }
            }
            if self.uri_has(source_base, ProtocolFlags::IS_UI_RESOURCE) {
                return Ok(());
            }
            return Err(denied());
        }

        if self.uri_has(target_base, ProtocolFlags::IS_LOCAL_FILE) {
            if self.uri_has(source, ProtocolFlags::IS_UI_RESOURCE) {
                return Ok(());
            }
            let level = self.policy_level(
                principal,
                CHECK_LOAD_URI_CLASS,
                &PropertyKey::name(ENABLED_PROPERTY),
                Action::GetProperty,
            );
            if let Ok(Some(SecurityLevel::AllAccess)) = level {
                return Ok(());
            }
            return Err(denied());
        }

        if !self.uri_has(target_base, ProtocolFlags::LOADABLE_BY_ANYONE) {
            log::warn!(
                "[KPIO Caps] protocol handler for '{}' sets no security flags; treating it as loadable by anyone",
                target_scheme
            );
        }
        Ok(())
    }

    /// [`SecurityEngine::check_load_uri`] for a URI string and every fix-up
    /// the string could receive before loading.
    pub fn check_load_uri_str(&self, principal: &Principal, target: &str, flags: LoadFlags) -> CapsResult<()> {
        let uri = Uri::parse(target)?;
        self.check_load_uri(principal, &uri, flags)?;

        let fixup = self.fixup.read().clone();
        for variant in FixupFlags::VARIANTS {
            let fixed = fixup.create_fixup_uri(target, variant)?;
            self.check_load_uri(principal, &fixed, flags)?;
        }
        Ok(())
    }

    /// Load of `uri` requested by the running script.
    pub fn check_load_uri_from_script(&self, ctx: &ExecutionContext, uri: &Uri) -> CapsResult<()> {
        let Some(subject) = ctx.subject_principal() else {
            return Ok(());
        };

        match self.check_load_uri(&subject, uri, LoadFlags::STANDARD) {
            Ok(()) => Ok(()),
            Err(err) if err.is_defect() => Err(err),
            Err(_) => {
                if (uri.scheme_is("file") || uri.scheme_is("resource"))
                    && self.is_capability_enabled(ctx, UNIVERSAL_CAPABILITY)
                {
                    return Ok(());
                }
                Err(AccessError::bad_uri(format!(
                    "Access to '{}' from script denied",
                    uri.spec()
                )))
            }
        }
    }

    /// Verify a redirect of a load made by `old_principal`.
    pub fn check_redirect(&self, old_principal: &Principal, new_uri: &Uri, new_original_uri: &Uri) -> CapsResult<()> {
        let flags = LoadFlags::LOAD_IS_AUTOMATIC_DOCUMENT_REPLACEMENT | LoadFlags::DISALLOW_SCRIPT;
        self.check_load_uri(old_principal, new_uri, flags)?;
        if new_original_uri.spec() != new_uri.spec() {
            self.check_load_uri(old_principal, new_original_uri, flags)?;
        }
        Ok(())
    }

    // ---- scripts and functions ----

    /// Whether scripts of `principal` may run in `ctx`.
    pub fn can_execute_scripts(&self, ctx: &ExecutionContext, principal: &Principal) -> CapsResult<bool> {
        if self.is_system(principal) {
            return Ok(true);
        }
        if !ctx.scripts_enabled() {
            return Ok(false);
        }
        if principal.uri().is_none() && !principal.is_expanded() {
            return Err(AccessError::unexpected(format!(
                "principal {} has no URI",
                principal
            )));
        }
        if !self.settings.read().javascript_enabled {
            return Ok(false);
        }

        let level = self.policy_level(
            principal,
            JAVASCRIPT_CLASS,
            &PropertyKey::name(ENABLED_PROPERTY),
            Action::GetProperty,
        )?;
        Ok(level != Some(SecurityLevel::NoAccess))
    }

    /// Check an event handler compiled as `function` running against an
    /// object owned by `target`.
    pub fn check_function_access(
        &self,
        ctx: &ExecutionContext,
        function: &Principal,
        target: &Principal,
    ) -> CapsResult<()> {
        if self.is_system(function) {
            return Ok(());
        }
        if !self.can_execute_scripts(ctx, function)? {
            return Err(AccessError::security(format!(
                "scripts from {} may not run",
                function.origin()
            )));
        }
        if self.subsumes(function, target) {
            Ok(())
        } else {
            Err(AccessError::denied(format!(
                "handler from {} may not access {}",
                function.origin(),
                target.origin()
            )))
        }
    }

    // ---- capabilities ----

    /// Whether `capability` is enabled for the running code: native and
    /// system callers, the universal override, or an annotation on the
    /// subject frame.
    pub fn is_capability_enabled(&self, ctx: &ExecutionContext, capability: &str) -> bool {
        if ctx.universal_override() {
            return true;
        }
        match ctx.subject_frame() {
            None => true,
            Some(frame) => {
                frame.principal().is_some_and(|p| self.is_system(p)) || frame.has_enabled(capability)
            }
        }
    }

    /// Whether `principal` may enable `capability`. Requests that would
    /// need the user's permission are denied.
    pub fn request_capability(&self, principal: &Principal, capability: &str) -> EnableDecision {
        let support = self.settings.read().codebase_principal_support;
        match principal.can_enable_capability(capability, support) {
            EnableDecision::UserPermission => EnableDecision::Denied,
            decision => decision,
        }
    }

    /// Enable `capability` on the subject frame of `ctx`.
    pub fn enable_capability(&self, ctx: &mut ExecutionContext, capability: &str) -> CapsResult<()> {
        validate_capability_name(capability)?;

        let Some(subject) = ctx.subject_principal() else {
            return Err(AccessError::unavailable("no script is running"));
        };
        if self.is_capability_enabled(ctx, capability) {
            return Ok(());
        }

        if self.request_capability(&subject, capability) != EnableDecision::Granted {
            let location = if subject.has_certificate() {
                subject.pretty_name()
            } else {
                self.principal_domain_origin(&subject)
                    .unwrap_or_else(|_| subject.origin())
            };
            log::debug!("[KPIO Caps] {} denied capability {}", location, capability);
            return Err(AccessError::security(report::capability_denied_message(
                &location, capability,
            )));
        }

        if !ctx.annotate_subject_frame(capability) {
            log::debug!("[KPIO Caps] no subject frame to record {} on", capability);
            return Err(AccessError::unavailable("no script is running"));
        }
        log::debug!("[KPIO Caps] {} enabled capability {}", subject, capability);
        Ok(())
    }

    // ---- wrappers and native instances ----

    /// Whether script may wrap `object`.
    pub fn can_create_wrapper(&self, ctx: &ExecutionContext, object: &dyn SecuredObject) -> CapsResult<()> {
        let class_info = object.class_info();
        if class_info.is_dom() {
            return Ok(());
        }

        let subject = ctx.subject_principal();
        let advertised = object.advertised_wrapper_access();
        let owner = object.principal();
        if self.check_advertised(ctx, subject.as_ref(), owner.as_ref(), advertised.as_deref()) {
            return Ok(());
        }

        let origin = subject
            .as_ref()
            .and_then(|s| self.principal_domain_origin(s).ok());
        Err(AccessError::denied(report::wrapper_denied_message(
            class_info.name(),
            origin.as_deref(),
        )))
    }

    /// Whether script may instantiate the native class `class_id`.
    pub fn can_create_instance(&self, ctx: &ExecutionContext, class_id: &str) -> CapsResult<()> {
        if self.check_advertised(ctx, None, None, None) {
            return Ok(());
        }
        Err(AccessError::denied(format!(
            "Permission denied to create instance of class. CID={}",
            class_id
        )))
    }

    /// Whether script may get the native service `class_id`.
    pub fn can_get_service(&self, ctx: &ExecutionContext, class_id: &str) -> CapsResult<()> {
        if self.check_advertised(ctx, None, None, None) {
            return Ok(());
        }
        Err(AccessError::denied(format!(
            "Permission denied to get service. CID={}",
            class_id
        )))
    }

    // ---- preferences ----

    /// Copy of the current preferences.
    pub fn preferences(&self) -> Preferences {
        self.prefs.read().clone()
    }

    /// Set a preference and apply it.
    pub fn set_pref<V: Into<PrefValue>>(&self, name: &str, value: V) {
        self.prefs.write().set(name, value);
        self.pref_changed(name);
    }

    /// Remove a preference and apply the change.
    pub fn remove_pref(&self, name: &str) -> Option<PrefValue> {
        let old = self.prefs.write().remove(name);
        if old.is_some() {
            self.pref_changed(name);
        }
        old
    }

    /// Replace every preference and rebuild all derived state.
    pub fn reload_preferences(&self, prefs: Preferences) {
        *self.prefs.write() = prefs;
        self.refresh_settings();
        self.rebuild_policies();
        self.reload_principals();
    }

    fn pref_changed(&self, name: &str) {
        if name.starts_with("javascript.")
            || name.starts_with("security.")
            || name.starts_with("signed.")
            || name.starts_with("keyword.")
        {
            self.refresh_settings();
        } else if name.starts_with(POLICY_PREFIX) {
            self.rebuild_policies();
        } else if name.starts_with(PRINCIPAL_PREFIX) {
            self.reload_principals();
        }
    }

    fn refresh_settings(&self) {
        let settings = EngineSettings::from_prefs(&self.prefs.read());
        if !self.custom_fixup {
            *self.fixup.write() = Arc::new(DefaultUriFixup::new(&settings.keyword_url));
        }
        log::debug!("[KPIO Caps] settings refreshed: {:?}", settings);
        *self.settings.write() = settings;
    }

    /// Build a new policy database and swap it in.
    fn rebuild_policies(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let db = {
            let prefs = self.prefs.read();
            let mut capabilities = self.capabilities.write();
            PolicyDatabase::build(&prefs, &mut capabilities, generation)
        };
        *self.policies.write() = Arc::new(db);
    }

    fn reload_principals(&self) {
        self.registry.load_configured(&self.prefs.read());
    }

    /// Human-readable dump of the policy database.
    pub fn describe_policies(&self) -> String {
        let db = self.policies.read().clone();
        let capabilities = self.capabilities.read();
        db.describe(&capabilities)
    }
}
