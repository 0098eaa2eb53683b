//! Policy lookup
//!
//! Resolves the configured [`SecurityLevel`] for a principal, class,
//! property and action. Property entries are searched in order and the
//! first entry found decides:
//!
//! 1. the class policy of the principal's group
//! 2. the wildcard class of that group
//! 3. the class policy of the default group
//! 4. the wildcard class of the default group
//!
//! Steps 3 and 4 only run when the principal's group is not the default
//! group. An entry that has no level for the action still ends the search.
//! `Ok(None)` means no level applies and the caller picks the fallback
//! level.

use alloc::string::String;
use alloc::sync::Arc;

use crate::error::CapsResult;
use crate::policy::{Action, DomainPolicy, PropertyKey, PropertyPolicy, SecurityLevel};
use crate::principal::Principal;
use crate::store::PolicyDatabase;

/// Configured level for an access, if any.
///
/// `origin_of` computes the origin used to pick the principal's group; it
/// is only called when the principal has no valid cached group.
pub fn lookup<F>(
    db: &PolicyDatabase,
    principal: &Principal,
    class_name: &str,
    property: &PropertyKey,
    action: Action,
    origin_of: F,
) -> CapsResult<Option<SecurityLevel>>
where
    F: FnOnce(&Principal) -> CapsResult<String>,
{
    // Indices and computed keys never appear in static configuration.
    let Some(name) = property.as_name() else {
        return Ok(None);
    };

    let policy = resolve_policy(db, principal, origin_of)?;
    let entry = match find_entry(&policy, class_name, name) {
        Some(entry) => Some(entry),
        None if policy.is_default() => None,
        None => find_entry(db.default_policy(), class_name, name),
    };
    Ok(entry.and_then(|entry| entry.level(action)))
}

/// Group of a principal, from its cache when the generation matches.
pub fn resolve_policy<F>(
    db: &PolicyDatabase,
    principal: &Principal,
    origin_of: F,
) -> CapsResult<Arc<DomainPolicy>>
where
    F: FnOnce(&Principal) -> CapsResult<String>,
{
    let generation = db.generation();
    if let Some(policy) = principal.cached_policy(generation) {
        return Ok(policy);
    }

    let policy = if uses_default_group(principal) {
        db.default_policy().clone()
    } else {
        db.resolve(&origin_of(principal)?)
    };

    principal.cache_policy(generation, &policy);
    Ok(policy)
}

/// Principals without an origin of their own.
fn uses_default_group(principal: &Principal) -> bool {
    principal.is_system()
        || principal.is_expanded()
        || (principal.has_certificate() && principal.effective_uri().is_none())
}

/// Property entry within one group: class entry, then wildcard entry.
fn find_entry<'a>(
    policy: &'a DomainPolicy,
    class_name: &str,
    property: &str,
) -> Option<&'a PropertyPolicy> {
    policy
        .class(class_name)
        .and_then(|class| class.property(property))
        .or_else(|| policy.wildcard().and_then(|class| class.property(property)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityTable;
    use crate::error::AccessError;
    use crate::prefs::Preferences;
    use crate::principal::NO_APP_ID;
    use crate::uri::Uri;
    use alloc::string::ToString;
    use core::cell::Cell;

    const PREFS: &str = r#"
capability.policy.policynames = "trusted"
capability.policy.trusted.sites = "trusted.example"
capability.policy.trusted.Window.open = "allAccess"
capability.policy.trusted.*.open = "noAccess"
capability.policy.trusted.*.name = "noAccess"
capability.policy.trusted.Document.title.set = "allAccess"
capability.policy.default.Document.title = "sameOrigin"
capability.policy.default.*.cookie = "UniversalAccess"
"#;

    fn db(generation: u64) -> PolicyDatabase {
        let mut caps = CapabilityTable::new();
        PolicyDatabase::build(&Preferences::parse(PREFS), &mut caps, generation)
    }

    fn codebase(spec: &str) -> Principal {
        Principal::new_codebase(Uri::parse(spec).unwrap(), NO_APP_ID, false)
    }

    fn origin(p: &Principal) -> CapsResult<String> {
        Ok(p.effective_uri().unwrap().origin())
    }

    fn level(db: &PolicyDatabase, p: &Principal, class: &str, prop: &str, action: Action) -> Option<SecurityLevel> {
        lookup(db, p, class, &PropertyKey::name(prop), action, origin).unwrap()
    }

    #[test]
    fn test_property_beats_wildcard() {
        let db = db(1);
        let page = codebase("https://trusted.example/");
        assert_eq!(level(&db, &page, "Window", "open", Action::GetProperty), Some(SecurityLevel::AllAccess));
        assert_eq!(level(&db, &page, "Location", "open", Action::GetProperty), Some(SecurityLevel::NoAccess));
        assert_eq!(level(&db, &page, "Window", "name", Action::CallMethod), Some(SecurityLevel::NoAccess));
    }

    #[test]
    fn test_falls_through_to_default_group() {
        let db = db(1);
        let page = codebase("https://trusted.example/");
        // `title` only has a set level in the trusted group; the entry still
        // hides the default group's level for gets.
        assert_eq!(level(&db, &page, "Document", "title", Action::SetProperty), Some(SecurityLevel::AllAccess));
        assert_eq!(level(&db, &page, "Document", "title", Action::GetProperty), None);
        assert!(matches!(
            level(&db, &page, "Document", "cookie", Action::GetProperty),
            Some(SecurityLevel::Capability(_))
        ));
        assert_eq!(level(&db, &page, "Document", "body", Action::GetProperty), None);
    }

    #[test]
    fn test_class_entry_hides_wildcard() {
        let mut caps = CapabilityTable::new();
        let db = PolicyDatabase::build(
            &Preferences::parse(
                r#"
capability.policy.policynames = "g"
capability.policy.g.sites = "g.example"
capability.policy.g.Window.foo.set = "noAccess"
capability.policy.g.*.foo = "allAccess"
capability.policy.default.Window.foo = "allAccess"
"#,
            ),
            &mut caps,
            1,
        );
        let page = codebase("https://g.example/");
        assert_eq!(level(&db, &page, "Window", "foo", Action::GetProperty), None);
        assert_eq!(level(&db, &page, "Window", "foo", Action::SetProperty), Some(SecurityLevel::NoAccess));
        assert_eq!(level(&db, &page, "Location", "foo", Action::GetProperty), Some(SecurityLevel::AllAccess));
    }

    #[test]
    fn test_default_group_principal() {
        let db = db(1);
        let page = codebase("https://other.example/");
        assert_eq!(level(&db, &page, "Window", "open", Action::GetProperty), None);
        assert_eq!(
            level(&db, &page, "Document", "title", Action::SetProperty),
            Some(SecurityLevel::SameOriginOnly)
        );
    }

    #[test]
    fn test_non_name_keys_skip_policy() {
        let db = db(1);
        let page = codebase("https://trusted.example/");
        let calls = Cell::new(0);
        let count = |p: &Principal| {
            calls.set(calls.get() + 1);
            origin(p)
        };
        assert_eq!(lookup(&db, &page, "Window", &PropertyKey::Index(0), Action::GetProperty, count), Ok(None));
        assert_eq!(calls.get(), 0);
        assert_eq!(
            lookup(&db, &page, "Window", &PropertyKey::Computed, Action::GetProperty, origin),
            Ok(None)
        );
    }

    #[test]
    fn test_cache_and_generation() {
        let first = db(1);
        let page = codebase("https://trusted.example/");
        let policy = resolve_policy(&first, &page, origin).unwrap();
        assert_eq!(policy.name(), "trusted");

        // Cached: the origin is not recomputed.
        let again = resolve_policy(&first, &page, |_| Err(AccessError::unavailable("no origin")))
            .unwrap();
        assert!(Arc::ptr_eq(&policy, &again));

        // A newer database rejects the cached group.
        let second = db(2);
        let err = resolve_policy(&second, &page, |_| Err(AccessError::unavailable("no origin")));
        assert!(err.is_err());
        let fresh = resolve_policy(&second, &page, origin).unwrap();
        assert!(!Arc::ptr_eq(&policy, &fresh));
        assert_eq!(fresh.generation(), 2);
    }

    #[test]
    fn test_expanded_uses_default_group() {
        let db = db(1);
        let expanded = Principal::new_expanded(alloc::vec![codebase("https://trusted.example/")]);
        let policy = resolve_policy(&db, &expanded, |_| Err(AccessError::unexpected("no origin".to_string())))
            .unwrap();
        assert!(policy.is_default());
    }
}
