//! Denial reports
//!
//! Formats the messages attached to denied checks. Computing an origin for
//! a report can re-enter the engine through host hooks, so that path runs
//! inside an [`OriginScope`], a guard over a depth counter. Entering a third
//! nested scope fails with `Unavailable`.

use alloc::format;
use alloc::string::String;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{AccessError, CapsResult};
use crate::policy::{Action, PropertyKey};
use crate::principal::Principal;
use crate::uri::Uri;

/// Deepest nesting of origin computations.
pub const MAX_ORIGIN_DEPTH: u32 = 2;

/// Name reported for the subject while an origin is being computed.
pub const SECURITY_MANAGER_NAME: &str = "the security manager";

/// Scoped increment of an origin depth counter.
#[derive(Debug)]
pub struct OriginScope<'a> {
    depth: &'a AtomicU32,
}

impl<'a> OriginScope<'a> {
    /// Enter a scope, failing once `MAX_ORIGIN_DEPTH` scopes are open.
    pub fn enter(depth: &'a AtomicU32) -> CapsResult<Self> {
        let previous = depth.fetch_add(1, Ordering::SeqCst);
        if previous >= MAX_ORIGIN_DEPTH {
            depth.fetch_sub(1, Ordering::SeqCst);
            return Err(AccessError::unavailable("origin lookup nested too deeply"));
        }
        Ok(Self { depth })
    }

    /// Scopes open including this one.
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }
}

impl Drop for OriginScope<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Whether an origin computation is in progress.
pub fn in_origin_scope(depth: &AtomicU32) -> bool {
    depth.load(Ordering::SeqCst) > 0
}

/// Origin of the relaxed domain, or of the natural URI.
pub fn domain_origin(principal: &Principal, depth: &AtomicU32) -> CapsResult<String> {
    let _scope = OriginScope::enter(depth)?;
    match principal.effective_uri() {
        Some(uri) => Ok(uri.origin()),
        None => Err(AccessError::unexpected(format!(
            "principal {} has no origin",
            principal
        ))),
    }
}

/// Message for a denied property get, set or call.
///
/// The object's origin is never included. Inside an origin scope the
/// subject is reported as the security manager.
pub fn property_denied_message(
    subject: &Principal,
    class_name: &str,
    property: &PropertyKey,
    action: Action,
    depth: &AtomicU32,
) -> String {
    let what = match action {
        Action::GetProperty => "get property",
        Action::SetProperty => "set property",
        Action::CallMethod => "call method",
    };

    if in_origin_scope(depth) {
        return format!(
            "Permission denied for <{}> to {} {}.{}",
            SECURITY_MANAGER_NAME, what, class_name, property
        );
    }

    let origin = subject.uri().map(|u| u.origin()).unwrap_or_default();
    match subject.domain() {
        Some(domain) => format!(
            "Permission denied for <{}> (document.domain=<{}>) to {} {}.{}",
            origin,
            domain.origin(),
            what,
            class_name,
            property
        ),
        None => format!(
            "Permission denied for <{}> to {} {}.{}",
            origin, what, class_name, property
        ),
    }
}

/// Message for a refused load.
pub fn load_denied_message(source: &Uri, target: &Uri) -> String {
    format!(
        "Security Error: Content at {} may not load or link to {}.",
        source.spec(),
        target.spec()
    )
}

/// Message for a refused capability.
pub fn capability_denied_message(location: &str, capability: &str) -> String {
    format!(
        "EnableCapabilityDenied: A script from \"{}\" was denied {} privileges.",
        location, capability
    )
}

/// Message for a refused wrapper.
pub fn wrapper_denied_message(class_name: &str, origin: Option<&str>) -> String {
    match origin {
        Some(origin) if !origin.is_empty() => format!(
            "Permission denied to create wrapper for object of class {} for origin {}",
            class_name, origin
        ),
        _ => format!(
            "Permission denied to create wrapper for object of class {}",
            class_name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::NO_APP_ID;

    fn codebase(spec: &str) -> Principal {
        Principal::new_codebase(Uri::parse(spec).unwrap(), NO_APP_ID, false)
    }

    #[test]
    fn test_scope_cap() {
        let depth = AtomicU32::new(0);
        let first = OriginScope::enter(&depth).unwrap();
        let second = OriginScope::enter(&depth).unwrap();
        assert_eq!(second.depth(), 2);

        let err = OriginScope::enter(&depth).unwrap_err();
        assert_eq!(err.name(), "Unavailable");
        assert_eq!(depth.load(Ordering::SeqCst), 2);

        drop(second);
        drop(first);
        assert!(!in_origin_scope(&depth));
    }

    #[test]
    fn test_domain_origin() {
        let depth = AtomicU32::new(0);
        let page = codebase("https://www.example.com:8443/index.html");
        assert_eq!(domain_origin(&page, &depth).unwrap(), "https://www.example.com:8443");

        page.set_domain(Uri::parse("https://example.com/").unwrap()).unwrap();
        assert_eq!(domain_origin(&page, &depth).unwrap(), "https://example.com");

        let expanded = Principal::new_expanded(alloc::vec![page]);
        assert!(domain_origin(&expanded, &depth).unwrap_err().is_defect());
        assert_eq!(depth.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_property_message() {
        let depth = AtomicU32::new(0);
        let page = codebase("http://a.example.com/");
        let key = PropertyKey::name("location");

        let msg = property_denied_message(&page, "Window", &key, Action::GetProperty, &depth);
        assert_eq!(msg, "Permission denied for <http://a.example.com> to get property Window.location");

        page.set_domain(Uri::parse("http://example.com/").unwrap()).unwrap();
        let msg = property_denied_message(&page, "Window", &key, Action::SetProperty, &depth);
        assert!(msg.contains("(document.domain=<http://example.com>)"));

        let _scope = OriginScope::enter(&depth).unwrap();
        let msg = property_denied_message(&page, "Window", &key, Action::CallMethod, &depth);
        assert!(msg.starts_with("Permission denied for <the security manager> to call method"));
    }
}
