//! Protocol handler flags
//!
//! The network layer describes each scheme with a set of static flags that
//! the URI load policy consults. [`ProtocolHandlers`] is that collaborator
//! seam; [`StaticProtocolTable`] is the built-in table used when the host
//! does not provide its own.

use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::{HashMap, HashSet};

use crate::uri::Uri;

bitflags::bitflags! {
    /// Static flags of a protocol handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtocolFlags: u32 {
        /// Anyone may load URIs of this scheme.
        const LOADABLE_BY_ANYONE = 1 << 0;
        /// Only the system principal may load these.
        const DANGEROUS_TO_LOAD = 1 << 1;
        /// Browser UI resource (chrome:, resource:).
        const IS_UI_RESOURCE = 1 << 2;
        /// Local file.
        const IS_LOCAL_FILE = 1 << 3;
        /// Only principals that subsume the URI may load it.
        const LOADABLE_BY_SUBSUMERS = 1 << 4;
        /// Loads run in the caller's security context.
        const INHERITS_SECURITY_CONTEXT = 1 << 5;
        /// Documents of this scheme may not auto-navigate (refresh, redirect).
        const FORBIDS_AUTOMATIC_DOCUMENT_REPLACEMENT = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Flags passed by callers of a URI load check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoadFlags: u32 {
        /// Load is an automatic document replacement (meta refresh, redirect).
        const LOAD_IS_AUTOMATIC_DOCUMENT_REPLACEMENT = 1 << 0;
        /// Whitelisted chrome packages may be loaded.
        const ALLOW_CHROME = 1 << 1;
        /// `javascript:` targets are refused.
        const DISALLOW_SCRIPT = 1 << 2;
        /// Targets that inherit the caller's context are refused, even for system.
        const DISALLOW_INHERIT_PRINCIPAL = 1 << 3;
    }
}

impl LoadFlags {
    /// No extra restrictions.
    pub const STANDARD: LoadFlags = LoadFlags::empty();
}

/// Scheme used for null principal URIs.
pub const NULL_PRINCIPAL_SCHEME: &str = "nullprincipal";

/// Source of protocol handler flags.
pub trait ProtocolHandlers: Send + Sync {
    /// Flags for a scheme, `None` for an unknown scheme.
    fn flags(&self, scheme: &str) -> Option<ProtocolFlags>;

    /// Whether any URI in the nesting chain carries one of `flags`.
    fn uri_chain_has_flags(&self, uri: &Uri, flags: ProtocolFlags) -> bool {
        uri.chain()
            .any(|u| self.flags(u.scheme()).is_some_and(|f| f.intersects(flags)))
    }

    /// Flags of the outermost URI only.
    fn uri_has_flags(&self, uri: &Uri, flags: ProtocolFlags) -> bool {
        self.flags(uri.scheme()).is_some_and(|f| f.intersects(flags))
    }
}

/// Built-in protocol handler table.
#[derive(Debug, Clone)]
pub struct StaticProtocolTable {
    handlers: HashMap<String, ProtocolFlags>,
}

impl StaticProtocolTable {
    /// Table with the standard browser schemes.
    pub fn new() -> Self {
        let mut table = Self::empty();
        let anyone = ProtocolFlags::LOADABLE_BY_ANYONE;
        table.register("http", anyone);
        table.register("https", anyone);
        table.register("ftp", anyone);
        table.register("ws", anyone);
        table.register("wss", anyone);
        table.register("about", anyone);
        table.register(
            "javascript",
            anyone | ProtocolFlags::INHERITS_SECURITY_CONTEXT,
        );
        table.register(
            "data",
            anyone | ProtocolFlags::INHERITS_SECURITY_CONTEXT,
        );
        table.register("file", ProtocolFlags::IS_LOCAL_FILE);
        table.register("chrome", ProtocolFlags::IS_UI_RESOURCE);
        table.register("resource", ProtocolFlags::IS_UI_RESOURCE);
        table.register("view-source", ProtocolFlags::empty());
        table.register("jar", ProtocolFlags::empty());
        table.register(
            "wyciwyg",
            ProtocolFlags::DANGEROUS_TO_LOAD | ProtocolFlags::FORBIDS_AUTOMATIC_DOCUMENT_REPLACEMENT,
        );
        table.register(NULL_PRINCIPAL_SCHEME, ProtocolFlags::DANGEROUS_TO_LOAD);
        table
    }

    /// Table without any scheme.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register or replace a scheme.
    pub fn register(&mut self, scheme: &str, flags: ProtocolFlags) {
        self.handlers.insert(scheme.to_ascii_lowercase(), flags);
    }
}

impl Default for StaticProtocolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHandlers for StaticProtocolTable {
    fn flags(&self, scheme: &str) -> Option<ProtocolFlags> {
        self.handlers.get(scheme).copied()
    }
}

/// Package-level allow-list for chrome URIs reachable from content.
pub trait ChromeRegistry: Send + Sync {
    /// Whether content may load this `chrome:` URI.
    fn allow_content_access(&self, uri: &Uri) -> bool;
}

/// Chrome registry with a fixed set of content-accessible packages.
#[derive(Debug, Clone, Default)]
pub struct StaticChromeRegistry {
    packages: HashSet<String>,
}

impl StaticChromeRegistry {
    /// Registry with no accessible package.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a package as content-accessible.
    pub fn allow_package(&mut self, package: &str) {
        self.packages.insert(package.to_ascii_lowercase());
    }

    /// Registry from a package list.
    pub fn with_packages<'a, I: IntoIterator<Item = &'a str>>(packages: I) -> Self {
        let mut registry = Self::new();
        for package in packages {
            registry.allow_package(package);
        }
        registry
    }

    /// Accessible packages, sorted.
    pub fn packages(&self) -> Vec<String> {
        let mut list: Vec<String> = self.packages.iter().cloned().collect();
        list.sort();
        list
    }
}

impl ChromeRegistry for StaticChromeRegistry {
    fn allow_content_access(&self, uri: &Uri) -> bool {
        if !uri.scheme_is("chrome") {
            return false;
        }
        // chrome://<package>/<provider>/...
        uri.host()
            .map(|package| self.packages.contains(package))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_flags() {
        let table = StaticProtocolTable::new();
        assert_eq!(table.flags("file"), Some(ProtocolFlags::IS_LOCAL_FILE));
        assert!(table.flags("chrome").unwrap().contains(ProtocolFlags::IS_UI_RESOURCE));
        assert!(table.flags("gopher").is_none());
    }

    #[test]
    fn test_chain_flags() {
        let table = StaticProtocolTable::new();
        let uri = Uri::parse("view-source:file:///etc/passwd").unwrap();
        assert!(table.uri_chain_has_flags(&uri, ProtocolFlags::IS_LOCAL_FILE));
        assert!(!table.uri_has_flags(&uri, ProtocolFlags::IS_LOCAL_FILE));
    }

    #[test]
    fn test_chrome_registry() {
        let registry = StaticChromeRegistry::with_packages(["global"]);
        let allowed = Uri::parse("chrome://global/skin/icon.png").unwrap();
        let denied = Uri::parse("chrome://browser/content/browser.xul").unwrap();
        assert!(registry.allow_content_access(&allowed));
        assert!(!registry.allow_content_access(&denied));
    }

    #[test]
    fn test_unknown_load_bits() {
        let flags = LoadFlags::from_bits(1 << 7);
        assert!(flags.is_none());
        assert_eq!(LoadFlags::STANDARD, LoadFlags::empty());
    }
}
