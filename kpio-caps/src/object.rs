//! Secured objects
//!
//! Host objects reachable from script implement [`SecuredObject`] so the
//! engine can find their owning principal and class, and so an object can
//! advertise a non-default access level for itself.

use alloc::string::{String, ToString};

use crate::policy::{Action, PropertyKey};
use crate::principal::Principal;

bitflags::bitflags! {
    /// Class info flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u32 {
        /// Class belongs to the DOM.
        const DOM_OBJECT = 1 << 0;
        /// Instances may be shared between threads.
        const THREADSAFE = 1 << 1;
        /// Singleton service object.
        const SINGLETON = 1 << 2;
    }
}

/// Class name and flags of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    name: String,
    flags: ClassFlags,
}

impl ClassInfo {
    /// Create class info.
    pub fn new(name: &str, flags: ClassFlags) -> Self {
        Self {
            name: name.to_string(),
            flags,
        }
    }

    /// DOM class.
    pub fn dom(name: &str) -> Self {
        Self::new(name, ClassFlags::DOM_OBJECT)
    }

    /// Non-DOM native class.
    pub fn native(name: &str) -> Self {
        Self::new(name, ClassFlags::empty())
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class flags.
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    /// Whether the class belongs to the DOM.
    pub fn is_dom(&self) -> bool {
        self.flags.contains(ClassFlags::DOM_OBJECT)
    }
}

/// Object whose accesses are checked by the engine.
pub trait SecuredObject {
    /// Owning principal, `None` if the object has none.
    fn principal(&self) -> Option<Principal>;

    /// Class of the object.
    fn class_info(&self) -> ClassInfo;

    /// Level the object advertises for an access: `allAccess`,
    /// `sameOrigin`, `noAccess` or a capability name.
    fn advertised_access(&self, _action: Action, _property: &PropertyKey) -> Option<String> {
        None
    }

    /// Level the object advertises for wrapping it.
    fn advertised_wrapper_access(&self) -> Option<String> {
        None
    }
}

/// Plain host object with a fixed principal and optional advertised level.
#[derive(Debug, Clone)]
pub struct HostObject {
    principal: Option<Principal>,
    class_info: ClassInfo,
    advertised: Option<String>,
}

impl HostObject {
    /// Object owned by `principal`.
    pub fn new(principal: Option<Principal>, class_info: ClassInfo) -> Self {
        Self {
            principal,
            class_info,
            advertised: None,
        }
    }

    /// Advertise `level` for every access and for wrapping.
    pub fn with_advertised(mut self, level: &str) -> Self {
        self.advertised = Some(level.to_string());
        self
    }
}

impl SecuredObject for HostObject {
    fn principal(&self) -> Option<Principal> {
        self.principal.clone()
    }

    fn class_info(&self) -> ClassInfo {
        self.class_info.clone()
    }

    fn advertised_access(&self, _action: Action, _property: &PropertyKey) -> Option<String> {
        self.advertised.clone()
    }

    fn advertised_wrapper_access(&self) -> Option<String> {
        self.advertised.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_info() {
        assert!(ClassInfo::dom("HTMLDocument").is_dom());
        let native = ClassInfo::native("LocalFile");
        assert!(!native.is_dom());
        assert_eq!(native.name(), "LocalFile");
    }

    #[test]
    fn test_host_object_advertises() {
        let obj = HostObject::new(None, ClassInfo::native("Clipboard")).with_advertised("allAccess");
        assert_eq!(
            obj.advertised_access(Action::CallMethod, &PropertyKey::name("read")).as_deref(),
            Some("allAccess")
        );
        assert_eq!(obj.advertised_wrapper_access().as_deref(), Some("allAccess"));
        assert!(obj.principal().is_none());
    }
}
