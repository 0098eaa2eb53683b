//! Domain policy trees
//!
//! A [`DomainPolicy`] maps class names to [`ClassPolicy`] tables, which map
//! property names to a get/set pair of [`SecurityLevel`]s. One class entry,
//! named `*`, acts as the wildcard for every class. Trees are immutable once
//! built; configuration changes build a new tree.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;

use crate::atom::Atom;
use crate::capability::{CapabilityId, CapabilityTable};

/// Class name of the wildcard class policy.
pub const WILDCARD_CLASS: &str = "*";

/// Name of the built-in default group.
pub const DEFAULT_GROUP: &str = "default";

/// Access rule for one property and action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityLevel {
    /// Always denied.
    NoAccess,
    /// Always allowed.
    AllAccess,
    /// Allowed when subject and object are same-origin.
    SameOriginOnly,
    /// Allowed when the capability is enabled.
    Capability(CapabilityId),
}

impl SecurityLevel {
    /// Parse a configured level. Keywords are case-insensitive; anything else
    /// names a capability and is interned.
    pub fn parse(value: &str, capabilities: &mut CapabilityTable) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if value.eq_ignore_ascii_case("noAccess") {
            Some(SecurityLevel::NoAccess)
        } else if value.eq_ignore_ascii_case("allAccess") {
            Some(SecurityLevel::AllAccess)
        } else if value.eq_ignore_ascii_case("sameOrigin") {
            Some(SecurityLevel::SameOriginOnly)
        } else {
            Some(SecurityLevel::Capability(capabilities.intern(value)))
        }
    }

    /// Configuration form of the level.
    pub fn describe(&self, capabilities: &CapabilityTable) -> String {
        match self {
            SecurityLevel::NoAccess => "noAccess".to_string(),
            SecurityLevel::AllAccess => "allAccess".to_string(),
            SecurityLevel::SameOriginOnly => "sameOrigin".to_string(),
            SecurityLevel::Capability(id) => match capabilities.name(*id) {
                Some(name) => name.to_string(),
                None => format!("capability#{}", id.as_u32()),
            },
        }
    }
}

/// Action attempted on a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetProperty,
    SetProperty,
    CallMethod,
}

impl Action {
    /// Human-readable verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::GetProperty => "get",
            Action::SetProperty => "set",
            Action::CallMethod => "call",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Identifier of the property being accessed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Canonical string name.
    Name(String),
    /// Array index.
    Index(u32),
    /// Symbol or other computed key.
    Computed,
}

impl PropertyKey {
    /// Key for a property name. Numeric names become indices.
    pub fn name(name: &str) -> Self {
        match name.parse::<u32>() {
            Ok(index) if index.to_string() == name => PropertyKey::Index(index),
            _ => PropertyKey::Name(name.to_string()),
        }
    }

    /// Name if the key may appear in static policy.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            PropertyKey::Name(name) => Some(name),
            _ => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::name(name)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(name) => f.write_str(name),
            PropertyKey::Index(index) => write!(f, "{}", index),
            PropertyKey::Computed => f.write_str("<computed>"),
        }
    }
}

/// Which half of a property policy a configuration entry sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Get,
    Set,
    Both,
}

/// Get/set levels of one property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyPolicy {
    pub get: Option<SecurityLevel>,
    pub set: Option<SecurityLevel>,
}

impl PropertyPolicy {
    /// Level for an action. Calls use the get level.
    pub fn level(&self, action: Action) -> Option<SecurityLevel> {
        match action {
            Action::SetProperty => self.set,
            Action::GetProperty | Action::CallMethod => self.get,
        }
    }
}

/// Property table of one class.
#[derive(Debug, Clone)]
pub struct ClassPolicy {
    name: Atom,
    properties: HashMap<Atom, PropertyPolicy>,
}

impl ClassPolicy {
    /// Empty class policy.
    pub fn new(name: Atom) -> Self {
        Self {
            name,
            properties: HashMap::new(),
        }
    }

    /// Class name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Property policy by name.
    pub fn property(&self, name: &str) -> Option<&PropertyPolicy> {
        self.properties.get(name)
    }

    /// Set a level for a property.
    pub fn set_level(&mut self, property: Atom, mode: AccessMode, level: SecurityLevel) {
        let entry = self.properties.entry(property).or_default();
        match mode {
            AccessMode::Get => entry.get = Some(level),
            AccessMode::Set => entry.set = Some(level),
            // Explicit get/set entries win over the combined form.
            AccessMode::Both => {
                entry.get.get_or_insert(level);
                entry.set.get_or_insert(level);
            }
        }
    }

    /// Properties sorted by name.
    pub fn properties(&self) -> Vec<(&str, &PropertyPolicy)> {
        let mut list: Vec<(&str, &PropertyPolicy)> =
            self.properties.iter().map(|(k, v)| (k.as_str(), v)).collect();
        list.sort_by(|a, b| a.0.cmp(b.0));
        list
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether no property is configured.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Named policy group.
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    name: String,
    generation: u64,
    classes: HashMap<Atom, ClassPolicy>,
    wildcard: Option<ClassPolicy>,
}

impl DomainPolicy {
    /// Empty group built at `generation`.
    pub fn new(name: &str, generation: u64) -> Self {
        Self {
            name: name.to_string(),
            generation,
            classes: HashMap::new(),
            wildcard: None,
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation the group was built at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this is the built-in default group.
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_GROUP
    }

    /// Class policy by name. `*` is not returned here.
    pub fn class(&self, name: &str) -> Option<&ClassPolicy> {
        self.classes.get(name)
    }

    /// Wildcard class policy.
    pub fn wildcard(&self) -> Option<&ClassPolicy> {
        self.wildcard.as_ref()
    }

    /// Class policy to fill, created on first use.
    pub fn class_mut(&mut self, name: Atom) -> &mut ClassPolicy {
        if name.as_str() == WILDCARD_CLASS {
            return self.wildcard.get_or_insert_with(|| ClassPolicy::new(name));
        }
        self.classes
            .entry(name.clone())
            .or_insert_with(|| ClassPolicy::new(name))
    }

    /// Classes sorted by name, wildcard last.
    pub fn classes(&self) -> Vec<&ClassPolicy> {
        let mut list: Vec<&ClassPolicy> = self.classes.values().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        if let Some(wildcard) = &self.wildcard {
            list.push(wildcard);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;

    #[test]
    fn test_parse_levels() {
        let mut caps = CapabilityTable::new();
        assert_eq!(SecurityLevel::parse("NOACCESS", &mut caps), Some(SecurityLevel::NoAccess));
        assert_eq!(SecurityLevel::parse("allAccess", &mut caps), Some(SecurityLevel::AllAccess));
        assert_eq!(SecurityLevel::parse(" sameOrigin ", &mut caps), Some(SecurityLevel::SameOriginOnly));
        let level = SecurityLevel::parse("UniversalAccess", &mut caps).unwrap();
        assert_eq!(level, SecurityLevel::Capability(caps.lookup("UniversalAccess").unwrap()));
        assert_eq!(level.describe(&caps), "UniversalAccess");
        assert_eq!(SecurityLevel::parse("", &mut caps), None);
    }

    #[test]
    fn test_property_key() {
        assert_eq!(PropertyKey::name("length"), PropertyKey::Name("length".into()));
        assert_eq!(PropertyKey::name("3"), PropertyKey::Index(3));
        assert_eq!(PropertyKey::name("03"), PropertyKey::Name("03".into()));
        assert!(PropertyKey::Computed.as_name().is_none());
    }

    #[test]
    fn test_property_levels() {
        let mut atoms = AtomTable::new();
        let mut policy = DomainPolicy::new("trusted", 1);
        let window = policy.class_mut(atoms.intern("Window"));
        window.set_level(atoms.intern("open"), AccessMode::Set, SecurityLevel::NoAccess);
        window.set_level(atoms.intern("name"), AccessMode::Both, SecurityLevel::AllAccess);

        let window = policy.class("Window").unwrap();
        let open = window.property("open").unwrap();
        assert_eq!(open.level(Action::SetProperty), Some(SecurityLevel::NoAccess));
        assert_eq!(open.level(Action::GetProperty), None);
        assert_eq!(
            window.property("name").unwrap().level(Action::CallMethod),
            Some(SecurityLevel::AllAccess)
        );
        assert!(policy.wildcard().is_none());
    }

    #[test]
    fn test_wildcard_class() {
        let mut atoms = AtomTable::new();
        let mut policy = DomainPolicy::new(DEFAULT_GROUP, 0);
        policy
            .class_mut(atoms.intern(WILDCARD_CLASS))
            .set_level(atoms.intern("location"), AccessMode::Both, SecurityLevel::SameOriginOnly);
        assert!(policy.class(WILDCARD_CLASS).is_none());
        assert!(policy.wildcard().unwrap().property("location").is_some());
        assert!(policy.is_default());
        assert_eq!(policy.classes().len(), 1);
    }
}
