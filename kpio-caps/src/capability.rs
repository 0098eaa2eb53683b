//! Named capabilities
//!
//! A capability is a configuration-granted privilege such as
//! `UniversalAccess`. Names are interned into a [`CapabilityTable`] so that
//! policy levels can refer to them by id.

use alloc::collections::BTreeSet;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::atom::{Atom, AtomTable};
use crate::error::{AccessError, CapsResult};
use crate::prefs::split_list;

/// Capability that overrides every same-origin restriction.
pub const UNIVERSAL_CAPABILITY: &str = "UniversalAccess";

/// Longest accepted capability name.
pub const MAX_CAPABILITY_NAME_LEN: usize = 200;

/// Interned capability id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId(u32);

impl CapabilityId {
    /// Raw id.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Capability name interner.
#[derive(Debug, Default)]
pub struct CapabilityTable {
    atoms: AtomTable,
    names: Vec<Atom>,
    ids: HashMap<Atom, CapabilityId>,
}

impl CapabilityTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a capability name.
    pub fn intern(&mut self, name: &str) -> CapabilityId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let atom = self.atoms.intern(name);
        let id = CapabilityId(self.names.len() as u32);
        self.names.push(atom.clone());
        self.ids.insert(atom, id);
        id
    }

    /// Id of an already interned name.
    pub fn lookup(&self, name: &str) -> Option<CapabilityId> {
        self.ids.get(name).copied()
    }

    /// Name of an id.
    pub fn name(&self, id: CapabilityId) -> Option<&str> {
        self.names.get(id.0 as usize).map(|a| a.as_str())
    }

    /// Interned names in id order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|a| a.as_str())
    }

    /// Number of interned capabilities.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Outcome of asking whether a principal may enable a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableDecision {
    /// Pre-configured grant.
    Granted,
    /// Pre-configured denial.
    Denied,
    /// Nothing configured either way.
    NoDecision,
    /// Would have required asking the user.
    UserPermission,
}

/// Configured grants of one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityGrants {
    granted: BTreeSet<String>,
    denied: BTreeSet<String>,
}

impl CapabilityGrants {
    /// No grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants from space or comma separated lists.
    pub fn from_lists(granted: &str, denied: &str) -> Self {
        let mut grants = Self::new();
        for name in split_list(granted) {
            grants.grant(name);
        }
        for name in split_list(denied) {
            grants.deny(name);
        }
        grants
    }

    /// Grant a capability. A later grant clears an earlier denial.
    pub fn grant(&mut self, name: &str) {
        self.denied.remove(name);
        self.granted.insert(name.to_string());
    }

    /// Deny a capability. A later denial clears an earlier grant.
    pub fn deny(&mut self, name: &str) {
        self.granted.remove(name);
        self.denied.insert(name.to_string());
    }

    /// Whether nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.denied.is_empty()
    }

    /// Whether `name` is granted.
    pub fn is_granted(&self, name: &str) -> bool {
        self.granted.contains(name)
    }

    /// Decision for a space separated capability list: any denied name
    /// denies, all granted grants.
    pub fn decide(&self, capability: &str) -> EnableDecision {
        let mut all_granted = true;
        let mut any = false;
        for name in split_list(capability) {
            any = true;
            if self.denied.contains(name) {
                return EnableDecision::Denied;
            }
            if !self.granted.contains(name) {
                all_granted = false;
            }
        }
        if any && all_granted {
            EnableDecision::Granted
        } else {
            EnableDecision::NoDecision
        }
    }

    /// Granted names.
    pub fn granted(&self) -> impl Iterator<Item = &str> {
        self.granted.iter().map(|s| s.as_str())
    }

    /// Denied names.
    pub fn denied(&self) -> impl Iterator<Item = &str> {
        self.denied.iter().map(|s| s.as_str())
    }
}

/// Check a capability name before enabling it.
pub fn validate_capability_name(name: &str) -> CapsResult<()> {
    if name.len() > MAX_CAPABILITY_NAME_LEN {
        return Err(AccessError::security("Capability name too long"));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.'));
    if !valid {
        return Err(AccessError::security("Invalid character in capability name"));
    }
    Ok(())
}
