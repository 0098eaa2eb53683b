//! Interned identifiers
//!
//! Class and property names in the policy tables are interned so that
//! lookups compare by pointer first. The table owns one `Arc<str>` per
//! distinct name; equal names always come back as the same atom.

use alloc::sync::Arc;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use hashbrown::HashSet;

/// An interned, case-sensitive name.
#[derive(Clone)]
pub struct Atom(Arc<str>);

impl Atom {
    /// Get the string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether two atoms share storage.
    #[inline]
    pub fn ptr_eq(&self, other: &Atom) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Atom {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Atom {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl core::borrow::Borrow<str> for Atom {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Atom {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl Eq for Atom {}

impl PartialEq<str> for Atom {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl Hash for Atom {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with `str`'s hash for `Borrow<str>` lookups.
        self.as_str().hash(state);
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_str(), f)
    }
}

/// String interner.
#[derive(Debug, Default)]
pub struct AtomTable {
    atoms: HashSet<Atom>,
}

impl AtomTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning the shared atom.
    pub fn intern(&mut self, name: &str) -> Atom {
        if let Some(atom) = self.atoms.get(name) {
            return atom.clone();
        }
        let atom = Atom(Arc::from(name));
        self.atoms.insert(atom.clone());
        atom
    }

    /// Look up a name without interning it.
    pub fn get(&self, name: &str) -> Option<Atom> {
        self.atoms.get(name).cloned()
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_shares_storage() {
        let mut table = AtomTable::new();
        let a = table.intern("location");
        let b = table.intern("location");
        assert!(a.ptr_eq(&b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_case_sensitive() {
        let mut table = AtomTable::new();
        let lower = table.intern("href");
        let upper = table.intern("HREF");
        assert_ne!(lower, upper);
        assert!(table.get("Href").is_none());
        assert_eq!(table.get("href"), Some(lower));
    }
}
