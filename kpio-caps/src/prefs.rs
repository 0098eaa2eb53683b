//! Preferences
//!
//! Typed key/value configuration consumed by the security engine. Text
//! form is one entry per line, either `name = value` or
//! `pref("name", value);`. Blank lines and `#` / `//` comments are skipped.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// `javascript.enabled`
pub const JAVASCRIPT_ENABLED: &str = "javascript.enabled";
/// `security.fileuri.strict_origin_policy`
pub const FILE_STRICT_ORIGIN_POLICY: &str = "security.fileuri.strict_origin_policy";
/// `signed.applets.codebase_principal_support`
pub const CODEBASE_PRINCIPAL_SUPPORT: &str = "signed.applets.codebase_principal_support";
/// `keyword.URL`
pub const KEYWORD_URL: &str = "keyword.URL";
/// Prefix of every policy group key.
pub const POLICY_PREFIX: &str = "capability.policy.";
/// Prefix of every configured principal key.
pub const PRINCIPAL_PREFIX: &str = "capability.principal.";

/// A preference value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PrefValue {
    /// Parse the text form of a value.
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw {
            "true" => return Some(PrefValue::Bool(true)),
            "false" => return Some(PrefValue::Bool(false)),
            _ => {}
        }
        if let Some(s) = unquote(raw) {
            return Some(PrefValue::Str(s));
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Some(PrefValue::Int(n));
        }
        Some(PrefValue::Str(raw.to_string()))
    }
}

impl From<bool> for PrefValue {
    fn from(v: bool) -> Self {
        PrefValue::Bool(v)
    }
}

impl From<i64> for PrefValue {
    fn from(v: i64) -> Self {
        PrefValue::Int(v)
    }
}

impl From<&str> for PrefValue {
    fn from(v: &str) -> Self {
        PrefValue::Str(v.to_string())
    }
}

impl From<String> for PrefValue {
    fn from(v: String) -> Self {
        PrefValue::Str(v)
    }
}

/// Preference store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    values: BTreeMap<String, PrefValue>,
}

impl Preferences {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse preferences from text. Malformed lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut prefs = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            match parse_line(line) {
                Some((name, value)) => {
                    prefs.values.insert(name, value);
                }
                None => {
                    log::warn!("[KPIO Caps] ignoring malformed preference on line {}: {}", line_no + 1, line);
                }
            }
        }
        prefs
    }

    /// Raw value.
    pub fn get(&self, name: &str) -> Option<&PrefValue> {
        self.values.get(name)
    }

    /// String value. Non-string values yield `None`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(PrefValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Boolean value, or `default` when unset or not a boolean.
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            Some(PrefValue::Bool(b)) => *b,
            _ => default,
        }
    }

    /// Integer value.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(PrefValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Set a value, returning the previous one.
    pub fn set<V: Into<PrefValue>>(&mut self, name: &str, value: V) -> Option<PrefValue> {
        self.values.insert(name.to_string(), value.into())
    }

    /// Remove a value.
    pub fn remove(&mut self, name: &str) -> Option<PrefValue> {
        self.values.remove(name)
    }

    /// Names under `prefix`, in sorted order.
    pub fn child_list(&self, prefix: &str) -> Vec<&str> {
        self.values
            .range::<str, _>((core::ops::Bound::Included(prefix), core::ops::Bound::Unbounded))
            .map(|(k, _)| k.as_str())
            .take_while(|k| k.starts_with(prefix))
            .collect()
    }

    /// Copy every entry of `other` over this store.
    pub fn merge(&mut self, other: &Preferences) {
        for (name, value) in other.values.iter() {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Iterate entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PrefValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Split a string list on spaces and commas.
pub fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split([' ', ',', '\t']).filter(|s| !s.is_empty())
}

fn parse_line(line: &str) -> Option<(String, PrefValue)> {
    // pref("name", value);
    if let Some(body) = line.strip_prefix("pref(").or_else(|| line.strip_prefix("user_pref(")) {
        let body = body.trim_end().strip_suffix(';').unwrap_or(body).trim_end();
        let body = body.strip_suffix(')')?;
        let (name, value) = split_call_args(body)?;
        let name = unquote(name.trim())?;
        return Some((name, PrefValue::parse(value)?));
    }

    let (name, value) = line.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name.to_string(), PrefValue::parse(value)?))
}

/// Split `"name", value` at the comma following the quoted name.
fn split_call_args(body: &str) -> Option<(&str, &str)> {
    let body = body.trim_start();
    let quote = body.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let close = body[1..].find(quote)? + 1;
    let rest = body[close + 1..].trim_start().strip_prefix(',')?;
    Some((&body[..=close], rest))
}

fn unquote(raw: &str) -> Option<String> {
    let quote = raw.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = raw.strip_prefix(quote)?.strip_suffix(quote)?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}
