//! URIs and origin comparison
//!
//! A small URI model sufficient for security decisions: scheme, authority,
//! default ports, nested URIs (`view-source:`, `jar:`) and the origin
//! string used to match site policies.
//!
//! [`Uri::security_equals`] and [`Uri::security_hash`] are kept consistent:
//! two URIs that compare equal always produce the same hash, in either
//! file-origin mode.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};

use crate::error::{AccessError, CapsResult};

/// FNV-1a offset basis.
pub(crate) const HASH_SEED: u32 = 0x811c_9dc5;

/// Fold bytes into an FNV-1a hash.
pub(crate) fn hash_bytes(mut hash: u32, bytes: &[u8]) -> u32 {
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Parsed URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    /// Normalized spec.
    spec: String,
    /// Lowercase scheme.
    scheme: String,
    /// Lowercase host. `Some("")` for `file:///path`.
    host: Option<String>,
    /// Explicit port, `None` when absent or equal to the scheme default.
    port: Option<u16>,
    /// Path, query included.
    path: String,
    /// Fragment without `#`.
    fragment: Option<String>,
    /// Inner URI of a nested URI.
    inner: Option<Box<Uri>>,
}

impl Uri {
    /// Parse a URI string.
    pub fn parse(input: &str) -> CapsResult<Self> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once(':')
            .ok_or_else(|| AccessError::bad_uri(format!("missing scheme in '{}'", input)))?;

        if !is_valid_scheme(scheme) {
            return Err(AccessError::bad_uri(format!("invalid scheme in '{}'", input)));
        }
        let scheme = scheme.to_ascii_lowercase();

        match scheme.as_str() {
            "view-source" => {
                let inner = Uri::parse(rest)?;
                return Ok(Self::nested(scheme, inner, String::new()));
            }
            "jar" => {
                let (archive, entry) = rest
                    .split_once("!/")
                    .ok_or_else(|| AccessError::bad_uri(format!("jar URI without entry: '{}'", input)))?;
                let inner = Uri::parse(archive)?;
                return Ok(Self::nested(scheme, inner, format!("!/{}", entry)));
            }
            _ => {}
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, Some(f.to_string())),
            None => (rest, None),
        };

        let (host, port, path) = if let Some(after) = rest.strip_prefix("//") {
            let auth_end = after.find(['/', '?']).unwrap_or(after.len());
            let authority = &after[..auth_end];
            let path = &after[auth_end..];

            // Drop userinfo
            let host_port = match authority.rfind('@') {
                Some(at) => &authority[at + 1..],
                None => authority,
            };

            let (host, port) = split_host_port(host_port, input)?;
            if host.is_empty() && scheme != "file" {
                return Err(AccessError::bad_uri(format!("missing host in '{}'", input)));
            }

            let port = port.filter(|p| Some(*p) != default_port(&scheme));
            let path = if path.is_empty() { "/".to_string() } else { path.to_string() };
            (Some(host.to_ascii_lowercase()), port, path)
        } else {
            (None, None, rest.to_string())
        };

        let mut uri = Self {
            spec: String::new(),
            scheme,
            host,
            port,
            path,
            fragment,
            inner: None,
        };
        uri.spec = uri.build_spec();
        Ok(uri)
    }

    fn nested(scheme: String, inner: Uri, suffix: String) -> Self {
        let spec = format!("{}:{}{}", scheme, inner.spec, suffix);
        Self {
            spec,
            scheme,
            host: None,
            port: None,
            path: suffix,
            fragment: None,
            inner: Some(Box::new(inner)),
        }
    }

    fn build_spec(&self) -> String {
        let mut spec = format!("{}:", self.scheme);
        if let Some(host_port) = self.host_port() {
            spec.push_str("//");
            spec.push_str(&host_port);
        }
        spec.push_str(&self.path);
        if let Some(fragment) = &self.fragment {
            spec.push('#');
            spec.push_str(fragment);
        }
        spec
    }

    /// Default port for a scheme.
    pub fn default_port(scheme: &str) -> Option<u16> {
        default_port(scheme)
    }

    /// Scheme (lowercase).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Check the scheme.
    pub fn scheme_is(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }

    /// Host, if the URI has an authority.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Explicit non-default port.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port used for comparison: explicit port or scheme default.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| default_port(&self.scheme))
    }

    /// Path and query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Full spec.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Spec without the fragment.
    pub fn spec_ignoring_ref(&self) -> &str {
        match self.spec.find('#') {
            Some(pos) if self.fragment.is_some() => &self.spec[..pos],
            _ => &self.spec,
        }
    }

    /// `host[:port]`, if the URI has an authority.
    pub fn host_port(&self) -> Option<String> {
        let host = self.host.as_ref()?;
        Some(match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        })
    }

    /// Directly nested URI.
    pub fn inner(&self) -> Option<&Uri> {
        self.inner.as_deref()
    }

    /// Innermost URI of a nesting chain (self when not nested).
    pub fn innermost(&self) -> &Uri {
        let mut uri = self;
        while let Some(inner) = uri.inner.as_deref() {
            uri = inner;
        }
        uri
    }

    /// Iterate this URI and every nested URI, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Uri> {
        let mut next = Some(self);
        core::iter::from_fn(move || {
            let current = next?;
            next = current.inner.as_deref();
            Some(current)
        })
    }

    /// Origin string: `scheme://host[:port]`, or the spec for host-less URIs.
    pub fn origin(&self) -> String {
        let uri = self.innermost();
        match uri.host_port() {
            Some(host_port) => format!("{}://{}", uri.scheme, host_port),
            None => uri.spec_ignoring_ref().to_string(),
        }
    }

    /// Same-origin comparison of two URIs.
    ///
    /// With `strict_file_origin`, two `file:` URIs are same-origin only when
    /// they name the same file; otherwise every `file:` URI shares an origin.
    pub fn security_equals(&self, other: &Uri, strict_file_origin: bool) -> bool {
        let a = self.innermost();
        let b = other.innermost();

        if a.scheme != b.scheme {
            return false;
        }

        if a.scheme == "file" {
            return !strict_file_origin || a.spec_ignoring_ref() == b.spec_ignoring_ref();
        }

        match (&a.host, &b.host) {
            (Some(ha), Some(hb)) => ha == hb && a.effective_port() == b.effective_port(),
            (None, None) => a.spec_ignoring_ref() == b.spec_ignoring_ref(),
            _ => false,
        }
    }

    /// Hash consistent with [`Uri::security_equals`].
    pub fn security_hash(&self) -> u32 {
        let uri = self.innermost();
        let hash = hash_bytes(HASH_SEED, uri.scheme.as_bytes());

        if uri.scheme == "file" {
            return hash;
        }

        match &uri.host {
            Some(host) => {
                let hash = hash_bytes(hash, host.as_bytes());
                let port = uri.effective_port().unwrap_or(0);
                hash_bytes(hash, &port.to_le_bytes())
            }
            None => hash_bytes(hash, uri.spec_ignoring_ref().as_bytes()),
        }
    }
}

impl core::fmt::Display for Uri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.spec)
    }
}

impl core::str::FromStr for Uri {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_host_port<'a>(host_port: &'a str, input: &str) -> CapsResult<(&'a str, Option<u16>)> {
    // IPv6 literal
    if host_port.starts_with('[') {
        let close = host_port
            .find(']')
            .ok_or_else(|| AccessError::bad_uri(format!("unterminated IPv6 host in '{}'", input)))?;
        let host = &host_port[..=close];
        let port = match host_port[close + 1..].strip_prefix(':') {
            Some(p) => parse_port(p, input)?,
            None => None,
        };
        return Ok((host, port));
    }

    match host_port.rsplit_once(':') {
        Some((host, port)) => Ok((host, parse_port(port, input)?)),
        None => Ok((host_port, None)),
    }
}

fn parse_port(port: &str, input: &str) -> CapsResult<Option<u16>> {
    if port.is_empty() {
        return Ok(None);
    }
    port.parse::<u16>()
        .map(Some)
        .map_err(|_| AccessError::bad_uri(format!("invalid port in '{}'", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    #[test]
    fn test_parse_http() {
        let u = uri("HTTP://User@Example.COM:8080/a/b?q=1#top");
        assert_eq!(u.scheme(), "http");
        assert_eq!(u.host(), Some("example.com"));
        assert_eq!(u.port(), Some(8080));
        assert_eq!(u.path(), "/a/b?q=1");
        assert_eq!(u.spec(), "http://example.com:8080/a/b?q=1#top");
        assert_eq!(u.spec_ignoring_ref(), "http://example.com:8080/a/b?q=1");
        assert_eq!(u.origin(), "http://example.com:8080");
    }

    #[test]
    fn test_default_port_dropped() {
        let u = uri("https://example.com:443");
        assert_eq!(u.port(), None);
        assert_eq!(u.effective_port(), Some(443));
        assert_eq!(u.spec(), "https://example.com/");
    }

    #[test]
    fn test_hostless_and_file() {
        let data = uri("data:text/html,hi");
        assert_eq!(data.host(), None);
        assert_eq!(data.origin(), "data:text/html,hi");

        let file = uri("file:///etc/hosts");
        assert_eq!(file.host(), Some(""));
        assert_eq!(file.origin(), "file://");
    }

    #[test]
    fn test_invalid() {
        assert!(Uri::parse("no-scheme-here").is_err());
        assert!(Uri::parse("1http://x").is_err());
        assert!(Uri::parse("http://example.com:99999/").is_err());
        assert!(Uri::parse("http:///path").is_err());
    }

    #[test]
    fn test_nested() {
        let vs = uri("view-source:https://example.com/page");
        assert_eq!(vs.scheme(), "view-source");
        assert_eq!(vs.innermost().scheme(), "https");
        assert_eq!(vs.origin(), "https://example.com");

        let jar = uri("jar:file:///app.zip!/index.html");
        assert_eq!(jar.innermost().scheme(), "file");
        assert_eq!(jar.chain().count(), 2);
        assert!(Uri::parse("jar:file:///app.zip").is_err());
    }

    #[test]
    fn test_security_equals() {
        let a = uri("http://example.com/a");
        let b = uri("http://EXAMPLE.com:80/b#x");
        let c = uri("https://example.com/a");
        let d = uri("http://example.com:8080/a");
        assert!(a.security_equals(&b, true));
        assert!(!a.security_equals(&c, true));
        assert!(!a.security_equals(&d, true));
    }

    #[test]
    fn test_file_origin_modes() {
        let a = uri("file:///home/user/a.html");
        let b = uri("file:///home/user/b.html");
        assert!(!a.security_equals(&b, true));
        assert!(a.security_equals(&b, false));
        assert_eq!(a.security_hash(), b.security_hash());
    }

    #[test]
    fn test_hash_consistent_with_equality() {
        let samples = [
            "http://example.com/",
            "http://example.com:80/x",
            "http://example.com:81/",
            "https://example.com/",
            "data:text/plain,a",
            "data:text/plain,a#frag",
            "file:///a",
            "view-source:http://example.com/",
        ];
        for a in samples.iter() {
            for b in samples.iter() {
                let (ua, ub) = (uri(a), uri(b));
                for strict in [true, false] {
                    if ua.security_equals(&ub, strict) {
                        assert_eq!(ua.security_hash(), ub.security_hash(), "{} vs {}", a, b);
                    }
                }
            }
        }
    }
}
