//! URI fix-up heuristics
//!
//! Strings typed by a user or passed by a page are often not URIs yet. The
//! loader "fixes them up" before navigating, so a load check on a string
//! must also cover every URI the fix-up could produce.

use alloc::format;
use alloc::string::String;

use crate::error::{AccessError, CapsResult};
use crate::uri::Uri;

bitflags::bitflags! {
    /// Fix-up options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FixupFlags: u32 {
        /// Non-URI input may be sent to the keyword search service.
        const ALLOW_KEYWORD_LOOKUP = 1 << 0;
        /// Single-label hosts are expanded to `www.<host>.com`.
        const MAKE_ALTERNATE_URI = 1 << 1;
    }
}

impl FixupFlags {
    /// Plain fix-up.
    pub const NONE: FixupFlags = FixupFlags::empty();

    /// Every flag combination a loader may apply, plain first.
    pub const VARIANTS: [FixupFlags; 4] = [
        FixupFlags::NONE,
        FixupFlags::ALLOW_KEYWORD_LOOKUP,
        FixupFlags::MAKE_ALTERNATE_URI,
        FixupFlags::ALLOW_KEYWORD_LOOKUP.union(FixupFlags::MAKE_ALTERNATE_URI),
    ];
}

/// Turns loose strings into URIs.
pub trait UriFixup: Send + Sync {
    /// Produce the URI a loader would navigate to for `input`.
    fn create_fixup_uri(&self, input: &str, flags: FixupFlags) -> CapsResult<Uri>;
}

/// Default fix-up rules.
#[derive(Debug, Clone, Default)]
pub struct DefaultUriFixup {
    /// Keyword search prefix (`keyword.URL`); empty disables keyword lookup.
    pub keyword_url: String,
}

impl DefaultUriFixup {
    /// Create with a keyword search prefix.
    pub fn new(keyword_url: &str) -> Self {
        Self {
            keyword_url: String::from(keyword_url),
        }
    }

    fn keyword_uri(&self, input: &str) -> CapsResult<Uri> {
        let mut query = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                ' ' => query.push('+'),
                '&' | '#' | '?' | '+' | '%' => query.push_str(&format!("%{:02X}", c as u32)),
                c => query.push(c),
            }
        }
        Uri::parse(&format!("{}{}", self.keyword_url, query))
    }
}

impl UriFixup for DefaultUriFixup {
    fn create_fixup_uri(&self, input: &str, flags: FixupFlags) -> CapsResult<Uri> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AccessError::bad_uri("empty URI string"));
        }

        // Absolute local path
        if input.starts_with('/') {
            return Uri::parse(&format!("file://{}", input));
        }

        if has_real_scheme(input) {
            return Uri::parse(input);
        }

        if flags.contains(FixupFlags::ALLOW_KEYWORD_LOOKUP)
            && !self.keyword_url.is_empty()
            && looks_like_keyword(input)
        {
            return self.keyword_uri(input);
        }

        let host_end = input.find([':', '/', '?', '#']).unwrap_or(input.len());
        let (host, rest) = input.split_at(host_end);

        if flags.contains(FixupFlags::MAKE_ALTERNATE_URI)
            && !host.contains('.')
            && !host.eq_ignore_ascii_case("localhost")
        {
            return Uri::parse(&format!("http://www.{}.com{}", host, rest));
        }

        Uri::parse(&format!("http://{}", input))
    }
}

/// `scheme:` prefix that is not a `host:port` pair.
fn has_real_scheme(input: &str) -> bool {
    if input.contains("://") {
        return true;
    }
    match input.split_once(':') {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && !scheme.contains('.')
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+')
                && !rest.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

fn looks_like_keyword(input: &str) -> bool {
    input.contains(' ') || !(input.contains('.') || input.contains(':') || input.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fixup() {
        let fixup = DefaultUriFixup::default();
        let uri = fixup.create_fixup_uri("example.com/path", FixupFlags::NONE).unwrap();
        assert_eq!(uri.spec(), "http://example.com/path");

        let port = fixup.create_fixup_uri("localhost:8080", FixupFlags::NONE).unwrap();
        assert_eq!(port.origin(), "http://localhost:8080");
    }

    #[test]
    fn test_real_scheme_kept() {
        let fixup = DefaultUriFixup::default();
        let uri = fixup.create_fixup_uri("chrome://browser/content/", FixupFlags::NONE).unwrap();
        assert_eq!(uri.scheme(), "chrome");
        let js = fixup.create_fixup_uri("javascript:void(0)", FixupFlags::NONE).unwrap();
        assert_eq!(js.scheme(), "javascript");
    }

    #[test]
    fn test_file_path() {
        let fixup = DefaultUriFixup::default();
        let uri = fixup.create_fixup_uri("/etc/passwd", FixupFlags::NONE).unwrap();
        assert_eq!(uri.scheme(), "file");
        assert_eq!(uri.path(), "/etc/passwd");
    }

    #[test]
    fn test_alternate_and_keyword() {
        let fixup = DefaultUriFixup::new("https://search.example/?q=");
        let alt = fixup.create_fixup_uri("intranet/x", FixupFlags::MAKE_ALTERNATE_URI).unwrap();
        assert_eq!(alt.spec(), "http://www.intranet.com/x");

        let kw = fixup
            .create_fixup_uri("rust borrow checker", FixupFlags::ALLOW_KEYWORD_LOOKUP)
            .unwrap();
        assert_eq!(kw.spec(), "https://search.example/?q=rust+borrow+checker");

        let no_kw = DefaultUriFixup::default()
            .create_fixup_uri("intranet", FixupFlags::ALLOW_KEYWORD_LOOKUP)
            .unwrap();
        assert_eq!(no_kw.spec(), "http://intranet/");
    }

    #[test]
    fn test_empty_rejected() {
        let fixup = DefaultUriFixup::default();
        assert!(fixup.create_fixup_uri("   ", FixupFlags::NONE).is_err());
    }
}
