use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// ── Page URL pattern ─────────────────────────────────────────────────────────

static PAGE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.)?mediafire\.com/file/[^/\s?#]+/[^/?#\s]\S*$")
        .unwrap()
});

const ALLOWED_HOSTS: &[&str] = &["mediafire.com", "www.mediafire.com"];

/// Returns true when `input` is a MediaFire file page address.
///
/// Only the file host is ever accepted, so nothing downstream can be pointed
/// at an arbitrary host.
pub fn validate(input: &str) -> bool {
    PageUrl::parse(input).is_some()
}

/// A validated MediaFire file page URL, always carrying an explicit scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl(String);

impl PageUrl {
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() || !PAGE_URL_RE.is_match(input) {
            return None;
        }

        let lower = input.to_ascii_lowercase();
        let normalized = if lower.starts_with("http://") || lower.starts_with("https://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };

        // Second opinion from a real URL parser: userinfo, ports and host
        // tricks must not survive.
        let parsed = Url::parse(&normalized).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        if !ALLOWED_HOSTS.contains(&host.as_str()) {
            return None;
        }
        if !parsed.username().is_empty() || parsed.password().is_some() || parsed.port().is_some() {
            return None;
        }

        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PageUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
