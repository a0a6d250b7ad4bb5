use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::fetch::PageContent;

// ── Constants ────────────────────────────────────────────────────────────────

const LINK_ATTR: &str = "href";
const SCRAMBLED_ATTR: &str = "data-scrambled-url";

// ── Lazy statics ─────────────────────────────────────────────────────────────

static DOWNLOAD_BUTTON: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a#downloadButton").unwrap());

static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").unwrap());

static DOWNLOAD_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""downloadUrl"\s*:\s*"(https?:(?:\\?/){2}[^"]+)""#).unwrap());

static ESCAPED_HYPHEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\\u002d").unwrap());

// ── Outcome ──────────────────────────────────────────────────────────────────

/// A direct link that passed the `http(s)://` gate. Never mutated after
/// construction; the filename is derived from it on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink(String);

impl ResolvedLink {
    pub fn new(candidate: &str) -> Option<Self> {
        is_http_link(candidate).then(|| Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-decoded last path segment, ignoring query and fragment.
    pub fn filename(&self) -> String {
        derive_filename(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Found(ResolvedLink),
    NotFound,
}

/// A single way of digging the direct link out of a page.
pub type Strategy = fn(&Html) -> Option<String>;

/// Tried in order; the first plausible candidate wins. New markup fallbacks
/// go at the end.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("direct_attribute", direct_attribute),
    ("scrambled_attribute", scrambled_attribute),
    ("script_payload", script_payload),
];

// ── Public API ───────────────────────────────────────────────────────────────

pub fn extract(content: &PageContent) -> ExtractionOutcome {
    extract_from_html(&content.html)
}

pub fn extract_from_html(html: &str) -> ExtractionOutcome {
    let document = Html::parse_document(html);

    for (name, strategy) in STRATEGIES {
        let Some(candidate) = strategy(&document) else {
            continue;
        };
        // Every strategy converges here: only absolute http(s) links leave.
        if let Some(link) = ResolvedLink::new(&candidate) {
            debug!(strategy = *name, "direct link found");
            return ExtractionOutcome::Found(link);
        }
        debug!(strategy = *name, "discarding non-http candidate");
    }

    ExtractionOutcome::NotFound
}

pub fn is_http_link(candidate: &str) -> bool {
    let lower = candidate.get(..8).unwrap_or(candidate).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

// ── Strategies ───────────────────────────────────────────────────────────────

/// `href` of the download button, unless it is a placeholder.
pub fn direct_attribute(document: &Html) -> Option<String> {
    let href = document
        .select(&DOWNLOAD_BUTTON)
        .find_map(|el| el.value().attr(LINK_ATTR))?
        .trim();
    if is_placeholder(href) {
        return None;
    }
    Some(href.to_string())
}

/// Base64 payload the site stores in `data-scrambled-url`.
pub fn scrambled_attribute(document: &Html) -> Option<String> {
    let encoded = document
        .select(&DOWNLOAD_BUTTON)
        .find_map(|el| el.value().attr(SCRAMBLED_ATTR))?;
    let decoded = decode_scrambled(encoded)?;
    let decoded = decoded.trim();
    if is_placeholder(decoded) {
        return None;
    }
    Some(decoded.to_string())
}

/// `"downloadUrl":"…"` inside inline scripts.
pub fn script_payload(document: &Html) -> Option<String> {
    let scripts: String = document
        .select(&SCRIPT)
        .flat_map(|el| el.text())
        .collect::<Vec<_>>()
        .join("\n");

    let raw = DOWNLOAD_URL_RE.captures(&scripts)?.get(1)?.as_str();
    let unescaped = ESCAPED_HYPHEN_RE.replace_all(raw, "-").replace("\\/", "/");
    Some(unescaped.trim().to_string())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn derive_filename(link: &str) -> String {
    let rest = link.split_once("://").map_or(link, |(_, rest)| rest);
    let end = rest.find(|c: char| c == '?' || c == '#').unwrap_or(rest.len());
    let rest = &rest[..end];

    // No slash after the authority means no path segment at all.
    let Some(slash) = rest.find('/') else {
        return String::new();
    };
    let segment = rest[slash..].rsplit('/').next().unwrap_or("");

    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value == "#" || value.to_ascii_lowercase().starts_with("javascript:")
}

/// Malformed payloads are a miss, not an error.
fn decode_scrambled(encoded: &str) -> Option<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| {
            base64::engine::general_purpose::STANDARD_NO_PAD
                .decode(compact.trim_end_matches('=').as_bytes())
        })
        .ok()?;
    String::from_utf8(bytes).ok()
}
