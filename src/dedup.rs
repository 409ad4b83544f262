//! Fingerprinting and text normalisation
//!
//! Identity of a news item is derived from its content:
//! - HTML is stripped and entities decoded before anything is hashed
//! - Links are reduced to a canonical form (no fragment, no tracking params)
//! - The fingerprint is SHA-256 over link, title and description

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use url::Url;

static TRACKING_PARAMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content",
        "fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_gl",
        "yclid", "twclid", "cmpid", "ncid",
    ]
    .into_iter()
    .collect()
});

static RE_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|</?[a-z!][^>]*>")
        .expect("Failed to compile tag pattern")
});

static RE_BLOCK_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|br|div|li|ul|ol|h[1-6]|tr|td|th|table|blockquote|hr)\b[^>]*>")
        .expect("Failed to compile block tag pattern")
});

static RE_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace pattern"));

/// Lowercase hex SHA-256 digest
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical form of a link: fragment and tracking params dropped, the
/// remaining query sorted, trailing slash trimmed on non-root paths.
pub fn canonicalize_url(url_str: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(url_str.trim())?;
    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    url.set_query(None);
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// Best-effort canonical link: unparsable links are kept trimmed as-is.
pub fn canonical_link(link: &str) -> String {
    canonicalize_url(link).unwrap_or_else(|_| link.trim().to_string())
}

/// Block-level tags become a space, inline tags vanish, so `Apple<b>'s</b>`
/// reads the same as `Apple's`.
fn strip_tags(input: &str) -> String {
    let spaced = RE_BLOCK_TAGS.replace_all(input, " ");
    RE_TAGS.replace_all(&spaced, "").into_owned()
}

/// Strips markup and decodes entities, producing single-spaced plain text.
///
/// Tags are removed both before and after entity decoding so that
/// escaped markup (`&lt;p&gt;`) does not survive as literal tags.
pub fn sanitize_text(input: &str) -> String {
    let stripped = strip_tags(input);
    let decoded = html_escape::decode_html_entities(&stripped);
    let stripped = strip_tags(&decoded);
    let collapsed = RE_WS.replace_all(&stripped, " ");
    collapsed.trim().to_string()
}

/// Content fingerprint for an already sanitised item.
pub fn fingerprint(link: &str, title: &str, description: &str) -> String {
    let canonical = canonical_link(link);
    compute_hash(&format!("{canonical}\n{title}\n{description}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash("hello world");
        let hash2 = compute_hash("hello world");
        let hash3 = compute_hash("hello world!");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_canonicalize_url() {
        let url1 = "https://Example.com/news?utm_source=twitter&id=123#section";
        let url2 = "https://example.com/news?id=123";

        assert_eq!(canonicalize_url(url1).unwrap(), canonicalize_url(url2).unwrap());
    }

    #[test]
    fn test_canonicalize_sorts_params_and_trailing_slash() {
        let a = canonicalize_url("https://example.com/a/?b=2&a=1").unwrap();
        let b = canonicalize_url("https://example.com/a?a=1&b=2").unwrap();

        assert_eq!(a, b);
        assert_eq!(a, "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn test_canonical_link_keeps_unparsable_input() {
        assert_eq!(canonical_link("  not a url "), "not a url");
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(
            sanitize_text("<p>Stocks <b>rally</b>&nbsp;&amp; bonds\n\n slip</p>"),
            "Stocks rally & bonds slip"
        );
        assert_eq!(sanitize_text("&lt;em&gt;Fed&lt;/em&gt; holds"), "Fed holds");
        assert_eq!(sanitize_text("<script>alert(1)</script>Clean"), "Clean");
    }

    #[test]
    fn test_sanitize_keeps_comparison_operators() {
        assert_eq!(sanitize_text("EPS 3 < 4 and 5 > 2"), "EPS 3 < 4 and 5 > 2");
    }

    #[test]
    fn test_sanitize_inline_tags_leave_no_gap() {
        assert_eq!(sanitize_text("Apple<b>'s</b> results"), "Apple's results");
        assert_eq!(sanitize_text("S&amp;P<span class=\"x\">500</span> rises"), "S&P500 rises");
        assert_eq!(sanitize_text("<p>First</p><p>Second</p>"), "First Second");
        assert_eq!(sanitize_text("Line one<br/>line two"), "Line one line two");
        assert_eq!(
            fingerprint("https://x.io/a", &sanitize_text("Apple<b>'s</b> results"), ""),
            fingerprint("https://x.io/a", &sanitize_text("Apple's results"), "")
        );
    }

    #[test]
    fn test_fingerprint_ignores_tracking_params() {
        let a = fingerprint("https://example.com/x?utm_medium=rss", "Title", "Body");
        let b = fingerprint("https://example.com/x", "Title", "Body");
        let c = fingerprint("https://example.com/x", "Title", "Other body");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
