//! Entity decoding for text coming back from the trivia catalog.
//!
//! The catalog HTML-escapes every string field by default. Only the handful of
//! named entities it actually emits plus decimal numeric references are
//! understood; anything else passes through verbatim.
use regex::{Captures, Regex};
use std::sync::OnceLock;

static ENTITY_RE: OnceLock<Regex> = OnceLock::new();

fn entity_re() -> &'static Regex {
    ENTITY_RE.get_or_init(|| {
        Regex::new(r"&quot;|&apos;|&amp;|&lt;|&gt;|&#(\d+);").expect("entity pattern is valid")
    })
}

/// Decode the supported entities in a single left-to-right pass.
///
/// Absent input yields an empty string. Replacement output is never re-scanned,
/// so `&amp;lt;` decodes to `&lt;` rather than `<`. A numeric reference that is
/// not a valid Unicode scalar value, or is NUL (Postgres text rejects it), is
/// left as-is.
pub fn decode_html(raw: Option<&str>) -> String {
    let Some(text) = raw else {
        return String::new();
    };
    entity_re()
        .replace_all(text, |caps: &Captures| match &caps[0] {
            "&quot;" => "\"".to_string(),
            "&apos;" => "'".to_string(),
            "&amp;" => "&".to_string(),
            "&lt;" => "<".to_string(),
            "&gt;" => ">".to_string(),
            whole => caps
                .get(1)
                .and_then(|n| n.as_str().parse::<u32>().ok())
                .and_then(char::from_u32)
                .filter(|c| *c != '\0')
                .map(String::from)
                .unwrap_or_else(|| whole.to_string()),
        })
        .into_owned()
}

/// Decoded and trimmed form used both for storage and as a dedup key.
pub fn normalize_text(raw: Option<&str>) -> String {
    decode_html(raw).trim().to_string()
}
