use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Clean a feed-supplied description so downstream storage never sees raw
/// `<tag>` sequences or entity noise.
///
/// Canonical order: strip markup, decode HTML entities, drop non-breaking
/// spaces, normalize double quotes to single, trim. Decoding after
/// stripping keeps literal `&lt;tag&gt;` text visible instead of turning it
/// into strippable markup, and `&nbsp;` only becomes reachable once
/// decoded.
pub fn clean_description(raw: &str) -> String {
    let stripped = TAG_RE.replace_all(raw, "");
    let decoded = html_escape::decode_html_entities(stripped.as_ref());
    let cleaned: String = decoded
        .chars()
        .map(|c| match c {
            '\u{a0}' => ' ',
            '"' => '\'',
            other => other,
        })
        .collect();

    cleaned.trim().to_string()
}

/// Truncate to at most `limit` bytes by trimming whole characters from the
/// end. Titles and leads carry the most signal, so the start is never cut.
pub fn truncate_bytes(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }

    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
