//! Surgical HTML editing for report pages.
//!
//! Reports are produced by the site's own renderer and must survive the
//! rehydration pass unchanged apart from the edits we make on purpose. A DOM
//! round-trip would reformat whitespace, reorder attributes and "repair"
//! markup, so this module works on byte ranges instead: it locates `<img>`
//! tags and their `src` attribute with regexes and splices replacement text
//! into the original string.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Attribute added to an `<img>` whose inlining failed.
pub const FAILURE_ATTRIBUTE: &str = "x-debug-notice";

/// Value of [`FAILURE_ATTRIBUTE`].
pub const FAILURE_NOTICE: &str = "image inlining failed";

// Quoted attribute values may contain '>'.
static RE_IMG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<img\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).unwrap());

static RE_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

static RE_HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head\b[^>]*>").unwrap());

static RE_HTML_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<html\b[^>]*>").unwrap());

/// One `<img>` tag found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgTag {
    /// Byte range of the whole tag in the document.
    pub range: Range<usize>,
    /// Byte range of the `src` attribute (name and value) in the document.
    pub src_range: Option<Range<usize>>,
    /// Decoded `src` value.
    pub src: Option<String>,
    /// Byte range of an existing [`FAILURE_ATTRIBUTE`], leading whitespace
    /// included.
    pub marker_range: Option<Range<usize>>,
}

impl ImgTag {
    /// Whether the tag already carries [`FAILURE_ATTRIBUTE`].
    pub fn has_failure_marker(&self) -> bool {
        self.marker_range.is_some()
    }
}

/// Find every `<img>` tag in document order.
pub fn find_img_tags(html: &str) -> Vec<ImgTag> {
    RE_IMG_TAG
        .find_iter(html)
        .map(|m| {
            let tag = m.as_str();
            // Skip "<img" itself; attributes start after it.
            let attrs_offset = 4;
            let attrs_end = tag.len() - 1;
            let attrs = &tag[attrs_offset..attrs_end];

            let mut src_range = None;
            let mut src = None;
            let mut marker_range = None;

            for caps in RE_ATTRIBUTE.captures_iter(attrs) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                let name = &caps[1];
                let start = m.start() + attrs_offset + whole.start();
                if name.eq_ignore_ascii_case("src") && src_range.is_none() {
                    let value = caps
                        .get(2)
                        .or_else(|| caps.get(3))
                        .or_else(|| caps.get(4))
                        .map(|v| v.as_str())
                        .unwrap_or("");
                    src_range = Some(start..start + whole.len());
                    src = Some(decode_entities(value));
                } else if name.eq_ignore_ascii_case(FAILURE_ATTRIBUTE) && marker_range.is_none() {
                    let mut from = start;
                    while from > m.start() + attrs_offset
                        && html.as_bytes()[from - 1].is_ascii_whitespace()
                    {
                        from -= 1;
                    }
                    marker_range = Some(from..start + whole.len());
                }
            }

            ImgTag {
                range: m.range(),
                src_range,
                src,
                marker_range,
            }
        })
        .collect()
}

/// A text replacement on a byte range of the original document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub replacement: String,
}

impl Edit {
    /// Replace the `src` attribute of `tag` with a data URI and drop a
    /// failure marker left by an earlier pass.
    pub fn set_src(tag: &ImgTag, data_uri: &str) -> Vec<Self> {
        let Some(range) = tag.src_range.clone() else {
            return Vec::new();
        };
        let mut edits = vec![Self {
            range,
            replacement: format!("src=\"{}\"", escape_attribute(data_uri)),
        }];
        if let Some(marker) = tag.marker_range.clone() {
            edits.push(Self {
                range: marker,
                replacement: String::new(),
            });
        }
        edits
    }

    /// Add the failure marker just before the end of `tag`.
    ///
    /// Returns `None` when the tag is already marked.
    pub fn mark_failed(tag: &ImgTag, html: &str) -> Option<Self> {
        if tag.has_failure_marker() {
            return None;
        }
        let text = &html[tag.range.clone()];
        let close_len = if is_self_closing(text) { 2 } else { 1 };
        let mut at = tag.range.end - close_len;
        // Keep whitespace before "/>" where it is.
        while at > tag.range.start && html.as_bytes()[at - 1].is_ascii_whitespace() {
            at -= 1;
        }
        Some(Self {
            range: at..at,
            replacement: format!(" {FAILURE_ATTRIBUTE}=\"{FAILURE_NOTICE}\""),
        })
    }
}

/// `/>` only closes the tag when it does not end an unquoted value
/// (`src=/a/b/>` keeps its trailing slash).
fn is_self_closing(tag: &str) -> bool {
    let Some(before) = tag.strip_suffix("/>") else {
        return false;
    };
    before.eq_ignore_ascii_case("<img")
        || before.ends_with(|c: char| c.is_ascii_whitespace() || c == '"' || c == '\'')
}

/// Apply non-overlapping edits to `html`. Everything outside the edited
/// ranges is copied through unchanged.
pub fn apply_edits(html: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.range.start, e.range.end));
    let extra: usize = edits.iter().map(|e| e.replacement.len()).sum();
    let mut out = String::with_capacity(html.len() + extra);
    let mut cursor = 0;
    for edit in edits {
        if edit.range.start < cursor {
            continue;
        }
        out.push_str(&html[cursor..edit.range.start]);
        out.push_str(&edit.replacement);
        cursor = edit.range.end;
    }
    out.push_str(&html[cursor..]);
    out
}

/// Insert `snippet` right after the opening `<head>` tag.
///
/// A `<head>` element is created after `<html>` (or at the very start) when
/// the document has none.
pub fn insert_into_head(html: &str, snippet: &str) -> String {
    if let Some(m) = RE_HEAD_OPEN.find(html) {
        return format!("{}{}{}", &html[..m.end()], snippet, &html[m.end()..]);
    }
    let head = format!("<head>{snippet}</head>");
    match RE_HTML_OPEN.find(html) {
        Some(m) => format!("{}{}{}", &html[..m.end()], head, &html[m.end()..]),
        None => format!("{head}{html}"),
    }
}

/// `<base href="...">` element for `href`.
pub fn base_element(href: &str) -> String {
    format!("<base href=\"{}\">", escape_attribute(href))
}

/// `<style>` element wrapping `css`.
pub fn style_element(css: &str) -> String {
    format!("<style>{}</style>", css.replace("</style", "<\\/style"))
}

/// Decode the character references that commonly appear in URLs.
pub fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
