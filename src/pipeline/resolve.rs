//! URL normalisation: resolve image references against the page base.
//!
//! Report pages reference images in every way HTML allows: absolute URLs,
//! root-relative paths, document-relative paths with `./` and `../`, and
//! bare fragments. [`resolve_url`] turns all of them into absolute URLs with a
//! small string algorithm. No network or filesystem access happens here.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::Url;

static RE_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap());

static RE_EMPTY_OR_DOT_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\.?/").unwrap());

static RE_PARENT_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/([^/]+)/\.\./").unwrap());

/// Resolve a possibly relative `url` against `base`.
///
/// * URLs that carry a scheme are returned unchanged.
/// * `#fragment` and `?query` references are appended to `base` verbatim.
/// * Everything else is joined onto the directory of `base` (or its root for
///   `/`-prefixed paths) and dot segments are collapsed.
///
/// ```rust
/// use quiz_archiver::resolve_url;
///
/// assert_eq!(resolve_url("/x/y.png", "http://host/a/b/"), "http://host/x/y.png");
/// assert_eq!(resolve_url("../c.png", "http://host/a/b/"), "http://host/a/c.png");
/// ```
pub fn resolve_url(url: &str, base: &str) -> String {
    if RE_SCHEME.is_match(url) {
        return url.to_string();
    }
    if url.starts_with('#') || url.starts_with('?') {
        return format!("{base}{url}");
    }

    let base = BaseParts::parse(base);

    // Network-path reference: only the scheme is inherited.
    if url.starts_with("//") {
        return format!("{}:{}", base.scheme, url);
    }

    let mut dir = match base.path.rfind('/') {
        Some(i) => &base.path[..i],
        None => "",
    };
    if url.starts_with('/') {
        dir = "";
    }

    let joined = format!("{}{}/{}", base.authority, dir, url);
    format!("{}://{}", base.scheme, collapse_dot_segments(&joined))
}

/// Repeatedly collapse `//`, `/./` and `/segment/../` until stable.
pub(crate) fn collapse_dot_segments(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = RE_EMPTY_OR_DOT_SEGMENT.replace_all(&current, "/");
        let next = RE_PARENT_SEGMENT
            .replace_all(&next, |caps: &Captures<'_>| {
                if &caps[1] == ".." {
                    caps[0].to_string()
                } else {
                    "/".to_string()
                }
            })
            .into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Drop `?query` and `#fragment` from a URL.
pub fn strip_query_and_fragment(url: &str) -> &str {
    match url.find(['?', '#']) {
        Some(i) => &url[..i],
        None => url,
    }
}

/// `scheme://host[:port]` of an absolute URL, if it has one.
pub fn origin_of(url: &str) -> Option<String> {
    let origin = Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Move `url` onto the scheme, host and port of `to` when it shares its
/// origin with `from`. URLs on other origins and relative URLs are returned
/// unchanged.
pub fn rewrite_origin(url: &str, from: &str, to: &str) -> String {
    let (Ok(mut parsed), Ok(from), Ok(to)) = (Url::parse(url), Url::parse(from), Url::parse(to))
    else {
        return url.to_string();
    };
    if parsed.origin() != from.origin() {
        return url.to_string();
    }

    let moved = parsed.set_scheme(to.scheme()).is_ok()
        && parsed.set_host(to.host_str()).is_ok()
        && parsed.set_port(to.port()).is_ok();
    if moved {
        parsed.to_string()
    } else {
        url.to_string()
    }
}

/// The pieces of a base URL the resolver needs.
struct BaseParts {
    scheme: String,
    /// `host[:port]`; the port is kept only when it is not the default.
    authority: String,
    path: String,
}

impl BaseParts {
    fn parse(base: &str) -> Self {
        // A base without scheme is treated as plain http.
        let parsed = if base.contains("://") {
            Url::parse(base)
        } else {
            Url::parse(&format!("http://{base}"))
        };

        match parsed {
            Ok(url) => {
                let host = url.host_str().unwrap_or_default();
                let authority = match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                Self {
                    scheme: url.scheme().to_string(),
                    authority,
                    path: url.path().to_string(),
                }
            }
            Err(_) => Self {
                scheme: "http".to_string(),
                authority: String::new(),
                path: String::new(),
            },
        }
    }
}
