//! Image encoding: raw bytes → `data:` URI.
//!
//! The MIME type comes from the extension the image was *requested* with, not
//! from sniffing the payload. The extension already passed the allow-list, so
//! the table below is the single source of truth for both checks.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Allowed image extensions and their MIME types. Matching is case-sensitive.
pub const ALLOWED_IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("svg", "image/svg+xml"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("ico", "image/x-icon"),
    ("tiff", "image/tiff"),
];

/// MIME type for an allowed extension, `None` for anything else.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    ALLOWED_IMAGE_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// Extension of the last path segment (`"a/b.tar.png"` → `"png"`).
///
/// Returns an empty string when the segment has no dot.
pub fn extension_of(url: &str) -> &str {
    let segment = url.rsplit('/').next().unwrap_or(url);
    match segment.rfind('.') {
        Some(i) => &segment[i + 1..],
        None => "",
    }
}

/// Wrap `bytes` in a base64 `data:` URI.
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} bytes of {} → {} bytes base64", bytes.len(), mime, b64.len());
    format!("data:{mime};base64,{b64}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_lookup_is_case_sensitive() {
        assert_eq!(mime_for_extension("png"), Some("image/png"));
        assert_eq!(mime_for_extension("jpeg"), Some("image/jpeg"));
        assert_eq!(mime_for_extension("svg"), Some("image/svg+xml"));
        assert_eq!(mime_for_extension("ico"), Some("image/x-icon"));
        assert_eq!(mime_for_extension("PNG"), None);
        assert_eq!(mime_for_extension("php"), None);
        assert_eq!(mime_for_extension(""), None);
    }

    #[test]
    fn test_extension_of_last_segment_only() {
        assert_eq!(extension_of("http://h/a.dir/image.png"), "png");
        assert_eq!(extension_of("http://h/a.dir/image"), "");
        assert_eq!(extension_of("http://h/archive.tar.gz"), "gz");
        assert_eq!(extension_of("http://h/dir/"), "");
    }

    #[test]
    fn test_data_uri_round_trips_through_base64() {
        let uri = to_data_uri("image/gif", b"GIF89a");
        assert!(uri.starts_with("data:image/gif;base64,"));
        let payload = uri.trim_start_matches("data:image/gif;base64,");
        assert_eq!(STANDARD.decode(payload).unwrap(), b"GIF89a");
    }
}
