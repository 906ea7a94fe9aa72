//! Accessibility labels derived from image URLs

use folio_asset::{display_name, is_inline_source, strip_query_and_fragment};

/// Label used when nothing readable can be derived
pub const FALLBACK_ALT: &str = "Image";

/// Derive a readable label from an image URL's file name
///
/// `https://cdn/x/3fa9c0d1e2b4a6f7-team%20photo_2024.jpg` → `"team photo 2024"`
#[must_use]
pub fn derive_alt_text(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() || is_inline_source(url) {
        return FALLBACK_ALT.to_string();
    }

    let path = strip_query_and_fragment(url).trim_end_matches('/');
    let segment = path.rsplit('/').next().unwrap_or(path);
    let decoded = urlencoding::decode(segment).map_or_else(|_| segment.to_string(), |s| s.into_owned());
    let name = display_name(&decoded);

    let stem = match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => name,
    };

    let words: Vec<&str> = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        FALLBACK_ALT.to_string()
    } else {
        words.join(" ")
    }
}
