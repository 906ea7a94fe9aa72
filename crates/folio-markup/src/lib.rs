//! Folio Markup
//!
//! Pure transformations and queries over the markup a landing-page editor
//! emits. Nothing here performs I/O or holds state.
//!
//! # Core Operations
//!
//! - **Rewrite**: [`rewrite`] / [`MarkupRewriter`] make markup persistable
//!   (durable sources, alt text, sizing and loading hints)
//! - **Inspect**: [`inline_image_sources`] and [`durable_references`] report
//!   what the markup points at, structurally rather than textually
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_markup::{inline_image_sources, rewrite};
//!
//! let persisted = rewrite(&editor_html, &substitutions);
//! assert!(inline_image_sources(&persisted).is_empty());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod alt_text;
mod css;
mod references;
mod rewriter;
mod srcset;
mod tag;

pub use alt_text::{derive_alt_text, FALLBACK_ALT};
pub use css::{css_urls, inline_css_sources, substitute_css_urls, CssRewrite};
pub use references::{durable_references, image_count, inline_image_sources};
pub use rewriter::{rewrite, MarkupRewriter, Rewritten};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether markup has nothing worth persisting
///
/// Empty, whitespace-only, or a bare `<body>` wrapper around whitespace.
#[must_use]
pub fn is_blank_markup(markup: &str) -> bool {
    let trimmed = markup.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("<body") && lower.ends_with("</body>")) {
        return false;
    }
    let Some(open_end) = trimmed.find('>') else {
        return false;
    };
    let close_start = trimmed.len() - "</body>".len();
    if open_end + 1 > close_start {
        return false;
    }
    trimmed[open_end + 1..close_start].trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_markup_detection() {
        assert!(is_blank_markup(""));
        assert!(is_blank_markup("  \n "));
        assert!(is_blank_markup("<body></body>"));
        assert!(is_blank_markup("<body id=\"x\">\n</BODY>"));
        assert!(!is_blank_markup("<body><p>hi</p></body>"));
        assert!(!is_blank_markup("<div></div>"));
    }
}
