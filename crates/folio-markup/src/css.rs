//! `url(...)` references inside stylesheets and `style` attributes

use folio_asset::{is_inline_image_source, SubstitutionMap};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `url(...)` with `"`, `'`, `&quot;` or no quoting
static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|&quot;(.*?)&quot;|([^)"'\s]*))\s*\)"#)
        .expect("valid css url regex")
});

/// Outcome of substituting inline `url()` references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CssRewrite {
    /// Rewritten text
    pub text: String,
    /// Inline references replaced with durable URLs
    pub substituted: usize,
    /// Inline references with no substitution entry (replaced by `none`)
    pub unresolved: usize,
}

/// Replace inline image `url()` references with their durable URLs
///
/// The original quoting is preserved so the result stays valid inside a
/// double-quoted `style` attribute. A reference with no substitution entry
/// becomes `none`, which every image-valued property accepts.
#[must_use]
pub fn substitute_css_urls(text: &str, substitutions: &SubstitutionMap) -> CssRewrite {
    let mut substituted = 0;
    let mut unresolved = 0;

    let rewritten = CSS_URL.replace_all(text, |caps: &Captures<'_>| {
        let (value, open, close) = url_parts(caps);
        if !is_inline_image_source(value) {
            return caps[0].to_string();
        }
        match substitutions.get(value.trim()) {
            Some(descriptor) => {
                substituted += 1;
                format!("url({open}{}{close})", descriptor.durable_url)
            }
            None => {
                unresolved += 1;
                "none".to_string()
            }
        }
    });

    CssRewrite {
        text: rewritten.into_owned(),
        substituted,
        unresolved,
    }
}

/// Every `url()` target in the text, in order
#[must_use]
pub fn css_urls(text: &str) -> Vec<String> {
    CSS_URL
        .captures_iter(text)
        .map(|caps| url_parts(&caps).0.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

/// Inline image `url()` targets in the text, in order
#[must_use]
pub fn inline_css_sources(text: &str) -> Vec<String> {
    css_urls(text)
        .into_iter()
        .filter(|url| is_inline_image_source(url))
        .collect()
}

fn url_parts<'t>(caps: &Captures<'t>) -> (&'t str, &'static str, &'static str) {
    if let Some(m) = caps.get(1) {
        (m.as_str(), "\"", "\"")
    } else if let Some(m) = caps.get(2) {
        (m.as_str(), "'", "'")
    } else if let Some(m) = caps.get(3) {
        (m.as_str(), "&quot;", "&quot;")
    } else {
        (caps.get(4).map_or("", |m| m.as_str()), "", "")
    }
}
