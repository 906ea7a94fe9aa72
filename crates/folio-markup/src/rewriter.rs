//! Markup rewriter
//!
//! Turns editor markup into persistable markup:
//! - inline image sources are replaced by durable URLs and pixel sizes, in
//!   `src`, `srcset` and CSS `url()` alike; inline references with no durable
//!   counterpart are removed
//! - every image gets a non-empty `alt`
//! - responsive sizing hints are added once
//! - the first image loads eagerly with high priority, the rest lazily
//!
//! Pure, synchronous and deterministic. Re-running it on its own output is a
//! no-op.

use crate::alt_text::derive_alt_text;
use crate::css::substitute_css_urls;
use crate::srcset::substitute_srcset;
use crate::tag::{media_tags, MediaTag, TagKind};
use folio_asset::{is_inline_source, SubstitutionMap};

const RESPONSIVE_RULES: [(&str, &str); 2] = [("max-width", "100%"), ("height", "auto")];

/// Result of a rewrite pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewritten {
    /// Persistable markup
    pub markup: String,
    /// Images remaining in the output
    pub images: usize,
    /// Inline sources replaced with durable URLs (src, srcset and css)
    pub substituted: usize,
    /// Images dropped because their inline source had no substitution
    pub dropped_inline: usize,
    /// Inline `srcset` candidates and CSS `url()`s removed for the same reason
    pub dropped_references: usize,
    /// Images that received a derived `alt`
    pub alt_derived: usize,
}

/// Rewriter bound to one substitution table
#[derive(Debug, Clone, Copy)]
pub struct MarkupRewriter<'a> {
    substitutions: &'a SubstitutionMap,
}

enum ImageFate {
    Keep,
    Drop,
}

impl<'a> MarkupRewriter<'a> {
    /// Create rewriter
    #[inline]
    #[must_use]
    pub fn new(substitutions: &'a SubstitutionMap) -> Self {
        Self { substitutions }
    }

    /// Rewrite a markup fragment
    #[must_use]
    pub fn rewrite(&self, markup: &str) -> Rewritten {
        let css = substitute_css_urls(markup, self.substitutions);
        let source = css.text;

        let mut report = Rewritten {
            substituted: css.substituted,
            dropped_references: css.unresolved,
            ..Rewritten::default()
        };
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;

        for located in media_tags(&source) {
            let mut tag = located.tag;
            out.push_str(&source[cursor..located.range.start]);
            cursor = located.range.end;

            if tag.kind() == TagKind::Source {
                self.resolve_srcset(&mut tag, &mut report);
                out.push_str(&tag.render());
                continue;
            }

            match self.resolve_source(&mut tag, &mut report) {
                ImageFate::Drop => {
                    report.dropped_inline += 1;
                    continue;
                }
                ImageFate::Keep => {}
            }

            self.resolve_srcset(&mut tag, &mut report);
            if ensure_alt(&mut tag) {
                report.alt_derived += 1;
            }
            ensure_responsive_style(&mut tag);
            apply_loading_hints(&mut tag, report.images == 0);

            report.images += 1;
            out.push_str(&tag.render());
        }
        out.push_str(&source[cursor..]);

        if report.dropped_inline > 0 || report.dropped_references > 0 {
            tracing::warn!(
                images = report.dropped_inline,
                references = report.dropped_references,
                "dropped inline references that were never uploaded"
            );
        }

        report.markup = out;
        report
    }

    /// Rewrite a stylesheet's inline `url()` references
    #[must_use]
    pub fn rewrite_styles(&self, styles: &str) -> String {
        let css = substitute_css_urls(styles, self.substitutions);
        if css.unresolved > 0 {
            tracing::warn!(dropped = css.unresolved, "removed inline style urls that were never uploaded");
        }
        css.text
    }

    fn resolve_source(&self, tag: &mut MediaTag, report: &mut Rewritten) -> ImageFate {
        let Some(src) = tag.get("src") else {
            return ImageFate::Keep;
        };
        if !is_inline_source(&src) {
            return ImageFate::Keep;
        }
        let Some(descriptor) = self.substitutions.get(src.trim()) else {
            return ImageFate::Drop;
        };

        tag.set("src", &descriptor.durable_url);
        if descriptor.has_dimensions() {
            tag.set("width", &descriptor.width.to_string());
            tag.set("height", &descriptor.height.to_string());
        }
        report.substituted += 1;
        ImageFate::Keep
    }

    fn resolve_srcset(&self, tag: &mut MediaTag, report: &mut Rewritten) {
        let Some(srcset) = tag.get("srcset") else {
            return;
        };
        let Some(rewritten) = substitute_srcset(&srcset, self.substitutions) else {
            return;
        };
        report.substituted += rewritten.substituted;
        report.dropped_references += rewritten.dropped;
        match rewritten.value {
            Some(value) => tag.set("srcset", &value),
            None => tag.remove("srcset"),
        }
    }
}

/// Rewrite markup with a substitution table
#[must_use]
pub fn rewrite(markup: &str, substitutions: &SubstitutionMap) -> String {
    MarkupRewriter::new(substitutions).rewrite(markup).markup
}

fn ensure_alt(tag: &mut MediaTag) -> bool {
    if tag.get("alt").is_some_and(|alt| !alt.trim().is_empty()) {
        return false;
    }
    let alt = derive_alt_text(&tag.get("src").unwrap_or_default());
    tag.set("alt", &alt);
    true
}

fn ensure_responsive_style(tag: &mut MediaTag) {
    let existing = tag.raw("style").unwrap_or_default().to_string();
    let declarations: Vec<&str> = existing
        .split(';')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();

    let missing: Vec<String> = RESPONSIVE_RULES
        .iter()
        .filter(|(property, _)| !declarations.iter().any(|d| declares(d, property)))
        .map(|(property, value)| format!("{property}: {value}"))
        .collect();

    if missing.is_empty() {
        return;
    }

    let mut style = declarations.join("; ");
    for declaration in missing {
        if !style.is_empty() {
            style.push_str("; ");
        }
        style.push_str(&declaration);
    }
    style.push(';');
    tag.set_raw("style", style);
}

fn declares(declaration: &str, property: &str) -> bool {
    declaration
        .split_once(':')
        .is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case(property))
}

fn apply_loading_hints(tag: &mut MediaTag, first: bool) {
    if first {
        tag.set("loading", "eager");
        tag.set("fetchpriority", "high");
        tag.remove("decoding");
    } else {
        tag.set("loading", "lazy");
        tag.set("decoding", "async");
        tag.remove("fetchpriority");
    }
}
