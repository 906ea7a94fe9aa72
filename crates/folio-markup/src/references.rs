//! Structural queries over image references in markup

use crate::css::{css_urls, inline_css_sources};
use crate::srcset::{durable_candidates, inline_candidates};
use crate::tag::{media_tags, TagKind};
use folio_asset::is_inline_source;

/// Every inline image reference, without duplicates
///
/// Covers `<img src>`, `srcset` candidates on `<img>` and `<source>`, and CSS
/// `url()` targets in `style` attributes and `<style>` blocks. Tag references
/// come first in document order, then CSS ones.
///
/// This is the structural check behind the rewriter's guarantee: persisted
/// markup must make this return an empty list.
#[must_use]
pub fn inline_image_sources(markup: &str) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    let mut push = |src: String| {
        if !sources.contains(&src) {
            sources.push(src);
        }
    };

    for located in media_tags(markup) {
        let tag = &located.tag;
        if tag.kind() == TagKind::Img {
            if let Some(src) = tag.get("src").filter(|src| is_inline_source(src)) {
                push(src.trim().to_string());
            }
        }
        if let Some(srcset) = tag.get("srcset") {
            inline_candidates(&srcset).into_iter().for_each(&mut push);
        }
    }
    inline_css_sources(markup).into_iter().for_each(&mut push);
    sources
}

/// Number of `<img>` elements
#[must_use]
pub fn image_count(markup: &str) -> usize {
    media_tags(markup)
        .filter(|t| t.tag.kind() == TagKind::Img)
        .count()
}

/// Every non-inline image URL the markup refers to
///
/// Covers `<img src>`, `srcset` candidates on `<img>` and `<source>`, and CSS
/// `url()` targets in `style` attributes and `<style>` blocks. Duplicates are
/// kept; order is document order per source kind.
#[must_use]
pub fn durable_references(markup: &str) -> Vec<String> {
    let mut urls = Vec::new();

    for located in media_tags(markup) {
        let tag = &located.tag;
        if tag.kind() == TagKind::Img {
            if let Some(src) = tag.get("src") {
                let src = src.trim();
                if !src.is_empty() && !is_inline_source(src) {
                    urls.push(src.to_string());
                }
            }
        }
        if let Some(srcset) = tag.get("srcset") {
            urls.extend(durable_candidates(&srcset));
        }
    }

    urls.extend(
        css_urls(markup)
            .into_iter()
            .map(|url| url.replace("&amp;", "&"))
            .filter(|url| !is_inline_source(url)),
    );
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_inline_sources_structurally() {
        let markup = r#"<p>data:image/png;base64,notanimage</p>
            <img src="data:image/png;base64,AAAA">
            <img SRC='https://cdn/a.png'>
            <img alt="x" src=data:image/gif;base64,R0lG>"#;
        assert_eq!(
            inline_image_sources(markup),
            vec!["data:image/png;base64,AAAA", "data:image/gif;base64,R0lG"]
        );
        assert_eq!(image_count(markup), 3);
    }

    #[test]
    fn finds_inline_sources_in_srcset_and_css() {
        let markup = r#"<picture><source srcset="data:image/webp;base64,UklG 1x, /a.webp 2x"></picture>
            <img alt=it's src="data:image/png;base64,AAAA">
            <div style="background:url('data:image/png;base64,AAAA')"></div>
            <style>.hero{background:url(data:image/gif;base64,R0lG)} @font-face{src:url(data:font/woff2;base64,d09G)}</style>"#;
        assert_eq!(
            inline_image_sources(markup),
            vec![
                "data:image/webp;base64,UklG",
                "data:image/png;base64,AAAA",
                "data:image/gif;base64,R0lG",
            ]
        );
    }

    #[test]
    fn collects_durable_references_from_all_sources() {
        let markup = r#"<img src="https://cdn/a.png" srcset="https://cdn/a-2x.png 2x, https://cdn/a-3x.png 3x">
            <picture><source srcset="https://cdn/b.webp"></picture>
            <div style="background:url(&quot;https://cdn/c.png?x=1&amp;y=2&quot;)"></div>
            <img src="data:image/png;base64,AAAA">
            <style>.hero{background-image:url('https://cdn/d.png')}</style>"#;
        assert_eq!(
            durable_references(markup),
            vec![
                "https://cdn/a.png",
                "https://cdn/a-2x.png",
                "https://cdn/a-3x.png",
                "https://cdn/b.webp",
                "https://cdn/c.png?x=1&y=2",
                "https://cdn/d.png",
            ]
        );
    }

    #[test]
    fn empty_markup_has_no_references() {
        assert!(durable_references("").is_empty());
        assert!(inline_image_sources("<p>hi</p>").is_empty());
    }
}
