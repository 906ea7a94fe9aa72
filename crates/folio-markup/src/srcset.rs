//! `srcset` candidate lists
//!
//! A candidate's URL runs to the next whitespace, so the comma inside a
//! `data:` URL does not split it. Descriptors run to the next comma.

use folio_asset::{is_inline_source, SubstitutionMap};

/// One `url [descriptor]` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate<'a> {
    pub(crate) url: &'a str,
    pub(crate) descriptor: &'a str,
}

pub(crate) fn parse_srcset(srcset: &str) -> Vec<Candidate<'_>> {
    let mut candidates = Vec::new();
    let mut rest = srcset;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            return candidates;
        }
        let url_end = rest.find(|c: char| c.is_ascii_whitespace()).unwrap_or(rest.len());
        let url = &rest[..url_end];
        rest = &rest[url_end..];

        if let Some(url) = url.strip_suffix(',') {
            candidates.push(Candidate {
                url: url.trim_end_matches(','),
                descriptor: "",
            });
            continue;
        }

        let descriptor_end = rest.find(',').unwrap_or(rest.len());
        candidates.push(Candidate {
            url,
            descriptor: rest[..descriptor_end].trim(),
        });
        rest = &rest[descriptor_end..];
    }
}

/// Inline candidate URLs
pub(crate) fn inline_candidates(srcset: &str) -> Vec<String> {
    parse_srcset(srcset)
        .into_iter()
        .filter(|c| is_inline_source(c.url))
        .map(|c| c.url.to_string())
        .collect()
}

/// Non-inline candidate URLs
pub(crate) fn durable_candidates(srcset: &str) -> Vec<String> {
    parse_srcset(srcset)
        .into_iter()
        .filter(|c| !c.url.is_empty() && !is_inline_source(c.url))
        .map(|c| c.url.to_string())
        .collect()
}

/// Result of substituting a `srcset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SrcsetRewrite {
    /// New value, `None` if no candidate survived
    pub(crate) value: Option<String>,
    pub(crate) substituted: usize,
    pub(crate) dropped: usize,
}

/// Swap inline candidates for durable URLs and drop those with no entry
///
/// Returns `None` when the list holds no inline candidate, so untouched
/// lists keep their original spacing.
pub(crate) fn substitute_srcset(srcset: &str, substitutions: &SubstitutionMap) -> Option<SrcsetRewrite> {
    let candidates = parse_srcset(srcset);
    if !candidates.iter().any(|c| is_inline_source(c.url)) {
        return None;
    }

    let mut substituted = 0;
    let mut dropped = 0;
    let kept: Vec<String> = candidates
        .into_iter()
        .filter_map(|c| {
            let url = if is_inline_source(c.url) {
                let Some(descriptor) = substitutions.get(c.url) else {
                    dropped += 1;
                    return None;
                };
                substituted += 1;
                descriptor.durable_url.as_str()
            } else {
                c.url
            };
            Some(if c.descriptor.is_empty() {
                url.to_string()
            } else {
                format!("{url} {}", c.descriptor)
            })
        })
        .collect();

    Some(SrcsetRewrite {
        value: (!kept.is_empty()).then(|| kept.join(", ")),
        substituted,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_asset::AssetDescriptor;

    const INLINE: &str = "data:image/png;base64,AAAA";

    #[test]
    fn inline_candidate_keeps_its_comma() {
        let set = format!("{INLINE} 1x, /b.png 2x,/c.png");
        let parsed = parse_srcset(&set);
        assert_eq!(
            parsed,
            vec![
                Candidate { url: INLINE, descriptor: "1x" },
                Candidate { url: "/b.png", descriptor: "2x" },
                Candidate { url: "/c.png", descriptor: "" },
            ]
        );
        assert_eq!(inline_candidates(&set), vec![INLINE]);
        assert_eq!(durable_candidates(&set), vec!["/b.png", "/c.png"]);
    }

    #[test]
    fn trailing_comma_ends_candidate() {
        let parsed = parse_srcset("/a.png, /b.png 2x");
        assert_eq!(parsed[0], Candidate { url: "/a.png", descriptor: "" });
        assert_eq!(parsed[1], Candidate { url: "/b.png", descriptor: "2x" });
    }

    #[test]
    fn substitutes_known_and_drops_unknown() {
        let map: SubstitutionMap = [(INLINE.to_string(), AssetDescriptor::new("https://cdn/a.png", 1, 1))]
            .into_iter()
            .collect();
        let set = format!("{INLINE} 1x, data:image/gif;base64,R0lG 2x, /c.png 3x");
        let out = substitute_srcset(&set, &map).unwrap();
        assert_eq!(out.value.as_deref(), Some("https://cdn/a.png 1x, /c.png 3x"));
        assert_eq!((out.substituted, out.dropped), (1, 1));

        assert_eq!(substitute_srcset("/a.png 1x,/b.png 2x", &map), None);
        let emptied = substitute_srcset("data:image/gif;base64,R0lG", &map).unwrap();
        assert_eq!(emptied.value, None);
    }
}
