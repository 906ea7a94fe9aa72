//! Structural tokenization of media tags
//!
//! Only the tags the rewriter cares about are tokenized; everything between
//! them is copied through untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Opening of an `<img` / `<source` start tag
static MEDIA_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(img|source)\b").expect("valid media tag regex"));

/// Kind of media element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    Img,
    Source,
}

/// Single attribute, value kept exactly as written (entities intact)
#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    name: String,
    value: Option<String>,
}

/// Parsed media start tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MediaTag {
    kind: TagKind,
    attributes: Vec<Attribute>,
    self_closing: bool,
}

/// Media tag located in a markup string
#[derive(Debug)]
pub(crate) struct LocatedTag {
    pub(crate) range: Range<usize>,
    pub(crate) tag: MediaTag,
}

/// Iterate media tags in document order
///
/// Attributes are read the way an HTML tokenizer reads them: a quote only
/// opens a value directly after `=`, so a stray apostrophe inside an
/// unquoted value cannot hide the rest of the tag. An unterminated tag runs
/// to the end of the markup.
pub(crate) fn media_tags(markup: &str) -> impl Iterator<Item = LocatedTag> + '_ {
    let mut cursor = 0;
    std::iter::from_fn(move || {
        let caps = MEDIA_OPEN.captures_at(markup, cursor)?;
        let whole = caps.get(0)?;
        let kind = if caps[1].eq_ignore_ascii_case("img") {
            TagKind::Img
        } else {
            TagKind::Source
        };
        let (attributes, self_closing, end) = scan_attributes(markup, whole.end());
        cursor = end;
        Some(LocatedTag {
            range: whole.start()..end,
            tag: MediaTag {
                kind,
                attributes,
                self_closing,
            },
        })
    })
}

/// Read attributes from `start` up to and including the closing `>`
///
/// Returns the attributes, whether the tag ended in `/>`, and the offset
/// just past the tag.
fn scan_attributes(markup: &str, start: usize) -> (Vec<Attribute>, bool, usize) {
    let bytes = markup.as_bytes();
    let len = bytes.len();
    let skip_space = |mut i: usize| {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    let mut attributes = Vec::new();
    let mut self_closing = false;
    let mut i = start;

    loop {
        i = skip_space(i);
        match bytes.get(i) {
            None => return (attributes, self_closing, len),
            Some(b'>') => return (attributes, self_closing, i + 1),
            Some(b'/') => {
                i += 1;
                self_closing = bytes.get(i) == Some(&b'>');
                continue;
            }
            Some(b'=') => {
                i += 1;
                continue;
            }
            Some(_) => self_closing = false,
        }

        let name_start = i;
        while i < len && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'/' | b'>' | b'=') {
            i += 1;
        }
        let name = markup[name_start..i].to_string();

        let after_name = skip_space(i);
        if bytes.get(after_name) != Some(&b'=') {
            attributes.push(Attribute { name, value: None });
            continue;
        }

        let value_start = skip_space(after_name + 1);
        let value = match bytes.get(value_start) {
            Some(&quote) if quote == b'"' || quote == b'\'' => {
                let open = value_start + 1;
                let close = markup[open..].find(char::from(quote)).map_or(len, |at| open + at);
                i = (close + 1).min(len);
                &markup[open..close]
            }
            Some(_) => {
                i = value_start;
                while i < len && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                &markup[value_start..i]
            }
            None => {
                i = len;
                ""
            }
        };
        attributes.push(Attribute {
            name,
            value: Some(value.to_string()),
        });
    }
}

impl MediaTag {
    pub(crate) fn kind(&self) -> TagKind {
        self.kind
    }

    /// Attribute value with entities decoded; `Some("")` for bare attributes
    pub(crate) fn get(&self, name: &str) -> Option<String> {
        self.find(name)
            .map(|a| a.value.as_deref().map(unescape_attr).unwrap_or_default())
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Set attribute to a plain (unescaped) value, in place if present
    pub(crate) fn set(&mut self, name: &str, value: &str) {
        let escaped = escape_attr(value);
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(attr) => attr.value = Some(escaped),
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value: Some(escaped),
            }),
        }
    }

    /// Raw (still escaped) value, for rewriting without a decode/encode trip
    pub(crate) fn raw(&self, name: &str) -> Option<&str> {
        self.find(name).and_then(|a| a.value.as_deref())
    }

    /// Replace a value that is already attribute-escaped
    pub(crate) fn set_raw(&mut self, name: &str, raw: String) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(attr) => attr.value = Some(raw),
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value: Some(raw),
            }),
        }
    }

    pub(crate) fn remove(&mut self, name: &str) {
        self.attributes.retain(|a| !a.name.eq_ignore_ascii_case(name));
    }

    /// Serialize with every value double-quoted
    pub(crate) fn render(&self) -> String {
        let mut out = String::from(match self.kind {
            TagKind::Img => "<img",
            TagKind::Source => "<source",
        });
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            if let Some(value) = &attr.value {
                out.push_str("=\"");
                out.push_str(&value.replace('"', "&quot;"));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
        out
    }

    fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// Escape a plain value for a double-quoted attribute
pub(crate) fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the handful of entities that appear in attribute values
pub(crate) fn unescape_attr(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
