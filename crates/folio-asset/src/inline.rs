//! Inline (`data:` URL) image payloads
//!
//! Editors embed freshly dropped or pasted images by value. Before such an
//! image can be persisted it has to be decoded into a content type and raw
//! bytes, and its pixel size read from the image header.

use crate::error::MalformedReason;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use std::io::Cursor;

/// Scheme prefix of inline sources
pub const DATA_URL_SCHEME: &str = "data:";

/// Check whether an image source is embedded by value
#[must_use]
pub fn is_inline_source(src: &str) -> bool {
    src.trim_start()
        .get(..DATA_URL_SCHEME.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(DATA_URL_SCHEME))
}

/// Check whether a CSS `url()` target is an image embedded by value
///
/// Stylesheets also inline fonts and cursors; only `data:image/...` counts.
#[must_use]
pub fn is_inline_image_source(src: &str) -> bool {
    const PREFIX: &str = "data:image/";
    src.trim_start()
        .get(..PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(PREFIX))
}

/// Decoded inline image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    content_type: String,
    bytes: Vec<u8>,
}

impl InlineImage {
    /// Parse a `data:[<type>][;base64],<payload>` source
    ///
    /// # Errors
    /// Returns the first [`MalformedReason`] encountered.
    pub fn parse(src: &str) -> Result<Self, MalformedReason> {
        let src = src.trim();
        if !is_inline_source(src) {
            return Err(MalformedReason::NotDataUrl);
        }
        let rest = &src[DATA_URL_SCHEME.len()..];
        let (meta, payload) = rest.split_once(',').ok_or(MalformedReason::MissingComma)?;

        let mut params = meta.split(';');
        let content_type = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

        if !content_type.starts_with("image/") {
            let shown = if content_type.is_empty() {
                "text/plain".to_string()
            } else {
                content_type
            };
            return Err(MalformedReason::NotAnImage(shown));
        }

        let bytes = if is_base64 {
            decode_base64(payload)?
        } else {
            urlencoding::decode_binary(payload.as_bytes()).into_owned()
        };

        if bytes.is_empty() {
            return Err(MalformedReason::EmptyPayload);
        }

        Ok(Self {
            content_type,
            bytes,
        })
    }

    /// MIME type, lowercased
    #[inline]
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Raw payload
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into raw payload
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Whether the payload is vector graphics
    #[inline]
    #[must_use]
    pub fn is_svg(&self) -> bool {
        self.content_type == "image/svg+xml"
    }

    /// File extension conventionally used for the content type
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            "image/avif" => "avif",
            "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
            _ => "img",
        }
    }

    /// Pixel dimensions from the image header
    ///
    /// SVG has no intrinsic raster size and reports `(0, 0)`.
    ///
    /// # Errors
    /// [`MalformedReason::UnreadableImage`] if the header cannot be decoded.
    pub fn dimensions(&self) -> Result<(u32, u32), MalformedReason> {
        if self.is_svg() {
            return Ok((0, 0));
        }
        image::ImageReader::new(Cursor::new(&self.bytes))
            .with_guessed_format()
            .map_err(|_| MalformedReason::UnreadableImage)?
            .into_dimensions()
            .map_err(|_| MalformedReason::UnreadableImage)
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, MalformedReason> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let compact = urlencoding::decode(&compact)
        .map(|s| s.into_owned())
        .unwrap_or(compact);
    STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=').as_bytes()))
        .map_err(|e| MalformedReason::InvalidBase64(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_image_source_excludes_other_payloads() {
        assert!(is_inline_image_source("  DATA:image/png;base64,AAAA"));
        assert!(is_inline_image_source("data:image/svg+xml,%3Csvg%2F%3E"));
        assert!(!is_inline_image_source("data:font/woff2;base64,d09G"));
        assert!(!is_inline_image_source("https://cdn/a.png"));
        assert!(is_inline_source("data:font/woff2;base64,d09G"));
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        image::RgbaImage::new(width, height)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn inline_detection() {
        assert!(is_inline_source("data:image/png;base64,AAAA"));
        assert!(is_inline_source("  DATA:image/png,x"));
        assert!(!is_inline_source("https://cdn.example.com/a.png"));
        assert!(!is_inline_source("dat"));
    }

    #[test]
    fn parse_base64_png() {
        let bytes = png_bytes(5, 3);
        let src = format!("data:image/png;base64,{}", STANDARD.encode(&bytes));
        let image = InlineImage::parse(&src).unwrap();

        assert_eq!(image.content_type(), "image/png");
        assert_eq!(image.bytes(), bytes.as_slice());
        assert_eq!(image.extension(), "png");
        assert_eq!(image.dimensions().unwrap(), (5, 3));
    }

    #[test]
    fn parse_tolerates_whitespace_and_missing_padding() {
        let bytes = png_bytes(2, 2);
        let encoded = STANDARD_NO_PAD.encode(&bytes);
        let (head, tail) = encoded.split_at(10);
        let src = format!("data:image/png;base64,{head}\n  {tail}");
        assert_eq!(InlineImage::parse(&src).unwrap().bytes(), bytes.as_slice());
    }

    #[test]
    fn parse_percent_encoded_svg() {
        let src = "data:image/svg+xml,%3Csvg%20xmlns%3D%22http%3A%2F%2Fwww.w3.org%2F2000%2Fsvg%22%2F%3E";
        let image = InlineImage::parse(src).unwrap();
        assert!(image.is_svg());
        assert!(String::from_utf8_lossy(image.bytes()).starts_with("<svg"));
        assert_eq!(image.dimensions().unwrap(), (0, 0));
        assert_eq!(image.extension(), "svg");
    }

    #[test]
    fn parse_rejects_malformed_sources() {
        assert_eq!(InlineImage::parse("https://x/a.png"), Err(MalformedReason::NotDataUrl));
        assert_eq!(InlineImage::parse("data:image/png;base64"), Err(MalformedReason::MissingComma));
        assert_eq!(
            InlineImage::parse("data:text/html,<b>hi</b>"),
            Err(MalformedReason::NotAnImage("text/html".into()))
        );
        assert_eq!(
            InlineImage::parse("data:,hello"),
            Err(MalformedReason::NotAnImage("text/plain".into()))
        );
        assert_eq!(InlineImage::parse("data:image/png;base64,"), Err(MalformedReason::EmptyPayload));
        assert!(matches!(
            InlineImage::parse("data:image/png;base64,!!!not-base64!!!"),
            Err(MalformedReason::InvalidBase64(_))
        ));
    }

    #[test]
    fn garbage_raster_is_unreadable() {
        let src = format!("data:image/png;base64,{}", STANDARD.encode(b"definitely not a png"));
        let image = InlineImage::parse(&src).unwrap();
        assert_eq!(image.dimensions(), Err(MalformedReason::UnreadableImage));
    }
}
