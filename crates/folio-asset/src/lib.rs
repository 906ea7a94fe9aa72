//! Folio Asset Model
//!
//! Leaf types shared by the markup rewriter and the save engine.
//!
//! # Core Concepts
//!
//! - [`DocumentScope`]: owner and document identifiers every key is scoped to
//! - [`AssetKey`]: opaque, deterministic name of one durable stored object
//! - [`AssetDescriptor`]: durable URL plus pixel dimensions of an uploaded image
//! - [`SubstitutionMap`]: inline identifier → descriptor for one upload batch
//! - [`SubstitutionCache`]: session-lifetime, add-only accumulator of batches
//! - [`InlineImage`]: decoded `data:` payload with content type and bytes
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_asset::{AssetKey, DocumentScope, InlineImage};
//!
//! let scope = DocumentScope::new("user-1", "mvp-42");
//! let image = InlineImage::parse(src)?;
//! let key = AssetKey::derive(&scope, "hero.png", image.bytes());
//! assert!(key.belongs_to(&scope));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod inline;
mod key;
mod substitution;

pub use error::{MalformedAssetError, MalformedReason};
pub use inline::{is_inline_image_source, is_inline_source, InlineImage, DATA_URL_SCHEME};
pub use key::{display_name, strip_query_and_fragment, AssetKey, DocumentScope};
pub use substitution::{AssetDescriptor, SubstitutionCache, SubstitutionMap};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::io::Cursor;

    fn png_data_url(width: u32, height: u32) -> String {
        use base64::Engine;

        let mut buf = Vec::new();
        image::RgbaImage::new(width, height)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&buf)
        )
    }

    #[test]
    fn inline_image_to_descriptor_lifecycle() {
        let scope = DocumentScope::new("owner", "doc");
        let src = png_data_url(12, 7);

        let image = InlineImage::parse(&src).unwrap();
        assert_eq!(image.dimensions().unwrap(), (12, 7));

        let key = AssetKey::derive(&scope, "Hero Shot.png", image.bytes());
        let url = format!("https://cdn.example.com/assets/{key}");
        assert_eq!(AssetKey::from_durable_url(&url, &scope), Some(key.clone()));

        let cache = SubstitutionCache::new();
        let mut batch = SubstitutionMap::new();
        batch.insert(src.clone(), AssetDescriptor::new(url.clone(), 12, 7));
        assert_eq!(cache.merge(&batch), 1);
        assert_eq!(cache.get(&src).map(|d| d.durable_url), Some(url));
    }
}
