//! Editor surface seam
//!
//! The session reads the editor's current markup, styles and asset catalog,
//! and patches live image nodes once uploads have produced durable URLs.

use folio_asset::{is_inline_source, AssetDescriptor};
use serde::{Deserialize, Serialize};

/// Markup and styles as currently shown in the editor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorDocument {
    /// Page markup
    pub markup: String,
    /// Page stylesheet
    pub styles: String,
}

impl EditorDocument {
    /// Create document
    #[inline]
    #[must_use]
    pub fn new(markup: impl Into<String>, styles: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            styles: styles.into(),
        }
    }
}

/// Entry in the editor's asset catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle {
    /// Image source (inline payload or durable URL)
    pub src: String,
    /// Name the user gave the file, if any
    pub name: Option<String>,
}

impl AssetHandle {
    /// Handle for an asset embedded by value
    #[inline]
    #[must_use]
    pub fn inline(name: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            name: Some(name.into()),
        }
    }

    /// Handle for an already-stored asset
    #[inline]
    #[must_use]
    pub fn durable(url: impl Into<String>) -> Self {
        Self {
            src: url.into(),
            name: None,
        }
    }

    /// Whether the source is still embedded by value
    #[inline]
    #[must_use]
    pub fn is_inline(&self) -> bool {
        is_inline_source(&self.src)
    }
}

/// Notification from the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// Content or styles changed
    ContentChanged,
    /// An asset entered the document
    AssetAdded(AssetHandle),
    /// An asset left the document
    AssetRemoved(AssetHandle),
}

/// Live editor the session works against
pub trait EditorSurface: Send + Sync {
    /// Current markup and styles
    fn document(&self) -> EditorDocument;

    /// Current asset catalog
    fn assets(&self) -> Vec<AssetHandle>;

    /// Point every live image whose source is `inline_src` at the durable
    /// asset, with its pixel size. Returns how many nodes were patched.
    fn patch_images(&self, inline_src: &str, descriptor: &AssetDescriptor) -> usize;

    /// Register the durable asset in the catalog, replacing the inline entry
    fn replace_catalog_entry(&self, inline_src: &str, descriptor: &AssetDescriptor);
}
