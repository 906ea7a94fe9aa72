//! Durable asset addressing
//!
//! Provides [`AssetKey`], the sole identity of a stored object, and
//! [`DocumentScope`], the owning document every key is nested under.
//!
//! Key layout: `"{owner}/{document}/{hash16}-{encoded-name}"`.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Length of the hex content prefix in a key's file name
const CONTENT_PREFIX_LEN: usize = 16;

/// Owning document identifiers
///
/// Keys are only ever derived and recognized inside one scope, so a session
/// never touches objects that belong to another document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentScope {
    owner_id: String,
    document_id: String,
}

impl DocumentScope {
    /// Create scope for an owner's document
    #[inline]
    #[must_use]
    pub fn new(owner_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            document_id: document_id.into(),
        }
    }

    /// Owner identifier
    #[inline]
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Document identifier
    #[inline]
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Prefix shared by every key of this document (ends with `/`)
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!(
            "{}/{}/",
            urlencoding::encode(&self.owner_id),
            urlencoding::encode(&self.document_id)
        )
    }
}

impl Display for DocumentScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.document_id)
    }
}

/// Opaque identifier of a durable stored object
///
/// Stable for the lifetime of the object. Derived deterministically from the
/// document scope, the declared file name and the payload bytes: identical
/// content under the same name always maps to the same key, while two
/// different images sharing a name never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(String);

impl AssetKey {
    /// Derive the key for an inline payload
    #[must_use]
    pub fn derive(scope: &DocumentScope, file_name: &str, payload: &[u8]) -> Self {
        let digest = blake3::hash(payload);
        let prefix = hex::encode(&digest.as_bytes()[..CONTENT_PREFIX_LEN / 2]);
        let name = sanitize_file_name(file_name);
        Self(format!(
            "{}{}-{}",
            scope.key_prefix(),
            prefix,
            urlencoding::encode(&name)
        ))
    }

    /// Recover the key from a durable URL issued for this scope
    ///
    /// Returns `None` for URLs that do not live under the scope's prefix,
    /// including inline sources and assets of other documents.
    #[must_use]
    pub fn from_durable_url(url: &str, scope: &DocumentScope) -> Option<Self> {
        let path = strip_query_and_fragment(url.trim());
        let prefix = scope.key_prefix();
        let needle = format!("/{prefix}");
        let start = path.rfind(&needle)? + 1;
        let key = &path[start..];
        let name = &key[prefix.len()..];
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self(key.to_string()))
    }

    /// Wrap an already-formed key (e.g. from a storage listing)
    #[inline]
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encoded file name (last segment)
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Check whether key lives under scope
    #[inline]
    #[must_use]
    pub fn belongs_to(&self, scope: &DocumentScope) -> bool {
        self.0.starts_with(&scope.key_prefix())
    }
}

impl Display for AssetKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Drop the `?query` and `#fragment` parts of a URL
#[must_use]
pub fn strip_query_and_fragment(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Human-facing part of a stored file name
///
/// Strips the content-hash prefix a derived key carries, so
/// `"3fa9c0d1e2b4a6f7-hero.png"` becomes `"hero.png"`. Other names pass
/// through unchanged.
#[must_use]
pub fn display_name(file_name: &str) -> &str {
    let bytes = file_name.as_bytes();
    if bytes.len() > CONTENT_PREFIX_LEN
        && bytes[CONTENT_PREFIX_LEN] == b'-'
        && bytes[..CONTENT_PREFIX_LEN]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
    {
        &file_name[CONTENT_PREFIX_LEN + 1..]
    } else {
        file_name
    }
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        "image".to_string()
    } else {
        base.to_string()
    }
}
