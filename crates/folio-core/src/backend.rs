//! Remote backend seam
//!
//! The three calls a session makes to the outside world: store an asset's
//! bytes, write the document, remove an asset. Everything else stays local.

use crate::error::BackendError;
use async_trait::async_trait;
use folio_asset::{AssetKey, DocumentScope};

/// Asset bytes bound for object storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Key (object file name) the bytes are stored under
    pub key: AssetKey,
    /// MIME type of the payload
    pub content_type: String,
    /// Raw payload
    pub bytes: Vec<u8>,
}

impl UploadRequest {
    /// Create request
    #[inline]
    #[must_use]
    pub fn new(key: AssetKey, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            key,
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// Storage and persistence operations of the hosting service
///
/// Implementations must be safe to call concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Upload an asset through a signed URL and return its durable URL
    ///
    /// The durable URL must end with the key so the key can be recovered from
    /// markup later.
    async fn issue_signed_upload(&self, request: UploadRequest) -> Result<String, BackendError>;

    /// Write the full document
    async fn persist_document(&self, scope: &DocumentScope, html: &str) -> Result<(), BackendError>;

    /// Remove a stored asset; removing a missing key succeeds
    async fn delete_asset(&self, key: &AssetKey) -> Result<(), BackendError>;
}
