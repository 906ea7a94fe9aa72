//! Error types for inline asset decoding

/// Why an inline payload could not be turned into an uploadable image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReason {
    /// Source does not use the `data:` scheme
    #[error("not a data url")]
    NotDataUrl,

    /// Metadata and payload are not separated by a comma
    #[error("missing ',' between metadata and payload")]
    MissingComma,

    /// Declared content type is not an image
    #[error("content type '{0}' is not an image")]
    NotAnImage(String),

    /// Payload decodes to zero bytes
    #[error("empty payload")]
    EmptyPayload,

    /// Base64 payload failed to decode
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Image header could not be read
    #[error("unreadable image data")]
    UnreadableImage,
}

/// Inline asset with an encoding that cannot be parsed
///
/// Aborts the whole upload batch; the user has to fix the asset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed inline asset '{asset}': {reason}")]
pub struct MalformedAssetError {
    /// Declared name of the offending asset
    pub asset: String,
    /// Decoding failure
    #[source]
    pub reason: MalformedReason,
}

impl MalformedAssetError {
    /// Create error for named asset
    #[inline]
    pub fn new(asset: impl Into<String>, reason: MalformedReason) -> Self {
        Self {
            asset: asset.into(),
            reason,
        }
    }
}
