//! Error types for Folio Core
//!
//! Provides error handling for:
//! - Remote backend failures (upload, persistence, deletion)
//! - Upload batch aborts
//! - Save pipeline outcomes
//! - Configuration loading

use folio_asset::{AssetKey, DocumentScope, MalformedAssetError};
use std::path::PathBuf;

/// Failure reported by the remote backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Transport failure before a response arrived
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a rejection
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// Status code
        status: u16,
        /// Backend message
        message: String,
    },

    /// Backend not reachable at all
    #[error("backend unavailable")]
    Unavailable,
}

impl BackendError {
    /// Whether retrying the same request could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Unavailable => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// A single asset could not be uploaded
#[derive(Debug, Clone, thiserror::Error)]
#[error("upload of '{asset_name}' failed: {source}")]
pub struct UploadFailedError {
    /// Declared name of the asset
    pub asset_name: String,
    /// Key the asset would have been stored under
    pub key: AssetKey,
    /// Backend failure
    #[source]
    pub source: BackendError,
}

/// Upload batch aborted
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// An inline payload could not be decoded; nothing was uploaded
    #[error(transparent)]
    Malformed(#[from] MalformedAssetError),

    /// Transfer of an asset failed
    #[error(transparent)]
    Failed(#[from] UploadFailedError),
}

impl UploadError {
    /// Name of the asset that aborted the batch
    #[must_use]
    pub fn asset_name(&self) -> &str {
        match self {
            Self::Malformed(e) => &e.asset,
            Self::Failed(e) => &e.asset_name,
        }
    }
}

/// Document write failed
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to persist document {document}: {source}")]
pub struct PersistenceError {
    /// Document that was being written
    pub document: DocumentScope,
    /// Backend failure
    #[source]
    pub source: BackendError,
}

/// Orphan deletion failed
///
/// Never surfaced to the user; the key stays scheduled for the next save.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to delete {key}: {source}")]
pub struct DeletionError {
    /// Key that survived
    pub key: AssetKey,
    /// Backend failure
    #[source]
    pub source: BackendError,
}

/// Save pipeline failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum SaveError {
    /// Uploading assets failed
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    /// Nothing to persist
    #[error("document has no content")]
    EmptyContent,

    /// Writing the document failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl SaveError {
    /// Whether the user has to change the document before retrying
    #[must_use]
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Self::EmptyContent | Self::Upload(UploadError::Malformed(_))
        )
    }

    /// Asset responsible for the failure, if any
    #[must_use]
    pub fn failing_asset(&self) -> Option<&str> {
        match self {
            Self::Upload(e) => Some(e.asset_name()),
            _ => None,
        }
    }

    /// Message suitable for an error notification
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Upload(UploadError::Malformed(e)) => {
                format!("Image '{}' could not be read. Replace it and save again.", e.asset)
            }
            Self::Upload(UploadError::Failed(e)) => {
                format!("Uploading '{}' failed. Your changes were not saved.", e.asset_name)
            }
            Self::EmptyContent => "Add some content before saving.".to_string(),
            Self::Persistence(_) => "Saving failed. Your changes are kept and will be retried.".to_string(),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Result alias for save operations
pub type SaveResult<T> = Result<T, SaveError>;
