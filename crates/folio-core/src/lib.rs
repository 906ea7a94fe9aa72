//! Folio Core
//!
//! Asset lifecycle and save consistency for a landing-page editor. Images
//! are dropped into the editor inline; before a document is persisted they
//! are uploaded to object storage, the markup is rewritten to point at their
//! durable URLs, and stored assets the page no longer uses are removed.
//!
//! # Components
//!
//! - [`AutosaveScheduler`]: debounce timer, dirty flag, single-flight guard
//! - [`SavePipeline`]: upload, preload, patch, rewrite, persist, reconcile
//! - [`UploadCoordinator`]: all-or-nothing upload of inline assets
//! - [`OrphanCollector`]: deletes stored assets nothing references
//! - [`AssetTracker`]: in-use and pending-deletion key sets
//! - [`EditorSession`]: wires the above to an [`EditorSurface`] and a
//!   [`RemoteBackend`]
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use folio_core::prelude::*;
//!
//! let session = EditorSession::open(scope, editor, backend, Arc::new(NoopWarmer), SessionConfig::default())?;
//! session.handle_event(EditorEvent::ContentChanged);
//! let outcome = session.save_now().await;
//! ```

pub mod backend;
pub mod config;
pub mod editor;
pub mod error;
pub mod memory;
pub mod notify;
pub mod orphan;
pub mod pipeline;
pub mod preload;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod status;
pub mod tracker;
pub mod upload;

pub use backend::{RemoteBackend, UploadRequest};
pub use config::SessionConfig;
pub use editor::{AssetHandle, EditorDocument, EditorEvent, EditorSurface};
pub use error::*;
pub use notify::{Notification, NotificationLevel, Notifier};
pub use orphan::{OrphanCollector, ReconcileReport};
pub use pipeline::{compose_document, SavePipeline, SaveReport};
pub use preload::{HttpWarmer, NoopWarmer, PreloadError, PreloadReport, Preloader, UrlWarmer};
pub use scheduler::{AutosaveScheduler, SaveOutcome, SaveTrigger, SkipReason};
pub use session::EditorSession;
pub use status::{allowed_transitions, validate_transition, IllegalTransition, SaveStatus, StatusCell};
pub use tracker::{AssetTracker, TrackerSnapshot};
pub use upload::{UploadBatch, UploadCoordinator};

/// Commonly used types
pub mod prelude {
    pub use crate::backend::RemoteBackend;
    pub use crate::config::SessionConfig;
    pub use crate::editor::{AssetHandle, EditorEvent, EditorSurface};
    pub use crate::error::{SaveError, UploadError};
    pub use crate::notify::{Notification, NotificationLevel};
    pub use crate::preload::{HttpWarmer, NoopWarmer, UrlWarmer};
    pub use crate::scheduler::{SaveOutcome, SkipReason};
    pub use crate::session::EditorSession;
    pub use crate::status::SaveStatus;
    pub use folio_asset::{AssetDescriptor, AssetKey, DocumentScope};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
