//! Editing session
//!
//! Wires tracker, upload coordinator, preloader, orphan collector, pipeline
//! and scheduler together for one document, and translates editor events
//! into their calls. Dropping the session closes it.

use crate::backend::RemoteBackend;
use crate::config::SessionConfig;
use crate::editor::{EditorEvent, EditorSurface};
use crate::error::ConfigError;
use crate::notify::{Notification, Notifier};
use crate::orphan::OrphanCollector;
use crate::pipeline::SavePipeline;
use crate::preload::{Preloader, UrlWarmer};
use crate::scheduler::{AutosaveScheduler, SaveOutcome};
use crate::status::SaveStatus;
use crate::tracker::AssetTracker;
use crate::upload::UploadCoordinator;
use folio_asset::{AssetKey, DocumentScope, SubstitutionCache};
use folio_markup::durable_references;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// One open document in the editor
pub struct EditorSession {
    id: Uuid,
    tracker: Arc<AssetTracker>,
    scheduler: AutosaveScheduler,
    notifier: Notifier,
}

impl EditorSession {
    /// Open a session for `scope`
    ///
    /// Durable assets of this document already present in the editor are
    /// recorded as in use.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn open(
        scope: DocumentScope,
        editor: Arc<dyn EditorSurface>,
        backend: Arc<dyn RemoteBackend>,
        warmer: Arc<dyn UrlWarmer>,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let id = Uuid::new_v4();
        let tracker = Arc::new(AssetTracker::new(scope.clone()));

        let initial = editor.document();
        let seeded: Vec<AssetKey> = durable_references(&initial.markup)
            .into_iter()
            .chain(durable_references(&initial.styles))
            .filter_map(|url| tracker.key_for_url(&url))
            .collect();
        let seeded_count = seeded.len();
        tracker.seed(seeded);

        let uploads = UploadCoordinator::new(
            Arc::clone(&backend),
            Arc::clone(&tracker),
            Arc::new(SubstitutionCache::new()),
            config.max_concurrent_uploads,
        );
        let preloader = Preloader::new(warmer, config.preload_timeout(), config.preload_cache_ttl());
        let collector = OrphanCollector::new(
            Arc::clone(&tracker),
            Arc::clone(&backend),
            config.max_concurrent_deletions,
        );
        let pipeline = SavePipeline::new(editor, backend, uploads, preloader, collector);

        let notifier = Notifier::new();
        let scheduler = AutosaveScheduler::new(pipeline, config, notifier.clone());

        tracing::info!(session = %id, document = %scope, seeded = seeded_count, "editor session opened");
        Ok(Self {
            id,
            tracker,
            scheduler,
            notifier,
        })
    }

    /// Session identifier (for logs)
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning document
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &DocumentScope {
        self.tracker.scope()
    }

    /// React to an editor notification
    ///
    /// Asset events update the tracker and, like content changes, mark the
    /// session dirty. Must be called from within a Tokio runtime.
    pub fn handle_event(&self, event: EditorEvent) {
        match event {
            EditorEvent::ContentChanged => {}
            EditorEvent::AssetAdded(handle) => {
                if !handle.is_inline() {
                    self.tracker.on_asset_added(&handle.src);
                }
            }
            EditorEvent::AssetRemoved(handle) => {
                if !handle.is_inline() {
                    self.tracker.on_asset_removed(&handle.src);
                }
            }
        }
        self.scheduler.mark_dirty();
    }

    /// Save immediately (user request)
    pub async fn save_now(&self) -> SaveOutcome {
        self.scheduler.save_now().await
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.scheduler.status()
    }

    /// Observe status changes
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.scheduler.subscribe_status()
    }

    /// Receive user notifications
    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Whether unsaved changes exist
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.scheduler.is_dirty()
    }

    /// Whether a save is running
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.scheduler.is_saving()
    }

    /// Pipelines started so far
    #[must_use]
    pub fn pipelines_started(&self) -> u64 {
        self.scheduler.pipelines_started()
    }

    /// Keys believed in use
    #[must_use]
    pub fn current_assets(&self) -> BTreeSet<AssetKey> {
        self.tracker.current()
    }

    /// Keys awaiting deletion
    #[must_use]
    pub fn pending_deletions(&self) -> BTreeSet<AssetKey> {
        self.tracker.pending()
    }

    /// Inline-to-durable substitutions learned so far
    #[must_use]
    pub fn substitution_cache(&self) -> &Arc<SubstitutionCache> {
        self.scheduler.pipeline().cache()
    }

    /// Stop autosaving; an in-flight save still completes
    pub fn close(&self) {
        if !self.scheduler.is_closed() {
            tracing::info!(session = %self.id, document = %self.scope(), "editor session closed");
        }
        self.scheduler.close();
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryEditor};
    use crate::preload::NoopWarmer;

    #[tokio::test]
    async fn seeds_tracker_from_loaded_document() {
        let markup = r#"<img src="https://cdn.example.com/u1/d1/0123456789abcdef-a.png">
            <img src="https://cdn.example.com/u9/d9/0123456789abcdef-other.png">"#;
        let editor = Arc::new(
            MemoryEditor::new(markup)
                .with_styles(".hero{background:url(https://cdn.example.com/u1/d1/fedcba9876543210-bg.png)}"),
        );
        let session = EditorSession::open(
            DocumentScope::new("u1", "d1"),
            editor,
            Arc::new(MemoryBackend::new("https://cdn.example.com")),
            Arc::new(NoopWarmer),
            SessionConfig::default(),
        )
        .unwrap();

        assert_eq!(session.current_assets().len(), 2);
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let result = EditorSession::open(
            DocumentScope::new("u1", "d1"),
            Arc::new(MemoryEditor::new("")),
            Arc::new(MemoryBackend::new("https://cdn.example.com")),
            Arc::new(NoopWarmer),
            SessionConfig::default().with_max_concurrent_uploads(0),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn asset_events_update_tracker() {
        let session = EditorSession::open(
            DocumentScope::new("u1", "d1"),
            Arc::new(MemoryEditor::new("<p>x</p>")),
            Arc::new(MemoryBackend::new("https://cdn.example.com")),
            Arc::new(NoopWarmer),
            SessionConfig::default().with_autosave(false),
        )
        .unwrap();
        let url = "https://cdn.example.com/u1/d1/0123456789abcdef-a.png";

        session.handle_event(EditorEvent::AssetRemoved(crate::editor::AssetHandle::durable(url)));
        assert_eq!(session.pending_deletions().len(), 1);
        assert!(session.is_dirty());

        session.handle_event(EditorEvent::AssetAdded(crate::editor::AssetHandle::durable(url)));
        assert!(session.pending_deletions().is_empty());
        assert_eq!(session.current_assets().len(), 1);
    }
}
