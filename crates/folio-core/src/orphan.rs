//! Orphan collection
//!
//! After a document write succeeds, stored assets that the persisted markup
//! no longer references are removed. Candidates are everything the tracker
//! believes current or pending, minus what the final markup uses; a key the
//! user explicitly removed counts as unused even if the markup still shows
//! it. Deletion failures are logged and retried on the next save.

use crate::backend::RemoteBackend;
use crate::error::DeletionError;
use crate::tracker::AssetTracker;
use folio_asset::{AssetKey, DocumentScope};
use folio_markup::durable_references;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Keys the persisted markup uses
    pub in_use: BTreeSet<AssetKey>,
    /// Keys removed from storage
    pub deleted: Vec<AssetKey>,
    /// Deletions that failed and stay scheduled
    pub failed: Vec<DeletionError>,
}

/// Deletes stored assets nothing references anymore
pub struct OrphanCollector {
    tracker: Arc<AssetTracker>,
    backend: Arc<dyn RemoteBackend>,
    max_concurrent: usize,
}

impl OrphanCollector {
    /// Create collector
    #[must_use]
    pub fn new(tracker: Arc<AssetTracker>, backend: Arc<dyn RemoteBackend>, max_concurrent: usize) -> Self {
        Self {
            tracker,
            backend,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Owning document
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &DocumentScope {
        self.tracker.scope()
    }

    /// Keys of this document referenced by `markup`
    #[must_use]
    pub fn referenced_keys(&self, markup: &str) -> BTreeSet<AssetKey> {
        durable_references(markup)
            .iter()
            .filter_map(|url| self.tracker.key_for_url(url))
            .collect()
    }

    /// Reconcile storage against the markup that was just persisted
    ///
    /// Never fails; see [`ReconcileReport::failed`].
    pub async fn reconcile(&self, final_markup: &str) -> ReconcileReport {
        let snapshot = self.tracker.snapshot();
        let in_use: BTreeSet<AssetKey> = self
            .referenced_keys(final_markup)
            .into_iter()
            .filter(|key| !snapshot.pending.contains(key))
            .collect();

        let candidates: Vec<AssetKey> = snapshot
            .current
            .union(&snapshot.pending)
            .filter(|key| !in_use.contains(*key))
            .cloned()
            .collect();

        let backend = &self.backend;
        let outcomes: Vec<(AssetKey, Result<(), _>)> = stream::iter(candidates)
            .map(|key| async move {
                let result = backend.delete_asset(&key).await;
                (key, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = ReconcileReport::default();
        for (key, result) in outcomes {
            match result {
                Ok(()) => report.deleted.push(key),
                Err(source) => {
                    tracing::warn!(key = %key, error = %source, "orphan deletion failed, will retry");
                    report.failed.push(DeletionError { key, source });
                }
            }
        }
        report.deleted.sort();

        self.tracker.complete_reconcile(
            in_use.clone(),
            &snapshot.pending,
            report.failed.iter().map(|e| e.key.clone()),
        );

        if !report.deleted.is_empty() {
            tracing::info!(
                document = %self.tracker.scope(),
                deleted = report.deleted.len(),
                "orphaned assets removed"
            );
        }
        report.in_use = in_use;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockRemoteBackend;
    use crate::error::BackendError;

    const A: &str = "https://cdn.example.com/u1/d1/aaaaaaaaaaaaaaaa-a.png";
    const B: &str = "https://cdn.example.com/u1/d1/bbbbbbbbbbbbbbbb-b.png";

    fn setup(backend: MockRemoteBackend) -> (OrphanCollector, Arc<AssetTracker>) {
        let tracker = Arc::new(AssetTracker::new(DocumentScope::new("u1", "d1")));
        (OrphanCollector::new(Arc::clone(&tracker), Arc::new(backend), 8), tracker)
    }

    #[tokio::test]
    async fn deletes_unreferenced_current_keys() {
        let mut backend = MockRemoteBackend::new();
        backend
            .expect_delete_asset()
            .withf(|key| key.as_str().ends_with("-b.png"))
            .times(1)
            .returning(|_| Ok(()));
        let (collector, tracker) = setup(backend);
        tracker.on_asset_added(A);
        tracker.on_asset_added(B);

        let report = collector.reconcile(&format!(r#"<img src="{A}">"#)).await;
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(tracker.current().len(), 1);
        assert!(tracker.pending().is_empty());
    }

    #[tokio::test]
    async fn pending_key_is_deleted_even_if_markup_shows_it() {
        let mut backend = MockRemoteBackend::new();
        backend.expect_delete_asset().times(1).returning(|_| Ok(()));
        let (collector, tracker) = setup(backend);
        tracker.on_asset_removed(A);

        let report = collector.reconcile(&format!(r#"<img src="{A}">"#)).await;
        assert!(report.in_use.is_empty());
        assert_eq!(report.deleted.len(), 1);
    }

    #[tokio::test]
    async fn failed_deletion_stays_pending() {
        let mut backend = MockRemoteBackend::new();
        backend
            .expect_delete_asset()
            .times(1)
            .returning(|_| Err(BackendError::Unavailable));
        let (collector, tracker) = setup(backend);
        let key = tracker.on_asset_removed(B).unwrap();

        let report = collector.reconcile("<p>text</p>").await;
        assert_eq!(report.failed.len(), 1);
        assert!(tracker.is_pending(&key));
    }

    #[tokio::test]
    async fn foreign_references_are_ignored() {
        let mut backend = MockRemoteBackend::new();
        backend.expect_delete_asset().never();
        let (collector, tracker) = setup(backend);

        let report = collector
            .reconcile(r#"<img src="https://cdn.example.com/u2/d2/cccccccccccccccc-c.png">"#)
            .await;
        assert!(report.in_use.is_empty());
        assert!(tracker.current().is_empty());
    }

    #[tokio::test]
    async fn second_pass_is_a_noop() {
        let mut backend = MockRemoteBackend::new();
        backend.expect_delete_asset().times(1).returning(|_| Ok(()));
        let (collector, tracker) = setup(backend);
        tracker.on_asset_added(A);
        tracker.on_asset_added(B);
        let markup = format!(r#"<div style="background:url('{A}')"></div>"#);

        collector.reconcile(&markup).await;
        let again = collector.reconcile(&markup).await;
        assert!(again.deleted.is_empty());
        assert_eq!(again.in_use.len(), 1);
    }
}
