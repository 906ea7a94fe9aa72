//! Asset tracker
//!
//! Holds the two key sets of a session:
//! - **current**: keys believed to be in use by the document
//! - **pending**: keys the editor reported removed, awaiting reconciliation
//!
//! A key leaves `pending` whenever it is seen in use again (re-added or
//! re-uploaded), so an undo never loses an image.

use folio_asset::{AssetKey, DocumentScope};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Point-in-time copy of both sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSnapshot {
    /// Keys believed in use
    pub current: BTreeSet<AssetKey>,
    /// Keys awaiting deletion
    pub pending: BTreeSet<AssetKey>,
}

#[derive(Debug, Default)]
struct TrackerState {
    current: BTreeSet<AssetKey>,
    pending: BTreeSet<AssetKey>,
}

/// Session-scoped key bookkeeping
#[derive(Debug)]
pub struct AssetTracker {
    scope: DocumentScope,
    state: Mutex<TrackerState>,
}

impl AssetTracker {
    /// Create empty tracker for a document
    #[must_use]
    pub fn new(scope: DocumentScope) -> Self {
        Self {
            scope,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Owning document
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &DocumentScope {
        &self.scope
    }

    /// Key for a durable URL in this document, if it is one
    #[must_use]
    pub fn key_for_url(&self, url: &str) -> Option<AssetKey> {
        AssetKey::from_durable_url(url, &self.scope)
    }

    /// Record keys found in the document when the session opened
    pub fn seed(&self, keys: impl IntoIterator<Item = AssetKey>) {
        let mut state = self.state.lock();
        for key in keys {
            state.pending.remove(&key);
            state.current.insert(key);
        }
    }

    /// Asset (re-)entered the document
    ///
    /// Returns the key when `url` is a durable URL of this document.
    pub fn on_asset_added(&self, url: &str) -> Option<AssetKey> {
        let key = self.key_for_url(url)?;
        let mut state = self.state.lock();
        if state.pending.remove(&key) {
            tracing::debug!(key = %key, "asset restored, deletion cancelled");
        }
        state.current.insert(key.clone());
        Some(key)
    }

    /// Asset left the document
    pub fn on_asset_removed(&self, url: &str) -> Option<AssetKey> {
        let key = self.key_for_url(url)?;
        tracing::debug!(key = %key, "asset scheduled for deletion");
        self.state.lock().pending.insert(key.clone());
        Some(key)
    }

    /// Keys just written to storage are in use
    pub fn mark_uploaded<'a>(&self, keys: impl IntoIterator<Item = &'a AssetKey>) {
        let mut state = self.state.lock();
        for key in keys {
            state.pending.remove(key);
            state.current.insert(key.clone());
        }
    }

    /// Keys stored by an aborted batch; nothing references them
    pub fn mark_stray<'a>(&self, keys: impl IntoIterator<Item = &'a AssetKey>) {
        let mut state = self.state.lock();
        state.pending.extend(keys.into_iter().cloned());
    }

    /// Copy both sets
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock();
        TrackerSnapshot {
            current: state.current.clone(),
            pending: state.pending.clone(),
        }
    }

    /// Apply the outcome of a reconciliation pass
    ///
    /// `current` becomes `in_use`. Pending keys that were part of the pass
    /// are dropped, except those whose deletion failed. Keys that became
    /// pending while the pass ran are kept.
    pub fn complete_reconcile(
        &self,
        in_use: BTreeSet<AssetKey>,
        processed: &BTreeSet<AssetKey>,
        failed: impl IntoIterator<Item = AssetKey>,
    ) {
        let mut state = self.state.lock();
        state.current = in_use;
        state.pending.retain(|key| !processed.contains(key));
        state.pending.extend(failed);
    }

    /// Keys believed in use
    #[must_use]
    pub fn current(&self) -> BTreeSet<AssetKey> {
        self.state.lock().current.clone()
    }

    /// Keys awaiting deletion
    #[must_use]
    pub fn pending(&self) -> BTreeSet<AssetKey> {
        self.state.lock().pending.clone()
    }

    /// Whether a key awaits deletion
    #[must_use]
    pub fn is_pending(&self, key: &AssetKey) -> bool {
        self.state.lock().pending.contains(key)
    }
}
