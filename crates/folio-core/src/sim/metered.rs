//! Backend wrapper that adds latency and watches for overlapping saves

use crate::backend::{RemoteBackend, UploadRequest};
use crate::error::BackendError;
use crate::memory::MemoryBackend;
use async_trait::async_trait;
use folio_asset::{AssetKey, DocumentScope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delays every call and records the peak number of concurrent document
/// writes. One pipeline writes once, so a peak above one means two
/// pipelines overlapped.
pub struct MeteredBackend {
    inner: Arc<MemoryBackend>,
    latency: Duration,
    active_persists: AtomicUsize,
    peak_persists: AtomicUsize,
}

impl MeteredBackend {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: Arc<MemoryBackend>, latency: Duration) -> Self {
        Self {
            inner,
            latency,
            active_persists: AtomicUsize::new(0),
            peak_persists: AtomicUsize::new(0),
        }
    }

    /// Highest number of document writes seen in flight at once
    #[must_use]
    pub fn peak_concurrent_persists(&self) -> usize {
        self.peak_persists.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RemoteBackend for MeteredBackend {
    async fn issue_signed_upload(&self, request: UploadRequest) -> Result<String, BackendError> {
        self.pause().await;
        self.inner.issue_signed_upload(request).await
    }

    async fn persist_document(&self, scope: &DocumentScope, html: &str) -> Result<(), BackendError> {
        let active = self.active_persists.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_persists.fetch_max(active, Ordering::SeqCst);
        self.pause().await;
        let result = self.inner.persist_document(scope, html).await;
        self.active_persists.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete_asset(&self, key: &AssetKey) -> Result<(), BackendError> {
        self.pause().await;
        self.inner.delete_asset(key).await
    }
}
