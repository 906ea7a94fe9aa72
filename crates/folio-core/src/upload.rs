//! Upload coordinator
//!
//! Moves every inline asset of the editor's catalog into durable storage:
//! 1. Inline handles are deduplicated by source
//! 2. Sources already in the substitution cache are reused, never re-sent
//! 3. All remaining payloads are decoded and measured before any transfer, so
//!    a malformed asset aborts the batch with nothing uploaded
//! 4. Transfers run concurrently, bounded by the configured limit
//!
//! The batch is all-or-nothing from the caller's view: on any transfer
//! failure no substitutions are returned, the cache is untouched, and keys
//! that did reach storage are handed to the tracker for cleanup.

use crate::backend::{RemoteBackend, UploadRequest};
use crate::editor::{AssetHandle, EditorSurface};
use crate::error::{BackendError, UploadError, UploadFailedError};
use crate::tracker::AssetTracker;
use folio_asset::{
    AssetDescriptor, AssetKey, DocumentScope, InlineImage, MalformedAssetError, SubstitutionCache,
    SubstitutionMap,
};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of a successful batch
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    /// Descriptor for every inline source in the catalog (new and reused)
    pub substitutions: SubstitutionMap,
    /// Keys written by this batch
    pub uploaded: Vec<AssetKey>,
    /// Sources answered from the cache
    pub reused: usize,
}

impl UploadBatch {
    /// Whether the catalog had no inline assets
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.substitutions.is_empty()
    }
}

/// Decoded asset ready for transfer
#[derive(Debug)]
struct PreparedUpload {
    order: usize,
    src: String,
    name: String,
    width: u32,
    height: u32,
    request: UploadRequest,
}

/// What is left of a prepared upload once its bytes are sent
#[derive(Debug)]
struct Sent {
    order: usize,
    src: String,
    name: String,
    key: AssetKey,
    width: u32,
    height: u32,
}

/// Uploads inline assets and patches the editor
pub struct UploadCoordinator {
    scope: DocumentScope,
    backend: Arc<dyn RemoteBackend>,
    tracker: Arc<AssetTracker>,
    cache: Arc<SubstitutionCache>,
    max_concurrent: usize,
}

impl UploadCoordinator {
    /// Create coordinator
    #[must_use]
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        tracker: Arc<AssetTracker>,
        cache: Arc<SubstitutionCache>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            scope: tracker.scope().clone(),
            backend,
            tracker,
            cache,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Session substitution cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<SubstitutionCache> {
        &self.cache
    }

    /// Upload every inline asset in `inventory` not yet in the cache
    ///
    /// # Errors
    /// - [`UploadError::Malformed`] if any payload cannot be decoded
    /// - [`UploadError::Failed`] if any transfer fails
    pub async fn upload_pending(&self, inventory: &[AssetHandle]) -> Result<UploadBatch, UploadError> {
        let mut batch = UploadBatch::default();
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();

        for handle in inventory.iter().filter(|h| h.is_inline()) {
            if !seen.insert(handle.src.as_str()) {
                continue;
            }
            if let Some(descriptor) = self.cache.get(&handle.src) {
                batch.substitutions.insert(handle.src.clone(), descriptor);
                batch.reused += 1;
            } else {
                fresh.push(handle);
            }
        }

        if fresh.is_empty() {
            return Ok(batch);
        }

        let prepared = fresh
            .iter()
            .enumerate()
            .map(|(order, handle)| self.prepare(order, handle))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            document = %self.scope,
            count = prepared.len(),
            reused = batch.reused,
            "uploading inline assets"
        );

        let backend = &self.backend;
        let results: Vec<(Sent, Result<String, BackendError>)> = stream::iter(prepared)
            .map(|upload| async move {
                let sent = Sent {
                    order: upload.order,
                    src: upload.src,
                    name: upload.name,
                    key: upload.request.key.clone(),
                    width: upload.width,
                    height: upload.height,
                };
                let result = backend.issue_signed_upload(upload.request).await;
                (sent, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut stored = Vec::new();
        let mut failures = Vec::new();
        for (sent, result) in results {
            match result {
                Ok(url) => stored.push((sent, url)),
                Err(source) => {
                    tracing::warn!(asset = %sent.name, key = %sent.key, error = %source, "asset upload failed");
                    failures.push((sent, source));
                }
            }
        }

        if let Some((sent, source)) = failures.into_iter().min_by_key(|(sent, _)| sent.order) {
            self.tracker.mark_stray(stored.iter().map(|(s, _)| &s.key));
            return Err(UploadFailedError {
                asset_name: sent.name,
                key: sent.key,
                source,
            }
            .into());
        }

        let mut fresh_map = SubstitutionMap::new();
        for (sent, url) in stored {
            fresh_map.insert(sent.src, AssetDescriptor::new(url, sent.width, sent.height));
            batch.uploaded.push(sent.key);
        }
        self.cache.merge(&fresh_map);
        self.tracker.mark_uploaded(batch.uploaded.iter());
        batch.substitutions.merge(&fresh_map);

        tracing::info!(document = %self.scope, uploaded = batch.uploaded.len(), "inline assets uploaded");
        Ok(batch)
    }

    /// Point live editor nodes and catalog entries at durable URLs
    ///
    /// Returns how many image nodes were patched.
    pub fn apply_to_editor(&self, editor: &dyn EditorSurface, substitutions: &SubstitutionMap) -> usize {
        substitutions
            .iter()
            .map(|(src, descriptor)| {
                let patched = editor.patch_images(src, descriptor);
                editor.replace_catalog_entry(src, descriptor);
                patched
            })
            .sum()
    }

    fn prepare(&self, order: usize, handle: &AssetHandle) -> Result<PreparedUpload, MalformedAssetError> {
        let image = InlineImage::parse(&handle.src)
            .map_err(|reason| MalformedAssetError::new(declared_name(handle, None), reason))?;
        let name = declared_name(handle, Some(image.extension()));
        let (width, height) = image
            .dimensions()
            .map_err(|reason| MalformedAssetError::new(name.clone(), reason))?;

        let key = AssetKey::derive(&self.scope, &name, image.bytes());
        let content_type = image.content_type().to_string();
        Ok(PreparedUpload {
            order,
            src: handle.src.clone(),
            name,
            width,
            height,
            request: UploadRequest::new(key, content_type, image.into_bytes()),
        })
    }
}

fn declared_name(handle: &AssetHandle, extension: Option<&str>) -> String {
    match (&handle.name, extension) {
        (Some(name), _) if !name.trim().is_empty() => name.trim().to_string(),
        (_, Some(ext)) => format!("image.{ext}"),
        _ => "image".to_string(),
    }
}
