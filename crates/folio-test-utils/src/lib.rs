//! Testing utilities for the Folio workspace
//!
//! Image fixtures, a backend whose document writes can be held open, and a
//! harness that opens a session over the in-memory editor and backend.

#![allow(missing_docs)]

use async_trait::async_trait;
use base64::Engine;
use folio_asset::{AssetKey, DocumentScope};
use folio_core::memory::{MemoryBackend, MemoryEditor};
use folio_core::{
    AssetHandle, BackendError, EditorEvent, EditorSession, EditorSurface, NoopWarmer, RemoteBackend,
    SaveStatus, SessionConfig, UploadRequest,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

pub const CDN: &str = "https://cdn.folio.test";

pub fn test_scope() -> DocumentScope {
    DocumentScope::new("owner-1", "page-1")
}

fn encode(format: image::ImageFormat, width: u32, height: u32, shade: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    let pixels = image::RgbImage::from_pixel(width, height, image::Rgb([shade, 128, 255 - shade]));
    pixels.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

fn data_url(content_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{content_type};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// PNG data URL; `shade` varies the payload so equal sizes still differ
pub fn png_data_url(width: u32, height: u32, shade: u8) -> String {
    data_url("image/png", &encode(image::ImageFormat::Png, width, height, shade))
}

pub fn jpeg_data_url(width: u32, height: u32) -> String {
    data_url("image/jpeg", &encode(image::ImageFormat::Jpeg, width, height, 7))
}

pub fn svg_data_url() -> String {
    "data:image/svg+xml,%3Csvg%20xmlns%3D%22http%3A%2F%2Fwww.w3.org%2F2000%2Fsvg%22%2F%3E".to_string()
}

/// Base64 payload that does not decode
pub fn malformed_data_url() -> String {
    "data:image/png;base64,@@not-base64@@".to_string()
}

/// Memory backend whose document writes wait for [`GatedBackend::release`]
pub struct GatedBackend {
    inner: Arc<MemoryBackend>,
    gate: Semaphore,
    started: Notify,
    waiting: AtomicUsize,
}

impl GatedBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            started: Notify::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryBackend> {
        &self.inner
    }

    /// Let one held write through
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Let every future write through
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    /// Wait until a write is being held
    pub async fn wait_for_persist(&self) {
        loop {
            let notified = self.started.notified();
            if self.waiting.load(Ordering::SeqCst) > 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn writes_waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBackend for GatedBackend {
    async fn issue_signed_upload(&self, request: UploadRequest) -> Result<String, BackendError> {
        self.inner.issue_signed_upload(request).await
    }

    async fn persist_document(&self, scope: &DocumentScope, html: &str) -> Result<(), BackendError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.started.notify_waiters();
        let permit = self.gate.acquire().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        if let Ok(permit) = permit {
            permit.forget();
        }
        self.inner.persist_document(scope, html).await
    }

    async fn delete_asset(&self, key: &AssetKey) -> Result<(), BackendError> {
        self.inner.delete_asset(key).await
    }
}

/// Session over an in-memory editor and backend
pub struct SessionHarness {
    pub editor: Arc<MemoryEditor>,
    pub backend: Arc<MemoryBackend>,
    pub session: EditorSession,
}

impl SessionHarness {
    pub fn new(markup: &str, config: SessionConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new(CDN));
        Self::with_backend(markup, config, Arc::clone(&backend), backend)
    }

    /// Harness whose session talks to `remote` (which should wrap `backend`)
    pub fn with_backend(
        markup: &str,
        config: SessionConfig,
        backend: Arc<MemoryBackend>,
        remote: Arc<dyn RemoteBackend>,
    ) -> Self {
        let editor = Arc::new(MemoryEditor::new(markup));
        let session = EditorSession::open(
            test_scope(),
            Arc::clone(&editor) as Arc<dyn EditorSurface>,
            remote,
            Arc::new(NoopWarmer),
            config,
        )
        .unwrap();
        Self {
            editor,
            backend,
            session,
        }
    }

    pub fn type_text(&self, text: &str) {
        self.editor.append_text(text);
        self.session.handle_event(EditorEvent::ContentChanged);
    }

    pub fn insert_image(&self, name: &str, src: &str) -> AssetHandle {
        let handle = self.editor.insert_image(Some(name), src);
        self.session.handle_event(EditorEvent::AssetAdded(handle.clone()));
        handle
    }

    pub fn remove_image(&self, src: &str) -> AssetHandle {
        let handle = self.editor.remove_image(src).unwrap();
        self.session.handle_event(EditorEvent::AssetRemoved(handle.clone()));
        handle
    }

    /// Put a previously removed image back (undo)
    pub fn restore_image(&self, handle: &AssetHandle) {
        self.editor.insert_image(handle.name.as_deref(), &handle.src);
        self.session.handle_event(EditorEvent::AssetAdded(handle.clone()));
    }

    pub fn latest_document(&self) -> Option<String> {
        self.backend.latest_document(&test_scope())
    }

    /// Durable sources currently shown in the editor, in catalog order
    pub fn durable_sources(&self) -> Vec<String> {
        self.editor
            .catalog()
            .into_iter()
            .filter(|h| !h.is_inline())
            .map(|h| h.src)
            .collect()
    }

    pub async fn wait_for_status(&self, status: SaveStatus) {
        let mut rx = self.session.subscribe_status();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == status))
            .await
            .expect("status not reached in time")
            .unwrap();
    }
}

/// Configuration with autosave off, for tests that save explicitly
pub fn manual_config() -> SessionConfig {
    SessionConfig::default().with_autosave(false)
}
