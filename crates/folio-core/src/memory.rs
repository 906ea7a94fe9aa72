//! In-memory backend and editor
//!
//! Used by the simulator and the test suites. The backend keeps an object
//! store, a revision history per document and call counters, and can be told
//! to fail specific operations.

use crate::backend::{RemoteBackend, UploadRequest};
use crate::editor::{AssetHandle, EditorDocument, EditorSurface};
use crate::error::BackendError;
use async_trait::async_trait;
use folio_asset::{display_name, AssetDescriptor, AssetKey, DocumentScope};
use folio_markup::{durable_references, inline_image_sources};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Object held by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// MIME type
    pub content_type: String,
    /// Payload
    pub bytes: Vec<u8>,
}

/// One upload attempt as seen by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAttempt {
    /// Target key
    pub key: AssetKey,
    /// Whether it was accepted
    pub accepted: bool,
    /// Documents persisted (all scopes) before this attempt
    pub revision: usize,
}

#[derive(Debug, Default)]
struct Faults {
    upload_names: HashSet<String>,
    transient_upload_names: HashSet<String>,
    persist_failures: usize,
    delete_failures: usize,
}

/// Object store plus document store, all in memory
#[derive(Debug)]
pub struct MemoryBackend {
    base_url: String,
    objects: Mutex<BTreeMap<AssetKey, StoredObject>>,
    documents: Mutex<HashMap<DocumentScope, Vec<String>>>,
    uploads: Mutex<Vec<UploadAttempt>>,
    faults: Mutex<Faults>,
    upload_calls: AtomicUsize,
    persist_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryBackend {
    /// Create backend serving durable URLs under `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            documents: Mutex::new(HashMap::new()),
            uploads: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            upload_calls: AtomicUsize::new(0),
            persist_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Durable URL of a key
    #[must_use]
    pub fn url_for(&self, key: &AssetKey) -> String {
        format!("{}/{}", self.base_url, key)
    }

    /// Put an object directly into storage
    pub fn insert_object(&self, key: AssetKey, object: StoredObject) {
        self.objects.lock().insert(key, object);
    }

    /// Keys currently stored
    #[must_use]
    pub fn object_keys(&self) -> BTreeSet<AssetKey> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Stored object by key
    #[must_use]
    pub fn object(&self, key: &AssetKey) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    /// Whether a key is stored
    #[must_use]
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.objects.lock().contains_key(key)
    }

    /// Most recently persisted revision of a document
    #[must_use]
    pub fn latest_document(&self, scope: &DocumentScope) -> Option<String> {
        self.documents
            .lock()
            .get(scope)
            .and_then(|revisions| revisions.last().cloned())
    }

    /// Every persisted revision of a document, oldest first
    #[must_use]
    pub fn revisions(&self, scope: &DocumentScope) -> Vec<String> {
        self.documents.lock().get(scope).cloned().unwrap_or_default()
    }

    /// Upload attempts in arrival order
    #[must_use]
    pub fn upload_log(&self) -> Vec<UploadAttempt> {
        self.uploads.lock().clone()
    }

    /// Upload calls received
    #[must_use]
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Persist calls received
    #[must_use]
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Delete calls received
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Reject every upload of the asset named `name`
    pub fn fail_uploads_of(&self, name: impl Into<String>) {
        self.faults.lock().upload_names.insert(name.into());
    }

    /// Reject the next upload of the asset named `name` only
    pub fn fail_next_upload_of(&self, name: impl Into<String>) {
        self.faults.lock().transient_upload_names.insert(name.into());
    }

    /// Reject the next `count` persist calls
    pub fn fail_next_persists(&self, count: usize) {
        self.faults.lock().persist_failures = count;
    }

    /// Reject the next `count` delete calls
    pub fn fail_next_deletions(&self, count: usize) {
        self.faults.lock().delete_failures = count;
    }

    /// Drop all injected faults
    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    fn upload_fault(&self, key: &AssetKey) -> bool {
        let decoded = urlencoding::decode(key.file_name()).unwrap_or_default();
        let name = display_name(&decoded);
        let mut faults = self.faults.lock();
        faults.transient_upload_names.remove(name) || faults.upload_names.contains(name)
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn issue_signed_upload(&self, request: UploadRequest) -> Result<String, BackendError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let accepted = !self.upload_fault(&request.key);
        let revision = self.documents.lock().values().map(Vec::len).sum();
        self.uploads.lock().push(UploadAttempt {
            key: request.key.clone(),
            accepted,
            revision,
        });
        if !accepted {
            return Err(BackendError::Rejected {
                status: 500,
                message: "injected upload failure".into(),
            });
        }
        let url = self.url_for(&request.key);
        self.objects.lock().insert(
            request.key,
            StoredObject {
                content_type: request.content_type,
                bytes: request.bytes,
            },
        );
        Ok(url)
    }

    async fn persist_document(&self, scope: &DocumentScope, html: &str) -> Result<(), BackendError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults.lock();
            if faults.persist_failures > 0 {
                faults.persist_failures -= 1;
                return Err(BackendError::Unavailable);
            }
        }
        self.documents
            .lock()
            .entry(scope.clone())
            .or_default()
            .push(html.to_string());
        Ok(())
    }

    async fn delete_asset(&self, key: &AssetKey) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults.lock();
            if faults.delete_failures > 0 {
                faults.delete_failures -= 1;
                return Err(BackendError::Network("injected delete failure".into()));
            }
        }
        self.objects.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EditorState {
    markup: String,
    styles: String,
    catalog: Vec<AssetHandle>,
}

/// Editor surface holding markup as a string
///
/// Images are written as `<img src="...">`; patching and removal work on
/// those tags.
#[derive(Debug, Default)]
pub struct MemoryEditor {
    state: Mutex<EditorState>,
}

impl MemoryEditor {
    /// Create editor showing `markup`; the catalog lists its images
    #[must_use]
    pub fn new(markup: impl Into<String>) -> Self {
        let markup = markup.into();
        let mut catalog: Vec<AssetHandle> = inline_image_sources(&markup)
            .into_iter()
            .map(|src| AssetHandle { src, name: None })
            .collect();
        catalog.extend(durable_references(&markup).into_iter().map(AssetHandle::durable));
        Self {
            state: Mutex::new(EditorState {
                markup,
                styles: String::new(),
                catalog,
            }),
        }
    }

    /// With stylesheet
    #[must_use]
    pub fn with_styles(self, styles: impl Into<String>) -> Self {
        self.state.lock().styles = styles.into();
        self
    }

    /// Current markup
    #[must_use]
    pub fn markup(&self) -> String {
        self.state.lock().markup.clone()
    }

    /// Current catalog
    #[must_use]
    pub fn catalog(&self) -> Vec<AssetHandle> {
        self.state.lock().catalog.clone()
    }

    /// Replace markup (catalog unchanged)
    pub fn set_markup(&self, markup: impl Into<String>) {
        self.state.lock().markup = markup.into();
    }

    /// Replace stylesheet
    pub fn set_styles(&self, styles: impl Into<String>) {
        self.state.lock().styles = styles.into();
    }

    /// Append a paragraph
    pub fn append_text(&self, text: &str) {
        self.state.lock().markup.push_str(&format!("<p>{text}</p>"));
    }

    /// Insert an image at the end and list it in the catalog
    pub fn insert_image(&self, name: Option<&str>, src: &str) -> AssetHandle {
        let handle = AssetHandle {
            src: src.to_string(),
            name: name.map(str::to_string),
        };
        let mut state = self.state.lock();
        state.markup.push_str(&format!(r#"<img src="{src}">"#));
        if !state.catalog.iter().any(|h| h.src == src) {
            state.catalog.push(handle.clone());
        }
        handle
    }

    /// Remove every image showing `src`
    ///
    /// Returns the catalog entry if the image was present.
    pub fn remove_image(&self, src: &str) -> Option<AssetHandle> {
        let mut state = self.state.lock();
        let (markup, removed) = map_img_tags(&state.markup, src, |_| None);
        state.markup = markup;
        let position = state.catalog.iter().position(|h| h.src == src);
        let handle = position.map(|i| state.catalog.remove(i));
        if removed == 0 && handle.is_none() {
            return None;
        }
        Some(handle.unwrap_or_else(|| AssetHandle::durable(src)))
    }
}

impl EditorSurface for MemoryEditor {
    fn document(&self) -> EditorDocument {
        let state = self.state.lock();
        EditorDocument::new(state.markup.clone(), state.styles.clone())
    }

    fn assets(&self) -> Vec<AssetHandle> {
        self.catalog()
    }

    fn patch_images(&self, inline_src: &str, descriptor: &AssetDescriptor) -> usize {
        let mut state = self.state.lock();
        let (markup, patched) = map_img_tags(&state.markup, inline_src, |tag| {
            let mut patched = tag.replacen(
                &format!(r#"src="{inline_src}""#),
                &format!(r#"src="{}""#, descriptor.durable_url),
                1,
            );
            if descriptor.has_dimensions() && !patched.contains(" width=") {
                let end = patched.len() - if patched.ends_with("/>") { 2 } else { 1 };
                patched.insert_str(
                    end,
                    &format!(r#" width="{}" height="{}""#, descriptor.width, descriptor.height),
                );
            }
            Some(patched)
        });
        state.markup = markup;
        let restyled = replace_css_url(&mut state.markup, inline_src, &descriptor.durable_url)
            + replace_css_url(&mut state.styles, inline_src, &descriptor.durable_url);
        patched + restyled
    }

    fn replace_catalog_entry(&self, inline_src: &str, descriptor: &AssetDescriptor) {
        let mut state = self.state.lock();
        let Some(position) = state.catalog.iter().position(|h| h.src == inline_src) else {
            return;
        };
        let previous = state.catalog.remove(position);
        if !state.catalog.iter().any(|h| h.src == descriptor.durable_url) {
            state.catalog.insert(
                position,
                AssetHandle {
                    src: descriptor.durable_url.clone(),
                    name: previous.name,
                },
            );
        }
    }
}

/// Point `url(<inline_src>)` references at `durable`, keeping their quoting
fn replace_css_url(text: &mut String, inline_src: &str, durable: &str) -> usize {
    let mut replaced = 0;
    for quote in ["", "'", "\"", "&quot;"] {
        let needle = format!("url({quote}{inline_src}{quote})");
        let count = text.matches(&needle).count();
        if count > 0 {
            *text = text.replace(&needle, &format!("url({quote}{durable}{quote})"));
            replaced += count;
        }
    }
    replaced
}

/// Apply `f` to every `<img ...>` tag whose `src` is exactly `src`
///
/// `f` returns the replacement tag, or `None` to remove it. Returns the new
/// markup and how many tags matched.
fn map_img_tags(markup: &str, src: &str, f: impl Fn(&str) -> Option<String>) -> (String, usize) {
    let needle = format!(r#"src="{src}""#);
    let mut out = String::with_capacity(markup.len());
    let mut matched = 0;
    let mut rest = markup;

    while let Some(start) = rest.find("<img") {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        let end = start + len + 1;
        let tag = &rest[start..end];
        out.push_str(&rest[..start]);
        if tag.contains(&needle) {
            matched += 1;
            if let Some(replacement) = f(tag) {
                out.push_str(&replacement);
            }
        } else {
            out.push_str(tag);
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    (out, matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INLINE: &str = "data:image/png;base64,AAAA";

    #[test]
    fn patch_replaces_source_and_adds_size() {
        let editor = MemoryEditor::new("<p>a</p>");
        editor.insert_image(Some("a.png"), INLINE);
        let descriptor = AssetDescriptor::new("https://cdn/u/d/x-a.png", 4, 3);

        assert_eq!(editor.patch_images(INLINE, &descriptor), 1);
        editor.replace_catalog_entry(INLINE, &descriptor);
        assert_eq!(
            editor.markup(),
            r#"<p>a</p><img src="https://cdn/u/d/x-a.png" width="4" height="3">"#
        );
        assert_eq!(
            editor.catalog(),
            vec![AssetHandle {
                src: "https://cdn/u/d/x-a.png".into(),
                name: Some("a.png".into())
            }]
        );
    }

    #[test]
    fn patch_points_css_urls_at_durable_source() {
        let editor = MemoryEditor::new(format!(r#"<div style="background:url('{INLINE}')"></div>"#))
            .with_styles(format!(".hero{{background-image:url({INLINE})}}"));
        let descriptor = AssetDescriptor::new("https://cdn/u/d/x-bg.png", 4, 3);

        assert_eq!(editor.patch_images(INLINE, &descriptor), 2);
        assert_eq!(
            editor.markup(),
            r#"<div style="background:url('https://cdn/u/d/x-bg.png')"></div>"#
        );
        assert_eq!(
            editor.document().styles,
            ".hero{background-image:url(https://cdn/u/d/x-bg.png)}"
        );
    }

    #[test]
    fn remove_image_drops_tags_and_catalog_entry() {
        let editor = MemoryEditor::new(r#"<img src="https://cdn/a.png"><p>x</p>"#);
        let removed = editor.remove_image("https://cdn/a.png").unwrap();
        assert_eq!(removed.src, "https://cdn/a.png");
        assert_eq!(editor.markup(), "<p>x</p>");
        assert!(editor.catalog().is_empty());
        assert!(editor.remove_image("https://cdn/a.png").is_none());
    }

    #[tokio::test]
    async fn backend_faults_are_consumed() {
        let backend = MemoryBackend::new("https://cdn.example.com/");
        let scope = DocumentScope::new("u", "d");
        backend.fail_next_persists(1);
        assert!(backend.persist_document(&scope, "<p>1</p>").await.is_err());
        backend.persist_document(&scope, "<p>2</p>").await.unwrap();
        assert_eq!(backend.latest_document(&scope).as_deref(), Some("<p>2</p>"));
        assert_eq!(backend.persist_calls(), 2);
    }

    #[tokio::test]
    async fn transient_upload_fault_by_name() {
        let backend = MemoryBackend::new("https://cdn.example.com");
        let key = AssetKey::derive(&DocumentScope::new("u", "d"), "hero shot.png", b"bytes");
        backend.fail_next_upload_of("hero shot.png");

        let request = UploadRequest::new(key.clone(), "image/png", b"bytes".to_vec());
        assert!(backend.issue_signed_upload(request.clone()).await.is_err());
        let url = backend.issue_signed_upload(request).await.unwrap();
        assert_eq!(url, format!("https://cdn.example.com/{key}"));
        assert!(backend.contains(&key));
        assert_eq!(
            backend.upload_log().iter().map(|a| a.accepted).collect::<Vec<_>>(),
            vec![false, true]
        );
    }
}
