//! Save pipeline
//!
//! One save, start to finish:
//! 1. Reject empty content before touching the network
//! 2. Upload inline assets (all-or-nothing): the editor's catalog plus any
//!    inline reference found in the markup or styles (`srcset`, CSS `url()`)
//! 3. Preload the fresh durable URLs, then patch the live editor
//! 4. Re-read markup and styles and rewrite them for persistence
//! 5. Persist the document
//! 6. Reconcile storage against the persisted markup
//!
//! Any failure before step 5 completes leaves the persisted document as it
//! was. Reconciliation failures never fail the save.

use crate::backend::RemoteBackend;
use crate::editor::{AssetHandle, EditorDocument, EditorSurface};
use crate::error::{PersistenceError, SaveError, SaveResult};
use crate::orphan::OrphanCollector;
use crate::preload::Preloader;
use crate::upload::UploadCoordinator;
use folio_asset::{DocumentScope, SubstitutionCache};
use folio_markup::{inline_css_sources, inline_image_sources, is_blank_markup, MarkupRewriter};
use serde::Serialize;
use std::sync::Arc;

/// What a successful save did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Assets uploaded by this save
    pub uploaded: usize,
    /// Inline assets answered from the cache
    pub reused: usize,
    /// Editor nodes patched to durable sources
    pub patched: usize,
    /// Images in the persisted markup
    pub images: usize,
    /// Inline images dropped for lack of a substitution
    pub dropped_inline: usize,
    /// Inline `srcset` candidates and CSS urls removed for the same reason
    pub dropped_references: usize,
    /// Orphans removed from storage
    pub deleted: usize,
    /// Orphan deletions that failed
    pub deletion_failures: usize,
    /// Size of the persisted document
    pub persisted_bytes: usize,
}

/// Append the page styles to the markup as a `<style>` block
#[must_use]
pub fn compose_document(markup: &str, styles: &str) -> String {
    if styles.trim().is_empty() {
        markup.to_string()
    } else {
        format!("{markup}<style>{styles}</style>")
    }
}

/// The save pipeline of one editing session
pub struct SavePipeline {
    scope: DocumentScope,
    editor: Arc<dyn EditorSurface>,
    backend: Arc<dyn RemoteBackend>,
    uploads: UploadCoordinator,
    preloader: Preloader,
    collector: OrphanCollector,
}

impl SavePipeline {
    /// Assemble pipeline from its stages
    #[must_use]
    pub fn new(
        editor: Arc<dyn EditorSurface>,
        backend: Arc<dyn RemoteBackend>,
        uploads: UploadCoordinator,
        preloader: Preloader,
        collector: OrphanCollector,
    ) -> Self {
        Self {
            scope: collector.scope().clone(),
            editor,
            backend,
            uploads,
            preloader,
            collector,
        }
    }

    /// Owning document
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &DocumentScope {
        &self.scope
    }

    /// Session substitution cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<SubstitutionCache> {
        self.uploads.cache()
    }

    /// Run one save
    ///
    /// # Errors
    /// - [`SaveError::EmptyContent`] if the editor holds nothing to persist
    /// - [`SaveError::Upload`] if an inline asset could not be uploaded
    /// - [`SaveError::Persistence`] if the document write failed
    pub async fn execute(&self) -> SaveResult<SaveReport> {
        let initial = self.editor.document();
        if is_blank_markup(&initial.markup) {
            return Err(SaveError::EmptyContent);
        }

        let inventory = inventory(self.editor.assets(), &initial);
        let batch = self.uploads.upload_pending(&inventory).await?;

        let mut report = SaveReport {
            uploaded: batch.uploaded.len(),
            reused: batch.reused,
            ..SaveReport::default()
        };

        if !batch.is_empty() {
            let preload = self.preloader.preload(&batch.substitutions).await;
            tracing::debug!(loaded = preload.loaded, failed = preload.failed, "preload finished");
            report.patched = self
                .uploads
                .apply_to_editor(self.editor.as_ref(), &batch.substitutions);
        }

        let document = self.editor.document();
        let substitutions = self.cache().snapshot();
        let rewriter = MarkupRewriter::new(&substitutions);
        let rewritten = rewriter.rewrite(&document.markup);
        let styles = rewriter.rewrite_styles(&document.styles);
        let html = compose_document(&rewritten.markup, &styles);
        debug_assert!(inline_image_sources(&html).is_empty());

        report.images = rewritten.images;
        report.dropped_inline = rewritten.dropped_inline;
        report.dropped_references = rewritten.dropped_references;
        report.persisted_bytes = html.len();

        self.backend
            .persist_document(&self.scope, &html)
            .await
            .map_err(|source| PersistenceError {
                document: self.scope.clone(),
                source,
            })?;
        tracing::info!(document = %self.scope, bytes = html.len(), images = report.images, "document persisted");

        let reconcile = self.collector.reconcile(&html).await;
        report.deleted = reconcile.deleted.len();
        report.deletion_failures = reconcile.failed.len();
        Ok(report)
    }
}

/// Catalog entries plus inline references the catalog does not list
fn inventory(mut catalog: Vec<AssetHandle>, document: &EditorDocument) -> Vec<AssetHandle> {
    let discovered = inline_image_sources(&document.markup)
        .into_iter()
        .chain(inline_css_sources(&document.styles));
    for src in discovered {
        if !catalog.iter().any(|h| h.src == src) {
            catalog.push(AssetHandle { src, name: None });
        }
    }
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockRemoteBackend;
    use crate::error::BackendError;
    use crate::memory::MemoryEditor;
    use crate::preload::NoopWarmer;
    use crate::tracker::AssetTracker;
    use base64::Engine;
    use std::io::Cursor;
    use std::time::Duration;

    fn png_src(width: u32, height: u32) -> String {
        let mut buf = Vec::new();
        image::RgbaImage::new(width, height)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(buf)
        )
    }

    fn pipeline(editor: Arc<MemoryEditor>, backend: MockRemoteBackend) -> SavePipeline {
        let backend: Arc<dyn RemoteBackend> = Arc::new(backend);
        let tracker = Arc::new(AssetTracker::new(DocumentScope::new("u1", "d1")));
        SavePipeline::new(
            editor,
            Arc::clone(&backend),
            UploadCoordinator::new(
                Arc::clone(&backend),
                Arc::clone(&tracker),
                Arc::new(SubstitutionCache::new()),
                4,
            ),
            Preloader::new(Arc::new(NoopWarmer), Duration::from_secs(1), Duration::from_secs(60)),
            OrphanCollector::new(tracker, backend, 4),
        )
    }

    #[test]
    fn styles_are_appended() {
        assert_eq!(compose_document("<p>a</p>", ""), "<p>a</p>");
        assert_eq!(
            compose_document("<p>a</p>", "p{color:red}"),
            "<p>a</p><style>p{color:red}</style>"
        );
    }

    #[tokio::test]
    async fn empty_content_never_reaches_backend() {
        let mut backend = MockRemoteBackend::new();
        backend.expect_persist_document().never();
        backend.expect_issue_signed_upload().never();
        let editor = Arc::new(MemoryEditor::new("<body>\n</body>"));

        let err = pipeline(editor, backend).execute().await.unwrap_err();
        assert!(matches!(err, SaveError::EmptyContent));
    }

    #[tokio::test]
    async fn persistence_failure_skips_reconcile() {
        let mut backend = MockRemoteBackend::new();
        backend
            .expect_persist_document()
            .times(1)
            .returning(|_, _| Err(BackendError::Unavailable));
        backend.expect_delete_asset().never();
        let editor = Arc::new(MemoryEditor::new("<p>hello</p>"));

        let err = pipeline(editor, backend).execute().await.unwrap_err();
        assert!(matches!(err, SaveError::Persistence(_)));
    }

    #[tokio::test]
    async fn persists_rewritten_markup_with_styles() {
        let mut backend = MockRemoteBackend::new();
        backend
            .expect_persist_document()
            .withf(|_, html| html.contains(r#"loading="eager""#) && html.ends_with("<style>h1{margin:0}</style>"))
            .times(1)
            .returning(|_, _| Ok(()));
        let editor = Arc::new(MemoryEditor::new(r#"<h1>Hi</h1><img src="https://cdn/stock.png">"#).with_styles("h1{margin:0}"));

        let report = pipeline(editor, backend).execute().await.unwrap();
        assert_eq!(report.images, 1);
        assert_eq!(report.uploaded, 0);
    }

    #[tokio::test]
    async fn inline_style_urls_are_uploaded_and_substituted() {
        let hero = png_src(3, 2);
        let banner = png_src(5, 4);
        let mut backend = MockRemoteBackend::new();
        backend
            .expect_issue_signed_upload()
            .times(2)
            .returning(|req| Ok(format!("https://cdn.example.com/{}", req.key)));
        backend
            .expect_persist_document()
            .withf(|_, html| inline_image_sources(html).is_empty() && !html.contains("data:"))
            .times(1)
            .returning(|_, _| Ok(()));
        backend.expect_delete_asset().never();

        let markup = format!(r#"<section style="background:url('{hero}')"><h1>Hi</h1></section>"#);
        let styles = format!(".banner{{background-image:url({banner})}}");
        let editor = Arc::new(MemoryEditor::new(markup).with_styles(styles));

        let report = pipeline(Arc::clone(&editor), backend).execute().await.unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.dropped_references, 0);
    }

    #[test]
    fn inventory_adds_uncatalogued_inline_references() {
        let catalog = vec![AssetHandle::inline("a.png", "data:image/png;base64,AAAA")];
        let document = EditorDocument::new(
            r#"<img src="data:image/png;base64,AAAA"><div style="background:url(data:image/gif;base64,R0lG)"></div>"#,
            "p{background:url('data:image/png;base64,BBBB')} @font-face{src:url(data:font/woff2;base64,d09G)}",
        );
        let sources: Vec<String> = inventory(catalog, &document).into_iter().map(|h| h.src).collect();
        assert_eq!(
            sources,
            vec![
                "data:image/png;base64,AAAA",
                "data:image/gif;base64,R0lG",
                "data:image/png;base64,BBBB",
            ]
        );
    }
}
