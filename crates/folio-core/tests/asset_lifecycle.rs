use folio_asset::{AssetKey, SubstitutionCache};
use folio_core::memory::{MemoryBackend, StoredObject};
use folio_core::{AssetHandle, AssetTracker, OrphanCollector, RemoteBackend, SaveStatus, UploadCoordinator};
use folio_test_utils::{
    jpeg_data_url, malformed_data_url, manual_config, png_data_url, svg_data_url, test_scope,
    SessionHarness, CDN,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;

fn stored(backend: &MemoryBackend, name: &str) -> (AssetKey, String) {
    let key = AssetKey::derive(&test_scope(), name, name.as_bytes());
    backend.insert_object(
        key.clone(),
        StoredObject {
            content_type: "image/png".into(),
            bytes: name.as_bytes().to_vec(),
        },
    );
    let url = backend.url_for(&key);
    (key, url)
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let backend = Arc::new(MemoryBackend::new(CDN));
    let remote: Arc<dyn RemoteBackend> = backend.clone();
    let (kept, kept_url) = stored(&backend, "kept.png");
    let (dropped, dropped_url) = stored(&backend, "dropped.png");

    let tracker = Arc::new(AssetTracker::new(test_scope()));
    tracker.seed([kept.clone(), dropped.clone()]);
    tracker.on_asset_removed(&dropped_url);
    let collector = OrphanCollector::new(Arc::clone(&tracker), remote, 4);

    let markup = format!(r#"<img src="{kept_url}">"#);
    let first = collector.reconcile(&markup).await;
    assert_eq!(first.deleted, vec![dropped.clone()]);
    assert!(first.failed.is_empty());

    let second = collector.reconcile(&markup).await;
    assert!(second.deleted.is_empty());
    assert_eq!(backend.delete_calls(), 1);
    assert_eq!(tracker.current(), BTreeSet::from([kept.clone()]));
    assert!(tracker.pending().is_empty());
    assert!(backend.contains(&kept));
}

#[tokio::test]
async fn test_failed_deletion_is_retried_next_pass() {
    let backend = Arc::new(MemoryBackend::new(CDN));
    let remote: Arc<dyn RemoteBackend> = backend.clone();
    let (key, url) = stored(&backend, "old.png");

    let tracker = Arc::new(AssetTracker::new(test_scope()));
    tracker.seed([key.clone()]);
    tracker.on_asset_removed(&url);
    let collector = OrphanCollector::new(Arc::clone(&tracker), remote, 4);

    backend.fail_next_deletions(1);
    let first = collector.reconcile("<p>text</p>").await;
    assert_eq!(first.failed.len(), 1);
    assert!(tracker.is_pending(&key));
    assert!(backend.contains(&key));

    let second = collector.reconcile("<p>text</p>").await;
    assert_eq!(second.deleted, vec![key.clone()]);
    assert!(!backend.contains(&key));
}

#[tokio::test]
async fn test_substitution_cache_only_grows() {
    let backend = Arc::new(MemoryBackend::new(CDN));
    let remote: Arc<dyn RemoteBackend> = backend.clone();
    let tracker = Arc::new(AssetTracker::new(test_scope()));
    let cache = Arc::new(SubstitutionCache::new());
    let uploads = UploadCoordinator::new(remote, tracker, Arc::clone(&cache), 4);

    let a = AssetHandle::inline("a.png", png_data_url(2, 2, 1));
    let b = AssetHandle::inline("b.jpg", jpeg_data_url(3, 2));

    let first = uploads.upload_pending(&[a.clone()]).await.unwrap();
    assert_eq!(first.uploaded.len(), 1);
    let first_url = cache.get(&a.src).unwrap().durable_url;

    let second = uploads.upload_pending(&[a.clone(), b.clone()]).await.unwrap();
    assert_eq!(second.uploaded.len(), 1);
    assert_eq!(second.reused, 1);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&a.src).unwrap().durable_url, first_url);
    assert_eq!(cache.get(&b.src).unwrap().width, 3);
    assert_eq!(backend.upload_calls(), 2);
}

#[tokio::test]
async fn test_malformed_image_fails_before_any_transfer() {
    let harness = SessionHarness::new("<h1>Launch</h1>", manual_config());
    harness.insert_image("good.png", &png_data_url(2, 2, 1));
    harness.insert_image("broken.png", &malformed_data_url());

    let outcome = harness.session.save_now().await;
    assert!(!outcome.is_saved());
    assert_eq!(harness.backend.upload_calls(), 0);
    assert_eq!(harness.backend.persist_calls(), 0);
    assert_eq!(harness.session.status(), SaveStatus::Error);
}

#[tokio::test]
async fn test_svg_is_uploaded_without_dimensions() {
    let harness = SessionHarness::new("<h1>Launch</h1>", manual_config());
    let handle = harness.insert_image("logo.svg", &svg_data_url());

    assert!(harness.session.save_now().await.is_saved());
    let descriptor = harness.session.substitution_cache().get(&handle.src).unwrap();
    assert!(!descriptor.has_dimensions());

    let persisted = harness.latest_document().unwrap();
    assert!(persisted.contains(&descriptor.durable_url));
    assert!(!persisted.contains("data:"));
}

#[tokio::test]
async fn test_existing_assets_are_seeded_on_open() {
    let backend = Arc::new(MemoryBackend::new(CDN));
    let (key, url) = stored(&backend, "existing.png");
    let markup = format!(r#"<h1>Launch</h1><img src="{url}">"#);
    let remote: Arc<dyn RemoteBackend> = backend.clone();
    let harness = SessionHarness::with_backend(&markup, manual_config(), backend, remote);
    assert!(harness.session.current_assets().contains(&key));
    assert_eq!(harness.durable_sources(), vec![url.clone()]);

    harness.remove_image(&url);
    assert!(harness.session.save_now().await.is_saved());
    assert!(!harness.backend.contains(&key));
}
