use super::metered::MeteredBackend;
use crate::config::SessionConfig;
use crate::backend::RemoteBackend;
use crate::editor::{AssetHandle, EditorEvent, EditorSurface};
use crate::error::ConfigError;
use crate::memory::{MemoryBackend, MemoryEditor};
use crate::preload::NoopWarmer;
use crate::scheduler::SaveOutcome;
use crate::session::EditorSession;
use crate::status::SaveStatus;
use base64::Engine;
use folio_asset::{AssetKey, DocumentScope};
use folio_markup::{durable_references, inline_image_sources};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

const WORDS: [&str; 8] = [
    "launch", "pricing", "features", "about", "contact", "team", "faq", "signup",
];

/// Attempts at the closing save before giving up
const FINAL_SAVE_ATTEMPTS: usize = 20;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// User actions to simulate
    pub steps: u64,
    /// Stop at the first live violation
    pub stop_on_first_violation: bool,
    /// Probability that an inserted image fails its first upload
    pub upload_failure_rate: f64,
    /// Session timing
    pub session: SessionConfig,
    /// Delay added to every backend call
    pub latency_ms: u64,
    /// Longest pause between user actions
    pub max_think_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            steps: 200,
            stop_on_first_violation: false,
            upload_failure_rate: 0.1,
            session: SessionConfig::default()
                .with_autosave_delay(Duration::from_millis(40))
                .with_status_reset(Duration::from_millis(20))
                .with_preload_timeout(Duration::from_millis(50)),
            latency_ms: 5,
            max_think_ms: 60,
        }
    }
}

/// One simulated user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SimulatedAction {
    /// Append text
    Type,
    /// Drop a new image into the page
    InsertImage,
    /// Delete an image
    RemoveImage,
    /// Undo a deletion
    RestoreImage,
    /// Press save
    ManualSave,
    /// Do nothing for a while
    Pause,
}

impl SimulatedAction {
    fn pick(rng: &mut StdRng) -> Self {
        match rng.gen_range(0..100) {
            0..=29 => Self::Type,
            30..=49 => Self::InsertImage,
            50..=64 => Self::RemoveImage,
            65..=74 => Self::RestoreImage,
            75..=84 => Self::ManualSave,
            _ => Self::Pause,
        }
    }
}

/// Invariant broken during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A persisted revision still embeds an image by value
    InlineImagePersisted {
        /// Revision index
        revision: usize,
        /// Number of inline images
        count: usize,
    },
    /// Two pipelines wrote at the same time
    ConcurrentPipelines {
        /// Peak concurrent writes
        observed: usize,
    },
    /// A payload was stored again after a document write
    DuplicateUpload {
        /// Key uploaded again
        key: AssetKey,
    },
    /// Stored asset nothing references after the final save
    OrphanedObject {
        /// Leaked key
        key: AssetKey,
    },
    /// Referenced asset missing from storage after the final save
    MissingObject {
        /// Broken key
        key: AssetKey,
    },
    /// The closing save did not go through
    UnsavedAtEnd,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InlineImagePersisted { revision, count } => {
                write!(f, "revision {revision} persisted {count} inline image(s)")
            }
            Self::ConcurrentPipelines { observed } => {
                write!(f, "{observed} document writes overlapped")
            }
            Self::DuplicateUpload { key } => write!(f, "{key} uploaded twice"),
            Self::OrphanedObject { key } => write!(f, "{key} stored but unreferenced"),
            Self::MissingObject { key } => write!(f, "{key} referenced but not stored"),
            Self::UnsavedAtEnd => f.write_str("final save did not complete"),
        }
    }
}

/// Counters for a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub steps: u64,
    pub text_edits: u64,
    pub images_inserted: u64,
    pub images_removed: u64,
    pub images_restored: u64,
    pub manual_saves: u64,
    pub manual_saves_skipped: u64,
    pub saves_failed: u64,
    pub pipelines_started: u64,
    pub revisions: usize,
    pub uploads: usize,
    pub deletions: usize,
    pub stored_objects: usize,
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: SimulatorStats,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let s = &self.stats;
        let mut out = String::new();
        out.push_str("Folio Session Simulator Report\n");
        out.push_str("==============================\n\n");
        out.push_str(&format!("Seed: {}\n", self.config.seed));
        out.push_str(&format!("Steps: {}\n\n", s.steps));
        out.push_str("Activity:\n");
        out.push_str(&format!("  Text edits: {}\n", s.text_edits));
        out.push_str(&format!(
            "  Images: {} inserted, {} removed, {} restored\n",
            s.images_inserted, s.images_removed, s.images_restored
        ));
        out.push_str(&format!(
            "  Manual saves: {} ({} dropped)\n",
            s.manual_saves, s.manual_saves_skipped
        ));
        out.push_str(&format!("  Pipelines started: {}\n", s.pipelines_started));
        out.push_str(&format!("  Failed saves: {}\n\n", s.saves_failed));
        out.push_str("Backend:\n");
        out.push_str(&format!("  Revisions persisted: {}\n", s.revisions));
        out.push_str(&format!("  Upload calls: {}\n", s.uploads));
        out.push_str(&format!("  Delete calls: {}\n", s.deletions));
        out.push_str(&format!("  Objects stored at end: {}\n\n", s.stored_objects));

        if self.violations.is_empty() {
            out.push_str("Status: PASSED\n");
        } else {
            out.push_str(&format!("Status: FAILED ({} violations)\n", self.violations.len()));
            for violation in &self.violations {
                out.push_str(&format!("  - {violation}\n"));
            }
        }
        out
    }

    /// Machine-readable summary
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "passed": self.passed(),
            "config": self.config,
            "stats": self.stats,
            "violations": self.violations,
        })
    }
}

/// Unique PNG data URL for the `n`th generated image
///
/// # Errors
/// Returns the encoder's error if the PNG could not be written.
pub fn inline_png(n: u32) -> Result<String, image::ImageError> {
    let width = 1 + n % 7;
    let height = 1 + n % 5;
    let [a, b, c, _] = n.to_le_bytes();
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([a, b, c, 255]));
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(buf)
    ))
}

struct Run {
    rng: StdRng,
    config: SimulatorConfig,
    scope: DocumentScope,
    store: Arc<MemoryBackend>,
    metered: Arc<MeteredBackend>,
    editor: Arc<MemoryEditor>,
    session: EditorSession,
    removed: Vec<AssetHandle>,
    next_image: u32,
    stats: SimulatorStats,
    violations: Vec<Violation>,
}

/// Run a simulated editing session
///
/// # Errors
/// Returns [`ConfigError`] if the session configuration is invalid.
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, ConfigError> {
    let scope = DocumentScope::new("sim-owner", format!("doc-{}", config.seed));
    let store = Arc::new(MemoryBackend::new("https://cdn.folio.test"));
    let metered = Arc::new(MeteredBackend::new(
        Arc::clone(&store),
        Duration::from_millis(config.latency_ms),
    ));
    let editor = Arc::new(MemoryEditor::new("<h1>Landing page</h1>"));
    let session = EditorSession::open(
        scope.clone(),
        Arc::clone(&editor) as Arc<dyn EditorSurface>,
        Arc::clone(&metered) as Arc<dyn RemoteBackend>,
        Arc::new(NoopWarmer),
        config.session.clone(),
    )?;

    let mut run = Run {
        rng: StdRng::seed_from_u64(config.seed),
        config,
        scope,
        store,
        metered,
        editor,
        session,
        removed: Vec::new(),
        next_image: 0,
        stats: SimulatorStats::default(),
        violations: Vec::new(),
    };

    tracing::info!(seed = run.config.seed, steps = run.config.steps, "simulation started");
    for _ in 0..run.config.steps {
        let action = SimulatedAction::pick(&mut run.rng);
        run.perform(action).await;
        run.stats.steps += 1;

        let think = run.rng.gen_range(0..=run.config.max_think_ms);
        tokio::time::sleep(Duration::from_millis(think)).await;

        if run.config.stop_on_first_violation && run.check_concurrency() {
            break;
        }
    }

    run.finish().await;
    Ok(run.into_report())
}

impl Run {
    async fn perform(&mut self, action: SimulatedAction) {
        match action {
            SimulatedAction::Type => {
                let word = WORDS[self.rng.gen_range(0..WORDS.len())];
                self.editor.append_text(word);
                self.session.handle_event(EditorEvent::ContentChanged);
                self.stats.text_edits += 1;
            }
            SimulatedAction::InsertImage => {
                let n = self.next_image;
                self.next_image += 1;
                let src = match inline_png(n) {
                    Ok(src) => src,
                    Err(error) => {
                        tracing::warn!(image = n, %error, "could not generate image");
                        return;
                    }
                };
                let name = if self.rng.gen_bool(self.config.upload_failure_rate.clamp(0.0, 1.0)) {
                    let name = format!("flaky-{n}.png");
                    self.store.fail_next_upload_of(name.clone());
                    Some(name)
                } else if self.rng.gen_bool(0.1) {
                    None
                } else {
                    Some(format!("photo-{n}.png"))
                };
                let handle = self.editor.insert_image(name.as_deref(), &src);
                self.session.handle_event(EditorEvent::AssetAdded(handle));
                self.stats.images_inserted += 1;
            }
            SimulatedAction::RemoveImage => {
                let catalog = self.editor.catalog();
                if catalog.is_empty() {
                    return;
                }
                let target = &catalog[self.rng.gen_range(0..catalog.len())];
                if let Some(handle) = self.editor.remove_image(&target.src) {
                    if !handle.is_inline() {
                        self.removed.push(handle.clone());
                    }
                    self.session.handle_event(EditorEvent::AssetRemoved(handle));
                    self.stats.images_removed += 1;
                }
            }
            SimulatedAction::RestoreImage => self.restore(),
            SimulatedAction::ManualSave => {
                self.stats.manual_saves += 1;
                match self.session.save_now().await {
                    SaveOutcome::Saved(_) => {}
                    SaveOutcome::Skipped(_) => self.stats.manual_saves_skipped += 1,
                    SaveOutcome::Failed(_) => self.stats.saves_failed += 1,
                }
            }
            SimulatedAction::Pause => {
                let pause = self.rng.gen_range(0..=self.config.session.autosave_delay_ms * 2);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
        }
    }

    /// Undo a removal whose deletion has not happened yet
    fn restore(&mut self) {
        if self.session.is_saving() {
            return;
        }
        let pending = self.session.pending_deletions();
        let restorable: Vec<usize> = self
            .removed
            .iter()
            .enumerate()
            .filter(|(_, h)| {
                AssetKey::from_durable_url(&h.src, &self.scope).is_some_and(|k| pending.contains(&k))
            })
            .map(|(i, _)| i)
            .collect();
        if restorable.is_empty() {
            return;
        }
        let index = restorable[self.rng.gen_range(0..restorable.len())];
        let handle = self.removed.swap_remove(index);
        self.editor.insert_image(handle.name.as_deref(), &handle.src);
        self.session.handle_event(EditorEvent::AssetAdded(handle));
        self.stats.images_restored += 1;
    }

    fn check_concurrency(&mut self) -> bool {
        let observed = self.metered.peak_concurrent_persists();
        if observed > 1 && !self.violations.iter().any(|v| matches!(v, Violation::ConcurrentPipelines { .. })) {
            self.violations.push(Violation::ConcurrentPipelines { observed });
        }
        !self.violations.is_empty()
    }

    /// Wait for quiet, then save once with no faults and verify storage
    async fn finish(&mut self) {
        self.store.clear_faults();
        let settle = self.config.session.status_reset() + Duration::from_millis(self.config.latency_ms * 4 + 1);

        let mut saved = false;
        for _ in 0..FINAL_SAVE_ATTEMPTS {
            while self.session.is_saving() || self.session.status() != SaveStatus::Idle {
                tokio::time::sleep(settle).await;
            }
            self.session.handle_event(EditorEvent::ContentChanged);
            match self.session.save_now().await {
                SaveOutcome::Saved(_) => {
                    saved = true;
                    break;
                }
                SaveOutcome::Skipped(_) | SaveOutcome::Failed(_) => tokio::time::sleep(settle).await,
            }
        }
        self.session.close();
        // let a timer-triggered save that was already running drain
        while self.session.is_saving() {
            tokio::time::sleep(settle).await;
        }

        if !saved {
            self.violations.push(Violation::UnsavedAtEnd);
        }
        self.check_concurrency();
        self.check_revisions();
        self.check_duplicate_uploads();
        if saved {
            self.check_storage();
        }
    }

    fn check_revisions(&mut self) {
        for (revision, html) in self.store.revisions(&self.scope).iter().enumerate() {
            let count = inline_image_sources(html).len();
            if count > 0 {
                self.violations.push(Violation::InlineImagePersisted { revision, count });
            }
        }
    }

    /// A key may be re-sent only while no document write happened since
    /// its last accepted upload (retry after an aborted batch)
    fn check_duplicate_uploads(&mut self) {
        let mut accepted_at: HashMap<AssetKey, usize> = HashMap::new();
        for attempt in self.store.upload_log() {
            if !attempt.accepted {
                continue;
            }
            if let Some(previous) = accepted_at.insert(attempt.key.clone(), attempt.revision) {
                if previous != attempt.revision {
                    self.violations.push(Violation::DuplicateUpload { key: attempt.key });
                }
            }
        }
    }

    fn check_storage(&mut self) {
        let latest = self.store.latest_document(&self.scope).unwrap_or_default();
        let referenced: BTreeSet<AssetKey> = durable_references(&latest)
            .iter()
            .filter_map(|url| AssetKey::from_durable_url(url, &self.scope))
            .collect();
        let stored = self.store.object_keys();

        for key in stored.difference(&referenced) {
            self.violations.push(Violation::OrphanedObject { key: key.clone() });
        }
        for key in referenced.difference(&stored) {
            self.violations.push(Violation::MissingObject { key: key.clone() });
        }
    }

    fn into_report(mut self) -> SimulatorReport {
        self.stats.pipelines_started = self.session.pipelines_started();
        self.stats.revisions = self.store.revisions(&self.scope).len();
        self.stats.uploads = self.store.upload_calls();
        self.stats.deletions = self.store.delete_calls();
        self.stats.stored_objects = self.store.object_keys().len();

        let report = SimulatorReport {
            config: self.config.clone(),
            stats: self.stats.clone(),
            violations: self.violations.clone(),
        };
        tracing::info!(
            passed = report.passed(),
            violations = report.violations.len(),
            "simulation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_asset::InlineImage;

    #[test]
    fn generated_images_are_distinct() {
        let a = inline_png(1).unwrap();
        let b = inline_png(2).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("data:image/png;base64,"));
        assert_eq!(inline_png(1).unwrap(), a);
    }

    #[test]
    fn generated_image_decodes_to_its_size() {
        let image = InlineImage::parse(&inline_png(12).unwrap()).unwrap();
        assert_eq!(image.content_type(), "image/png");
        assert_eq!(image.dimensions().unwrap(), (6, 3));
    }

    #[test]
    fn violation_display() {
        let v = Violation::OrphanedObject { key: AssetKey::from_raw("o/d/k") };
        assert_eq!(v.to_string(), "o/d/k stored but unreferenced");
    }

    #[tokio::test(start_paused = true)]
    async fn short_run_passes() {
        let config = SimulatorConfig {
            steps: 60,
            seed: 7,
            ..SimulatorConfig::default()
        };
        let report = run_simulator(config).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.revisions > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_recovered() {
        let config = SimulatorConfig {
            steps: 80,
            seed: 11,
            upload_failure_rate: 0.5,
            ..SimulatorConfig::default()
        };
        let report = run_simulator(config).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
    }

    #[tokio::test]
    async fn invalid_session_config_is_rejected() {
        let config = SimulatorConfig {
            session: SessionConfig::default().with_max_concurrent_deletions(0),
            ..SimulatorConfig::default()
        };
        assert!(run_simulator(config).await.is_err());
    }
}
