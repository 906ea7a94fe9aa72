//! Autosave scheduler
//!
//! Owns the dirty flag, the debounce timer and the single-flight guard, and
//! drives the [`SavePipeline`] either when the timer fires or on an explicit
//! request. Status changes are published through a [`StatusCell`].
//!
//! # Rules
//!
//! - A change marks the session dirty and re-arms the timer; only the most
//!   recent change governs timing
//! - A save request is dropped (never queued) if the session is clean, the
//!   status is not `Idle`, or another pipeline holds the guard
//! - Success clears the dirty flag only if nothing changed after the
//!   pipeline started
//! - `Success` and `Error` revert to `Idle` after a fixed delay; if changes
//!   arrived after the last pipeline started, the timer is armed once more
//! - Closing cancels the timer; an in-flight pipeline runs to completion

use crate::config::SessionConfig;
use crate::error::SaveError;
use crate::notify::Notifier;
use crate::pipeline::{SavePipeline, SaveReport};
use crate::status::{SaveStatus, StatusCell};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What asked for a save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveTrigger {
    /// Debounce timer fired
    Autosave,
    /// User asked explicitly
    Manual,
}

/// Why a save request did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// No unsaved changes
    Clean,
    /// A save is running or its result is still displayed
    Busy,
    /// Session has been closed
    Closed,
}

/// Result of a save request
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// Pipeline ran and the document was persisted
    Saved(SaveReport),
    /// Request dropped without running the pipeline
    Skipped(SkipReason),
    /// Pipeline ran and failed
    Failed(SaveError),
}

impl SaveOutcome {
    /// Whether the document was persisted
    #[inline]
    #[must_use]
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved(_))
    }
}

#[derive(Debug, Default)]
struct DirtyState {
    dirty: bool,
    generation: u64,
    started_generation: u64,
}

/// Holds the in-flight flag for as long as it lives
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    config: SessionConfig,
    pipeline: SavePipeline,
    status: StatusCell,
    notifier: Notifier,
    dirty: Mutex<DirtyState>,
    in_flight: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    pipelines_started: AtomicU64,
}

/// Debounced, single-flight save driver
#[derive(Clone)]
pub struct AutosaveScheduler {
    shared: Arc<Shared>,
}

impl AutosaveScheduler {
    /// Create scheduler around a pipeline
    #[must_use]
    pub fn new(pipeline: SavePipeline, config: SessionConfig, notifier: Notifier) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                pipeline,
                status: StatusCell::new(),
                notifier,
                dirty: Mutex::new(DirtyState::default()),
                in_flight: AtomicBool::new(false),
                timer: Mutex::new(None),
                shutdown: CancellationToken::new(),
                pipelines_started: AtomicU64::new(0),
            }),
        }
    }

    /// Record a content change
    ///
    /// Must be called from within a Tokio runtime when autosave is enabled.
    pub fn mark_dirty(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        {
            let mut state = self.shared.dirty.lock();
            state.dirty = true;
            state.generation += 1;
        }
        if self.shared.config.autosave_enabled {
            Shared::arm_timer(&self.shared);
        }
    }

    /// Run a save now
    pub async fn save_now(&self) -> SaveOutcome {
        Shared::run(&self.shared, SaveTrigger::Manual).await
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.shared.status.get()
    }

    /// Observe status changes
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.shared.status.subscribe()
    }

    /// Whether unsaved changes exist
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.lock().dirty
    }

    /// Whether a pipeline currently holds the guard
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Number of pipelines started so far
    #[must_use]
    pub fn pipelines_started(&self) -> u64 {
        self.shared.pipelines_started.load(Ordering::Relaxed)
    }

    /// Pipeline driven by this scheduler
    #[must_use]
    pub fn pipeline(&self) -> &SavePipeline {
        &self.shared.pipeline
    }

    /// Stop scheduling saves; cancels a pending timer
    pub fn close(&self) {
        self.shared.shutdown.cancel();
        if let Some(timer) = self.shared.timer.lock().take() {
            timer.abort();
        }
    }

    /// Whether [`close`](Self::close) was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

impl Shared {
    /// (Re)arm the debounce timer, cancelling the previous one
    fn arm_timer(shared: &Arc<Self>) {
        let mut timer = shared.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if shared.shutdown.is_cancelled() {
            return;
        }

        let delay = shared.config.autosave_delay();
        let token = shared.shutdown.clone();
        let owner = Arc::clone(shared);
        *timer = Some(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    // detached so re-arming cannot abort a running save
                    tokio::spawn(async move {
                        Shared::run(&owner, SaveTrigger::Autosave).await;
                    });
                }
            }
        }));
    }

    /// Arm the timer unless one is already pending
    fn arm_timer_if_idle(shared: &Arc<Self>) {
        let pending = shared
            .timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished());
        if !pending {
            Self::arm_timer(shared);
        }
    }

    async fn run(shared: &Arc<Self>, trigger: SaveTrigger) -> SaveOutcome {
        if shared.shutdown.is_cancelled() {
            return SaveOutcome::Skipped(SkipReason::Closed);
        }
        if !shared.dirty.lock().dirty {
            tracing::debug!(?trigger, "nothing to save");
            return SaveOutcome::Skipped(SkipReason::Clean);
        }
        if shared.status.get() != SaveStatus::Idle {
            tracing::debug!(?trigger, status = %shared.status.get(), "save dropped, status not idle");
            return SaveOutcome::Skipped(SkipReason::Busy);
        }
        let Some(_guard) = FlightGuard::acquire(&shared.in_flight) else {
            tracing::debug!(?trigger, "save dropped, pipeline in flight");
            return SaveOutcome::Skipped(SkipReason::Busy);
        };
        if shared.status.transition(SaveStatus::Saving).is_err() {
            return SaveOutcome::Skipped(SkipReason::Busy);
        }

        let generation = {
            let mut state = shared.dirty.lock();
            state.started_generation = state.generation;
            state.generation
        };
        shared.pipelines_started.fetch_add(1, Ordering::Relaxed);
        if trigger == SaveTrigger::Manual {
            shared.notifier.info("Saving…");
        }

        let span = tracing::info_span!("save", document = %shared.pipeline.scope(), trigger = ?trigger);
        let result = shared.pipeline.execute().instrument(span).await;

        match result {
            Ok(report) => {
                {
                    let mut state = shared.dirty.lock();
                    if state.generation == generation {
                        state.dirty = false;
                    }
                }
                let _ = shared.status.transition(SaveStatus::Success);
                if trigger == SaveTrigger::Manual {
                    shared.notifier.success("Saved");
                }
                tracing::info!(?trigger, uploaded = report.uploaded, deleted = report.deleted, "save succeeded");
                Self::schedule_revert(shared, SaveStatus::Success);
                SaveOutcome::Saved(report)
            }
            Err(SaveError::EmptyContent) => {
                let _ = shared.status.transition(SaveStatus::Idle);
                if trigger == SaveTrigger::Manual {
                    shared.notifier.info(SaveError::EmptyContent.user_message());
                }
                tracing::info!(?trigger, "save skipped, document is empty");
                SaveOutcome::Failed(SaveError::EmptyContent)
            }
            Err(error) => {
                let _ = shared.status.transition(SaveStatus::Error);
                shared.notifier.error(error.user_message());
                tracing::error!(?trigger, error = %error, "save failed");
                Self::schedule_revert(shared, SaveStatus::Error);
                SaveOutcome::Failed(error)
            }
        }
    }

    /// Revert a terminal status to `Idle` after the reset delay
    fn schedule_revert(shared: &Arc<Self>, terminal: SaveStatus) {
        let owner = Arc::clone(shared);
        let delay = shared.config.status_reset();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !owner.status.revert(terminal) {
                return;
            }
            let follow_up = {
                let state = owner.dirty.lock();
                state.dirty && state.generation != state.started_generation
            };
            if follow_up && owner.config.autosave_enabled && !owner.shutdown.is_cancelled() {
                tracing::debug!("changes arrived during save, re-arming autosave");
                Self::arm_timer_if_idle(&owner);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RemoteBackend;
    use crate::memory::{MemoryBackend, MemoryEditor};
    use crate::orphan::OrphanCollector;
    use crate::preload::{NoopWarmer, Preloader};
    use crate::tracker::AssetTracker;
    use crate::upload::UploadCoordinator;
    use folio_asset::{DocumentScope, SubstitutionCache};
    use std::time::Duration;

    fn scheduler(markup: &str, config: SessionConfig) -> (AutosaveScheduler, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new("https://cdn.example.com"));
        let dyn_backend: Arc<dyn RemoteBackend> = backend.clone();
        let tracker = Arc::new(AssetTracker::new(DocumentScope::new("u1", "d1")));
        let pipeline = SavePipeline::new(
            Arc::new(MemoryEditor::new(markup)),
            Arc::clone(&dyn_backend),
            UploadCoordinator::new(
                Arc::clone(&dyn_backend),
                Arc::clone(&tracker),
                Arc::new(SubstitutionCache::new()),
                4,
            ),
            Preloader::new(Arc::new(NoopWarmer), Duration::from_secs(1), Duration::from_secs(60)),
            OrphanCollector::new(tracker, dyn_backend, 4),
        );
        (AutosaveScheduler::new(pipeline, config, Notifier::new()), backend)
    }

    #[tokio::test]
    async fn clean_session_skips() {
        let (scheduler, backend) = scheduler("<p>x</p>", SessionConfig::default());
        let outcome = scheduler.save_now().await;
        assert!(matches!(outcome, SaveOutcome::Skipped(SkipReason::Clean)));
        assert_eq!(backend.persist_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_fires_once_after_last_change() {
        let (scheduler, backend) = scheduler("<p>x</p>", SessionConfig::default());
        for _ in 0..5 {
            scheduler.mark_dirty();
            tokio::time::sleep(Duration::from_millis(1_000)).await;
        }
        assert_eq!(backend.persist_calls(), 0);

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(backend.persist_calls(), 1);
        assert!(!scheduler.is_dirty());
        assert_eq!(scheduler.status(), SaveStatus::Success);

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(scheduler.status(), SaveStatus::Idle);
    }

    #[tokio::test]
    async fn manual_save_while_showing_success_is_dropped() {
        let (scheduler, backend) = scheduler("<p>x</p>", SessionConfig::default().with_autosave(false));
        scheduler.mark_dirty();
        assert!(scheduler.save_now().await.is_saved());

        scheduler.mark_dirty();
        let outcome = scheduler.save_now().await;
        assert!(matches!(outcome, SaveOutcome::Skipped(SkipReason::Busy)));
        assert_eq!(backend.persist_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_timer() {
        let (scheduler, backend) = scheduler("<p>x</p>", SessionConfig::default());
        scheduler.mark_dirty();
        scheduler.close();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.persist_calls(), 0);
        assert!(matches!(scheduler.save_now().await, SaveOutcome::Skipped(SkipReason::Closed)));
    }

    #[tokio::test]
    async fn empty_document_returns_to_idle_and_stays_dirty() {
        let (scheduler, backend) = scheduler("   ", SessionConfig::default().with_autosave(false));
        scheduler.mark_dirty();
        let outcome = scheduler.save_now().await;
        assert!(matches!(outcome, SaveOutcome::Failed(SaveError::EmptyContent)));
        assert_eq!(scheduler.status(), SaveStatus::Idle);
        assert!(scheduler.is_dirty());
        assert_eq!(backend.persist_calls(), 0);
    }

    #[test]
    fn guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = FlightGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(FlightGuard::acquire(&flag).is_none());
        drop(first);
        assert!(FlightGuard::acquire(&flag).is_some());
    }
}
