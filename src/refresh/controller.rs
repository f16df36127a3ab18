//! Single-flight refresh controller.
//!
//! [`RefreshController::attempt_refresh`] is the only way a wallpaper gets
//! refreshed. Timer ticks, host commands and in-process callers all go
//! through it, and at most one cycle runs at a time: a caller that arrives
//! while a cycle is in flight gets `skipped:busy` back immediately instead of
//! waiting.
//!
//! A cycle runs four stages in order (fetch, triage, render, apply). The
//! first failure ends the cycle, is recorded with its stage and gateway
//! error kind, and leaves the previous wallpaper untouched. Nothing escapes
//! `attempt_refresh`: gateway errors and gateway panics alike become a
//! `failed:<stage>` cycle.

use super::cycle::{CycleResult, CycleStatus, RefreshCycle, RefreshStatus, Stage, Trigger};
use crate::artifact::ArtifactStore;
use crate::config::RenderConfig;
use crate::gateway::{
    BackgroundSetter, CalendarGateway, GatewayError, GatewayErrorKind, Resolution, TaskExtractor,
    WallpaperRenderer,
};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// The four external collaborators of a refresh cycle.
#[derive(Clone)]
pub struct Gateways {
    pub calendar: Arc<dyn CalendarGateway>,
    pub extractor: Arc<dyn TaskExtractor>,
    pub renderer: Arc<dyn WallpaperRenderer>,
    pub setter: Arc<dyn BackgroundSetter>,
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways")
            .field("extractor", &self.extractor.name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    paused: bool,
    last_cycle: Option<RefreshCycle>,
    consecutive_failures: u32,
    last_success_at: Option<DateTime<Utc>>,
    next_seq: u64,
}

/// Clears the running flag when the cycle ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct StageFailure {
    stage: Stage,
    error: GatewayError,
    artifact: Option<PathBuf>,
}

impl StageFailure {
    fn new(stage: Stage, error: GatewayError) -> Self {
        Self {
            stage,
            error,
            artifact: None,
        }
    }
}

/// Owns refresh state and runs cycles one at a time.
pub struct RefreshController {
    gateways: Gateways,
    store: Arc<ArtifactStore>,
    render: RenderConfig,
    running: AtomicBool,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<RefreshCycle>,
}

impl std::fmt::Debug for RefreshController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshController")
            .field("gateways", &self.gateways)
            .field("store", &self.store.dir())
            .field("running", &self.is_running())
            .finish()
    }
}

impl RefreshController {
    /// Create a controller. `render` may pin the wallpaper size; unset
    /// dimensions come from the background setter, then 1920x1080.
    #[must_use]
    pub fn new(gateways: Gateways, store: Arc<ArtifactStore>, render: RenderConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateways,
            store,
            render,
            running: AtomicBool::new(false),
            state: Mutex::new(RefreshState {
                next_seq: 1,
                ..RefreshState::default()
            }),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every finished cycle (skips are not broadcast).
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshCycle> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop scheduled ticks from starting cycles. An in-flight cycle finishes.
    pub fn pause(&self) {
        self.set_paused(true);
    }

    /// Let scheduled ticks start cycles again. Does not start one itself.
    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state();
        if state.paused != paused {
            state.paused = paused;
            tracing::info!(paused, "refresh pause changed");
        }
    }

    #[must_use]
    pub fn get_status(&self) -> RefreshStatus {
        let state = self.state();
        let awaiting_user = state
            .last_cycle
            .as_ref()
            .and_then(|c| c.error.as_ref())
            .is_some_and(GatewayError::needs_user);
        RefreshStatus {
            paused: state.paused,
            is_running: self.is_running(),
            last_cycle: state.last_cycle.clone(),
            consecutive_failures: state.consecutive_failures,
            last_success_at: state.last_success_at,
            current_artifact: self.store.current(),
            awaiting_user,
        }
    }

    /// Run one refresh cycle unless one is already running.
    ///
    /// Returns `skipped:busy` without waiting when a cycle is in flight, and
    /// `skipped:paused` for ticks while paused. Manual triggers ignore pause.
    pub async fn attempt_refresh(&self, trigger: Trigger) -> CycleResult {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(?trigger, "refresh already running, skipping");
            return CycleResult::Skipped(CycleStatus::SkippedBusy);
        }
        let _running = RunningGuard(&self.running);

        let seq = {
            let mut state = self.state();
            if trigger == Trigger::Tick && state.paused {
                tracing::debug!("refresh paused, skipping tick");
                return CycleResult::Skipped(CycleStatus::SkippedPaused);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            seq
        };

        let started_at = Utc::now();
        tracing::debug!(seq, ?trigger, "refresh cycle started");
        let outcome = self.run_stages(seq).await;

        let cycle = match outcome {
            Ok((tasks, artifact)) => RefreshCycle {
                seq,
                started_at,
                finished_at: Utc::now(),
                trigger,
                status: CycleStatus::Succeeded,
                tasks,
                error: None,
                artifact: Some(artifact),
            },
            Err(failure) => RefreshCycle {
                seq,
                started_at,
                finished_at: Utc::now(),
                trigger,
                status: CycleStatus::Failed(failure.stage),
                tasks: Vec::new(),
                error: Some(failure.error),
                artifact: failure.artifact,
            },
        };
        self.record(&cycle);
        CycleResult::Finished(Box::new(cycle))
    }

    async fn run_stages(&self, seq: u64) -> Result<(Vec<String>, PathBuf), StageFailure> {
        let g = &self.gateways;

        let events = guarded(Stage::Fetch, g.calendar.fetch_events())
            .await
            .map_err(|e| StageFailure::new(Stage::Fetch, e))?;

        let tasks = if events.is_empty() {
            Vec::new()
        } else {
            guarded(Stage::Triage, g.extractor.extract_tasks(&events))
                .await
                .map_err(|e| StageFailure::new(Stage::Triage, e))?
        };

        let resolution = self.resolution().await;
        let image = guarded(Stage::Render, g.renderer.render(&tasks, resolution))
            .await
            .map_err(|e| StageFailure::new(Stage::Render, e))?;

        let displays = guarded(Stage::Apply, g.setter.displays())
            .await
            .map_err(|e| StageFailure::new(Stage::Apply, e))?;
        if displays.is_empty() {
            return Err(StageFailure::new(
                Stage::Apply,
                GatewayError::os("no displays to apply the wallpaper to"),
            ));
        }

        let applied = AssertUnwindSafe(self.store.persist_and_apply(
            &image,
            seq,
            &displays,
            g.setter.as_ref(),
        ))
        .catch_unwind()
        .await;
        match applied {
            Ok(Ok(path)) => Ok((tasks, path)),
            Ok(Err(failure)) => Err(StageFailure {
                stage: Stage::Apply,
                error: failure.error,
                artifact: failure.artifact,
            }),
            Err(panic) => Err(StageFailure::new(
                Stage::Apply,
                panicked(Stage::Apply, panic.as_ref()),
            )),
        }
    }

    /// Configured size, then the setter's primary display, then the fallback.
    async fn resolution(&self) -> Resolution {
        if let (Some(width), Some(height)) = (self.render.width, self.render.height) {
            return Resolution::new(width, height);
        }
        let detected = AssertUnwindSafe(self.gateways.setter.primary_resolution())
            .catch_unwind()
            .await
            .ok()
            .flatten()
            .filter(|r| !r.is_empty())
            .unwrap_or(Resolution::FALLBACK);
        Resolution::new(
            self.render.width.unwrap_or(detected.width),
            self.render.height.unwrap_or(detected.height),
        )
    }

    fn record(&self, cycle: &RefreshCycle) {
        {
            let mut state = self.state();
            if cycle.succeeded() {
                state.consecutive_failures = 0;
                state.last_success_at = Some(cycle.finished_at);
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            }
            state.last_cycle = Some(cycle.clone());
        }

        match &cycle.error {
            None => tracing::info!(
                seq = cycle.seq,
                tasks = cycle.tasks.len(),
                artifact = ?cycle.artifact,
                "wallpaper refreshed"
            ),
            Some(error) => tracing::warn!(
                seq = cycle.seq,
                status = %cycle.status,
                kind = %error.kind,
                error = %error.message,
                "refresh cycle failed"
            ),
        }

        // No subscribers is fine.
        let _ = self.events.send(cycle.clone());
    }
}

/// Run a gateway call, turning a panic into a failure of `stage`.
async fn guarded<T>(
    stage: Stage,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(panicked(stage, panic.as_ref())),
    }
}

fn panicked(stage: Stage, payload: &(dyn std::any::Any + Send)) -> GatewayError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    let kind = match stage {
        Stage::Fetch | Stage::Triage => GatewayErrorKind::NetworkError,
        Stage::Render => GatewayErrorKind::RenderError,
        Stage::Apply => GatewayErrorKind::OsError,
    };
    tracing::error!(%stage, %message, "gateway panicked");
    GatewayError::new(kind, format!("{stage} gateway panicked: {message}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::gateway::{CalendarEvent, DisplayId, GatewayResult, RenderedImage};
    use async_trait::async_trait;
    use std::path::Path;

    struct NoEvents;

    #[async_trait]
    impl CalendarGateway for NoEvents {
        async fn fetch_events(&self) -> GatewayResult<Vec<CalendarEvent>> {
            Ok(Vec::new())
        }
    }

    struct PanickingCalendar;

    #[async_trait]
    impl CalendarGateway for PanickingCalendar {
        async fn fetch_events(&self) -> GatewayResult<Vec<CalendarEvent>> {
            panic!("calendar exploded");
        }
    }

    struct Echo;

    #[async_trait]
    impl TaskExtractor for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn extract_tasks(&self, events: &[CalendarEvent]) -> GatewayResult<Vec<String>> {
            Ok(events.iter().map(|e| e.summary.clone()).collect())
        }
    }

    /// Remembers the resolution it was asked for.
    #[derive(Default)]
    struct SizeRecorder(Mutex<Option<Resolution>>);

    #[async_trait]
    impl WallpaperRenderer for SizeRecorder {
        async fn render(
            &self,
            _tasks: &[String],
            resolution: Resolution,
        ) -> GatewayResult<RenderedImage> {
            *self.0.lock().unwrap() = Some(resolution);
            Ok(RenderedImage {
                png: vec![1, 2, 3],
                resolution,
            })
        }
    }

    struct Screen(Option<Resolution>);

    #[async_trait]
    impl BackgroundSetter for Screen {
        async fn displays(&self) -> GatewayResult<Vec<DisplayId>> {
            Ok(vec![DisplayId::all()])
        }
        async fn primary_resolution(&self) -> Option<Resolution> {
            self.0
        }
        async fn set_background(&self, _path: &Path, _display: &DisplayId) -> GatewayResult<()> {
            Ok(())
        }
    }

    fn controller(
        calendar: Arc<dyn CalendarGateway>,
        renderer: Arc<SizeRecorder>,
        screen: Option<Resolution>,
        render: RenderConfig,
        dir: &Path,
    ) -> RefreshController {
        let gateways = Gateways {
            calendar,
            extractor: Arc::new(Echo),
            renderer,
            setter: Arc::new(Screen(screen)),
        };
        let store = Arc::new(ArtifactStore::open(dir, 3).unwrap());
        RefreshController::new(gateways, store, render)
    }

    #[tokio::test]
    async fn gateway_panic_becomes_stage_failure_and_releases_flag() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(
            Arc::new(PanickingCalendar),
            Arc::new(SizeRecorder::default()),
            None,
            RenderConfig::default(),
            dir.path(),
        );

        let result = ctl.attempt_refresh(Trigger::Manual).await;
        assert_eq!(result.status(), CycleStatus::Failed(Stage::Fetch));
        let error = result.cycle().unwrap().error.clone().unwrap();
        assert!(error.message.contains("calendar exploded"));
        assert!(!ctl.is_running());

        let again = ctl.attempt_refresh(Trigger::Manual).await;
        assert!(!again.is_skip());
        assert_eq!(ctl.get_status().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn resolution_prefers_config_then_screen_then_fallback() {
        let dir = tempfile::tempdir().unwrap();

        let renderer = Arc::new(SizeRecorder::default());
        let pinned = RenderConfig {
            width: Some(800),
            height: Some(600),
        };
        let ctl = controller(
            Arc::new(NoEvents),
            Arc::clone(&renderer),
            Some(Resolution::new(2560, 1440)),
            pinned,
            dir.path(),
        );
        ctl.attempt_refresh(Trigger::Manual).await;
        assert_eq!(*renderer.0.lock().unwrap(), Some(Resolution::new(800, 600)));

        let renderer = Arc::new(SizeRecorder::default());
        let ctl = controller(
            Arc::new(NoEvents),
            Arc::clone(&renderer),
            Some(Resolution::new(2560, 1440)),
            RenderConfig::default(),
            dir.path(),
        );
        ctl.attempt_refresh(Trigger::Manual).await;
        assert_eq!(*renderer.0.lock().unwrap(), Some(Resolution::new(2560, 1440)));

        let renderer = Arc::new(SizeRecorder::default());
        let ctl = controller(
            Arc::new(NoEvents),
            Arc::clone(&renderer),
            None,
            RenderConfig::default(),
            dir.path(),
        );
        ctl.attempt_refresh(Trigger::Manual).await;
        assert_eq!(*renderer.0.lock().unwrap(), Some(Resolution::FALLBACK));
    }

    #[tokio::test]
    async fn sequence_numbers_increase_and_skips_do_not_consume() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(
            Arc::new(NoEvents),
            Arc::new(SizeRecorder::default()),
            None,
            RenderConfig::default(),
            dir.path(),
        );
        ctl.pause();
        assert_eq!(
            ctl.attempt_refresh(Trigger::Tick).await.status(),
            CycleStatus::SkippedPaused
        );
        let first = ctl.attempt_refresh(Trigger::Manual).await;
        let second = ctl.attempt_refresh(Trigger::Manual).await;
        assert_eq!(first.cycle().unwrap().seq, 1);
        assert_eq!(second.cycle().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn subscribers_see_finished_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(
            Arc::new(NoEvents),
            Arc::new(SizeRecorder::default()),
            None,
            RenderConfig::default(),
            dir.path(),
        );
        let mut rx = ctl.subscribe();
        ctl.attempt_refresh(Trigger::Manual).await;
        let cycle = rx.recv().await.unwrap();
        assert!(cycle.succeeded());
        assert!(cycle.tasks.is_empty());
    }
}
