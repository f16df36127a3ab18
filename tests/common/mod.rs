//! Fake gateways shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskpaper::config::RenderConfig;
use taskpaper::gateway::{
    BackgroundSetter, CalendarEvent, CalendarGateway, DisplayId, GatewayError, GatewayResult,
    RenderedImage, Resolution, TaskExtractor, WallpaperRenderer,
};
use taskpaper::{ArtifactStore, Gateways, RefreshController};
use tokio::sync::Notify;

pub fn event(summary: &str) -> CalendarEvent {
    let start = Utc::now() + chrono::Duration::minutes(15);
    CalendarEvent {
        id: summary.to_lowercase().replace(' ', "-"),
        summary: summary.to_owned(),
        start,
        end: start + chrono::Duration::minutes(30),
        location: None,
        meeting_link: None,
    }
}

/// Calendar that can be scripted, gated, and watched for overlap.
pub struct TestCalendar {
    result: Mutex<GatewayResult<Vec<CalendarEvent>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl TestCalendar {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self {
            result: Mutex::new(Ok(events)),
            gate: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, result: GatewayResult<Vec<CalendarEvent>>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn fail_with(&self, error: GatewayError) {
        self.set(Err(error));
    }

    /// Hold every following fetch until the returned gate is notified.
    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn ungate(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until `n` fetches have started.
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("calendar was not called in time");
    }
}

#[async_trait]
impl CalendarGateway for TestCalendar {
    async fn fetch_events(&self) -> GatewayResult<Vec<CalendarEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

/// Extractor that lists event summaries and counts calls.
#[derive(Default)]
pub struct CountingExtractor {
    calls: AtomicUsize,
    failure: Mutex<Option<GatewayError>>,
}

impl CountingExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, error: GatewayError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl TaskExtractor for CountingExtractor {
    fn name(&self) -> &str {
        "counting"
    }

    async fn extract_tasks(&self, events: &[CalendarEvent]) -> GatewayResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(events.iter().map(|e| format!("Prepare: {}", e.summary)).collect())
    }
}

/// Renderer that records the task lists it was asked to draw.
#[derive(Default)]
pub struct RecordingRenderer {
    seen: Mutex<Vec<Vec<String>>>,
    failure: Mutex<Option<GatewayError>>,
}

impl RecordingRenderer {
    pub fn seen(&self) -> Vec<Vec<String>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn fail_with(&self, error: GatewayError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl WallpaperRenderer for RecordingRenderer {
    async fn render(&self, tasks: &[String], resolution: Resolution) -> GatewayResult<RenderedImage> {
        let mut seen = self.seen.lock().unwrap();
        seen.push(tasks.to_vec());
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(RenderedImage {
            png: format!("render #{}", seen.len()).into_bytes(),
            resolution,
        })
    }
}

/// Setter that records applied paths. Reports a single "all displays"
/// target unless told otherwise.
#[derive(Default)]
pub struct RecordingSetter {
    applied: Mutex<Vec<PathBuf>>,
    displays: Mutex<Option<Vec<DisplayId>>>,
    failure: Mutex<Option<GatewayError>>,
}

impl RecordingSetter {
    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().unwrap().clone()
    }

    pub fn set_displays(&self, displays: Vec<DisplayId>) {
        *self.displays.lock().unwrap() = Some(displays);
    }

    pub fn fail_with(&self, error: GatewayError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl BackgroundSetter for RecordingSetter {
    async fn displays(&self) -> GatewayResult<Vec<DisplayId>> {
        Ok(self
            .displays
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| vec![DisplayId::all()]))
    }

    async fn set_background(&self, path: &Path, _display: &DisplayId) -> GatewayResult<()> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.applied.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

pub struct Fixture {
    pub controller: Arc<RefreshController>,
    pub calendar: Arc<TestCalendar>,
    pub extractor: Arc<CountingExtractor>,
    pub renderer: Arc<RecordingRenderer>,
    pub setter: Arc<RecordingSetter>,
}

pub fn fixture(dir: &Path, keep: usize, events: Vec<CalendarEvent>) -> Fixture {
    let calendar = Arc::new(TestCalendar::new(events));
    let extractor = Arc::new(CountingExtractor::default());
    let renderer = Arc::new(RecordingRenderer::default());
    let setter = Arc::new(RecordingSetter::default());
    let gateways = Gateways {
        calendar: Arc::clone(&calendar) as Arc<dyn CalendarGateway>,
        extractor: Arc::clone(&extractor) as Arc<dyn TaskExtractor>,
        renderer: Arc::clone(&renderer) as Arc<dyn WallpaperRenderer>,
        setter: Arc::clone(&setter) as Arc<dyn BackgroundSetter>,
    };
    let store = Arc::new(ArtifactStore::open(dir, keep).unwrap());
    let render = RenderConfig {
        width: Some(320),
        height: Some(200),
    };
    Fixture {
        controller: Arc::new(RefreshController::new(gateways, store, render)),
        calendar,
        extractor,
        renderer,
        setter,
    }
}

/// Sorted wallpaper files currently in `dir`.
pub fn wallpaper_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("wall-") && n.ends_with(".png"))
        })
        .collect();
    files.sort();
    files
}
