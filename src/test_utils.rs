//! Shared fake gateways for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::artifact::ArtifactStore;
use crate::config::RenderConfig;
use crate::gateway::{
    BackgroundSetter, CalendarEvent, CalendarGateway, DisplayId, GatewayError, GatewayResult,
    RenderedImage, Resolution, TaskExtractor, WallpaperRenderer,
};
use crate::refresh::{Gateways, RefreshController};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One event starting in ten minutes.
pub fn upcoming_event(summary: &str) -> CalendarEvent {
    let start = Utc::now() + chrono::Duration::minutes(10);
    CalendarEvent {
        id: summary.to_lowercase(),
        summary: summary.to_owned(),
        start,
        end: start + chrono::Duration::minutes(30),
        location: None,
        meeting_link: None,
    }
}

/// Calendar whose next answer can be swapped between calls.
pub struct ScriptedCalendar {
    result: Mutex<GatewayResult<Vec<CalendarEvent>>>,
    calls: AtomicUsize,
}

impl ScriptedCalendar {
    pub fn ok(events: Vec<CalendarEvent>) -> Self {
        Self {
            result: Mutex::new(Ok(events)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: GatewayError) -> Self {
        Self {
            result: Mutex::new(Err(error)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, result: GatewayResult<Vec<CalendarEvent>>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarGateway for ScriptedCalendar {
    async fn fetch_events(&self) -> GatewayResult<Vec<CalendarEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

/// Extractor that turns each event summary into a task.
#[derive(Default)]
pub struct SummaryExtractor {
    calls: AtomicUsize,
}

impl SummaryExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExtractor for SummaryExtractor {
    fn name(&self) -> &str {
        "summary"
    }

    async fn extract_tasks(&self, events: &[CalendarEvent]) -> GatewayResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(events.iter().map(|e| e.summary.clone()).collect())
    }
}

/// Renderer producing a few fixed bytes.
#[derive(Default)]
pub struct StubRenderer {
    calls: AtomicUsize,
}

impl StubRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WallpaperRenderer for StubRenderer {
    async fn render(&self, tasks: &[String], resolution: Resolution) -> GatewayResult<RenderedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RenderedImage {
            png: tasks.join("\n").into_bytes(),
            resolution,
        })
    }
}

/// Setter that records what was applied.
#[derive(Default)]
pub struct RecordingSetter {
    applied: Mutex<Vec<PathBuf>>,
}

impl RecordingSetter {
    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackgroundSetter for RecordingSetter {
    async fn displays(&self) -> GatewayResult<Vec<DisplayId>> {
        Ok(vec![DisplayId::all()])
    }

    async fn set_background(&self, path: &Path, _display: &DisplayId) -> GatewayResult<()> {
        self.applied.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// A controller wired to fakes, with handles to inspect them.
pub struct Harness {
    pub controller: Arc<RefreshController>,
    pub calendar: Arc<ScriptedCalendar>,
    pub setter: Arc<RecordingSetter>,
}

pub fn harness(dir: &Path, calendar: ScriptedCalendar) -> Harness {
    let calendar = Arc::new(calendar);
    let setter = Arc::new(RecordingSetter::default());
    let gateways = Gateways {
        calendar: Arc::clone(&calendar) as Arc<dyn CalendarGateway>,
        extractor: Arc::new(SummaryExtractor::default()),
        renderer: Arc::new(StubRenderer::default()),
        setter: Arc::clone(&setter) as Arc<dyn BackgroundSetter>,
    };
    let store = Arc::new(ArtifactStore::open(dir, 3).unwrap());
    Harness {
        controller: Arc::new(RefreshController::new(
            gateways,
            store,
            RenderConfig {
                width: Some(64),
                height: Some(36),
            },
        )),
        calendar,
        setter,
    }
}
