//! Adapters to the external services a refresh cycle depends on.
//!
//! Each gateway is a black box with a success/failure contract. The refresh
//! controller only sees the traits defined here; concrete adapters live in
//! the submodules and are wired together in [`crate::startup`].

pub mod calendar;
pub mod desktop;
pub mod error;
mod glyphs;
pub mod render;
pub mod triage;

pub use error::{GatewayError, GatewayErrorKind};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result type for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// One calendar event for today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    /// Video call link, if any.
    pub meeting_link: Option<String>,
}

/// Target pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Fallback when neither config nor the display reports a size.
    pub const FALLBACK: Self = Self {
        width: 1920,
        height: 1080,
    };

    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Opaque display identifier understood by a [`BackgroundSetter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub String);

impl DisplayId {
    /// Setters that cannot address displays individually use this id.
    pub const ALL: &'static str = "*";

    #[must_use]
    pub fn all() -> Self {
        Self(Self::ALL.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finished wallpaper, PNG-encoded.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub png: Vec<u8>,
    pub resolution: Resolution,
}

/// Supplies today's events.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn fetch_events(&self) -> GatewayResult<Vec<CalendarEvent>>;
}

/// Turns events into a ranked list of short task strings.
#[async_trait]
pub trait TaskExtractor: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    async fn extract_tasks(&self, events: &[CalendarEvent]) -> GatewayResult<Vec<String>>;
}

/// Draws the wallpaper.
#[async_trait]
pub trait WallpaperRenderer: Send + Sync {
    async fn render(&self, tasks: &[String], resolution: Resolution)
    -> GatewayResult<RenderedImage>;
}

/// Applies an image file as the desktop background.
#[async_trait]
pub trait BackgroundSetter: Send + Sync {
    /// Displays currently attached.
    async fn displays(&self) -> GatewayResult<Vec<DisplayId>>;

    /// Size of the primary display, when the backend can tell.
    async fn primary_resolution(&self) -> Option<Resolution> {
        None
    }

    async fn set_background(&self, path: &Path, display: &DisplayId) -> GatewayResult<()>;
}
