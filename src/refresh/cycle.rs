//! Refresh cycle records and status snapshots.

use crate::gateway::GatewayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

/// What started a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Scheduler timer.
    Tick,
    /// User or host request. Bypasses pause.
    Manual,
}

/// Pipeline stage a cycle can fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Triage,
    Render,
    Apply,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Triage => "triage",
            Self::Render => "render",
            Self::Apply => "apply",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a refresh attempt, serialized as `succeeded`, `failed:<stage>`,
/// `skipped:busy` or `skipped:paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleStatus {
    Succeeded,
    Failed(Stage),
    SkippedBusy,
    SkippedPaused,
}

impl CycleStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(Stage::Fetch) => "failed:fetch",
            Self::Failed(Stage::Triage) => "failed:triage",
            Self::Failed(Stage::Render) => "failed:render",
            Self::Failed(Stage::Apply) => "failed:apply",
            Self::SkippedBusy => "skipped:busy",
            Self::SkippedPaused => "skipped:paused",
        }
    }

    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub fn is_skip(self) -> bool {
        matches!(self, Self::SkippedBusy | Self::SkippedPaused)
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "succeeded" => Self::Succeeded,
            "failed:fetch" => Self::Failed(Stage::Fetch),
            "failed:triage" => Self::Failed(Stage::Triage),
            "failed:render" => Self::Failed(Stage::Render),
            "failed:apply" => Self::Failed(Stage::Apply),
            "skipped:busy" => Self::SkippedBusy,
            "skipped:paused" => Self::SkippedPaused,
            other => return Err(format!("unknown cycle status: {other}")),
        })
    }
}

impl Serialize for CycleStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CycleStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One finished refresh attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshCycle {
    pub seq: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trigger: Trigger,
    pub status: CycleStatus,
    /// Tasks shown on the wallpaper; empty on failure.
    pub tasks: Vec<String>,
    pub error: Option<GatewayError>,
    /// Written wallpaper, on success or when applying it failed.
    pub artifact: Option<PathBuf>,
}

impl RefreshCycle {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == CycleStatus::Succeeded
    }
}

/// Return value of `attempt_refresh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    Finished(Box<RefreshCycle>),
    /// No cycle was created; carries `SkippedBusy` or `SkippedPaused`.
    Skipped(CycleStatus),
}

impl CycleResult {
    #[must_use]
    pub fn status(&self) -> CycleStatus {
        match self {
            Self::Finished(cycle) => cycle.status,
            Self::Skipped(status) => *status,
        }
    }

    #[must_use]
    pub fn cycle(&self) -> Option<&RefreshCycle> {
        match self {
            Self::Finished(cycle) => Some(cycle.as_ref()),
            Self::Skipped(_) => None,
        }
    }

    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

impl Serialize for CycleResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            status: CycleStatus,
            cycle: Option<&'a RefreshCycle>,
        }
        View {
            status: self.status(),
            cycle: self.cycle(),
        }
        .serialize(serializer)
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub paused: bool,
    pub is_running: bool,
    pub last_cycle: Option<RefreshCycle>,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub current_artifact: Option<PathBuf>,
    /// The last cycle failed in a way only the user can fix (auth, quota).
    pub awaiting_user: bool,
}
