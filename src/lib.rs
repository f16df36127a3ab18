//! taskpaper: today's urgent tasks, painted onto the desktop wallpaper.
//!
//! A refresh cycle runs four stages against pluggable gateways:
//! Calendar → Task extraction → Render → Apply
//!
//! # Architecture
//!
//! - **Refresh controller**: runs at most one cycle at a time; callers that
//!   arrive mid-cycle get `skipped:busy` instead of queueing
//! - **Scheduler**: periodic ticks with pause/resume and an on-demand refresh
//! - **Artifact store**: atomic wallpaper writes with keep-last-K retention
//! - **Gateways**: Google Calendar, an OpenAI-compatible extractor with an
//!   offline heuristic, a PNG renderer and OS background setters
//! - **Host bridge**: newline-delimited JSON over stdin/stdout for tray shells

pub mod artifact;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod host;
pub mod paper_dirs;
pub mod refresh;
pub mod scheduler;
pub mod startup;

#[cfg(test)]
mod test_utils;

pub use artifact::{ArtifactRecord, ArtifactStore};
pub use config::PaperConfig;
pub use error::{PaperError, Result};
pub use refresh::{CycleResult, CycleStatus, Gateways, RefreshController, RefreshCycle, Trigger};
pub use scheduler::{Scheduler, SchedulerHandle};
