//! Startup wiring: turns a [`PaperConfig`] into a ready scheduler.
//!
//! This is the only place that picks concrete gateway implementations.

use crate::artifact::ArtifactStore;
use crate::config::{PaperConfig, TriageConfig, TriageFallback, TriageProvider};
use crate::error::{PaperError, Result};
use crate::gateway::TaskExtractor;
use crate::gateway::calendar::GoogleCalendar;
use crate::gateway::desktop::CommandBackgroundSetter;
use crate::gateway::render::ImageRenderer;
use crate::gateway::triage::{
    FallbackTaskExtractor, HeuristicTaskExtractor, OpenAiTaskExtractor,
};
use crate::refresh::{Gateways, RefreshController};
use crate::scheduler::Scheduler;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the binary needs to run.
#[derive(Debug)]
pub struct Runtime {
    pub controller: Arc<RefreshController>,
    pub scheduler: Scheduler,
}

/// Pick the task extractor for `config`.
///
/// `auto` uses the LLM provider when its API key is set and the heuristic
/// otherwise. With `fallback = "heuristic"` the LLM provider is wrapped so
/// transient failures are retried offline.
///
/// # Errors
///
/// Returns a config error when `provider = "openai"` but no API key is set.
pub fn build_extractor(config: &TriageConfig) -> Result<Arc<dyn TaskExtractor>> {
    let heuristic =
        || -> Arc<dyn TaskExtractor> { Arc::new(HeuristicTaskExtractor::new(config.max_tasks)) };

    let llm = match config.provider {
        TriageProvider::Heuristic => return Ok(heuristic()),
        TriageProvider::OpenAi => OpenAiTaskExtractor::from_env(config.clone()).ok_or_else(|| {
            PaperError::Config(format!(
                "triage provider is openai but {} is not set",
                config.api_key_env
            ))
        })?,
        TriageProvider::Auto => match OpenAiTaskExtractor::from_env(config.clone()) {
            Some(extractor) => extractor,
            None => {
                info!(
                    key_env = %config.api_key_env,
                    "no LLM API key; using heuristic task extraction"
                );
                return Ok(heuristic());
            }
        },
    };

    Ok(match config.fallback {
        TriageFallback::None => Arc::new(llm),
        TriageFallback::Heuristic => {
            Arc::new(FallbackTaskExtractor::new(Arc::new(llm), heuristic()))
        }
    })
}

/// Build the production gateways.
///
/// # Errors
///
/// Propagates [`build_extractor`] failures.
pub fn build_gateways(config: &PaperConfig) -> Result<Gateways> {
    Ok(Gateways {
        calendar: Arc::new(GoogleCalendar::new(config.calendar.clone())),
        extractor: build_extractor(&config.triage)?,
        renderer: Arc::new(ImageRenderer::new()),
        setter: Arc::new(CommandBackgroundSetter::new(config.desktop.clone())),
    })
}

/// Open the artifact store and wire controller and scheduler with the given
/// gateways.
///
/// # Errors
///
/// Returns an error if the wallpaper directory cannot be created or read.
pub fn initialize_with(config: &PaperConfig, gateways: Gateways) -> Result<Runtime> {
    let dir = config.artifacts.resolved_dir();
    let store = ArtifactStore::open(&dir, config.artifacts.keep)?;
    if config.artifacts.keep == 0 {
        warn!("artifacts.keep = 0 is not allowed; keeping 1");
    }
    info!(
        dir = %dir.display(),
        keep = store.keep(),
        tracked = store.records().len(),
        extractor = gateways.extractor.name(),
        "artifact store ready"
    );

    let controller = Arc::new(RefreshController::new(
        gateways,
        Arc::new(store),
        config.render.clone(),
    ));
    let scheduler = Scheduler::new(Arc::clone(&controller), &config.scheduler);
    Ok(Runtime {
        controller,
        scheduler,
    })
}

/// Build the full runtime from configuration.
///
/// # Errors
///
/// Returns an error for invalid triage settings or an unusable wallpaper
/// directory.
pub fn initialize(config: &PaperConfig) -> Result<Runtime> {
    initialize_with(config, build_gateways(config)?)
}
