//! Configuration types for the wallpaper refresh service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Refresh cadence and retry policy.
    pub scheduler: SchedulerConfig,
    /// Generated wallpaper storage.
    pub artifacts: ArtifactConfig,
    /// Calendar provider connection.
    pub calendar: CalendarConfig,
    /// Task extraction provider.
    pub triage: TriageConfig,
    /// Wallpaper rendering.
    pub render: RenderConfig,
    /// Desktop background setter.
    pub desktop: DesktopConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Scheduler cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduled refresh attempts.
    pub interval_secs: u64,
    /// Fire the first tick immediately instead of after one interval.
    pub run_on_start: bool,
    /// Optional backoff after repeated failures. Off by default.
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            run_on_start: true,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff applied to scheduled ticks after consecutive failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub enabled: bool,
    /// Number of consecutive failures before backoff starts.
    pub after_failures: u32,
    /// Delay after the first backed-off failure.
    pub base_secs: u64,
    /// Upper bound on the delay.
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            after_failures: 3,
            base_secs: 120,
            max_secs: 1800,
        }
    }
}

/// Artifact retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Wallpaper directory. `None` uses [`crate::paper_dirs::wallpapers_dir`].
    pub dir: Option<PathBuf>,
    /// Number of artifacts kept on disk (minimum 1).
    pub keep: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self { dir: None, keep: 3 }
    }
}

impl ArtifactConfig {
    /// Resolved wallpaper directory.
    #[must_use]
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(crate::paper_dirs::wallpapers_dir)
    }
}

/// Google Calendar connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// API base URL (overridable for testing).
    pub base_url: String,
    /// Calendar to read.
    pub calendar_id: String,
    /// Environment variable holding an OAuth access token.
    pub token_env: String,
    /// Token file written by the OAuth flow. `None` uses [`crate::paper_dirs::token_file`].
    pub token_file: Option<PathBuf>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/calendar/v3".to_owned(),
            calendar_id: "primary".to_owned(),
            token_env: "TASKPAPER_GOOGLE_TOKEN".to_owned(),
            token_file: None,
            timeout_secs: 20,
        }
    }
}

/// Which task extractor to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageProvider {
    /// OpenAI-compatible chat completions when an API key is present, heuristic otherwise.
    #[default]
    Auto,
    /// Always the LLM provider.
    OpenAi,
    /// Local near-term meeting heuristic only.
    Heuristic,
}

/// What to do when the LLM provider has a transient failure.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageFallback {
    /// The cycle fails at the triage stage.
    #[default]
    None,
    /// Retry the same events with the heuristic extractor.
    Heuristic,
}

/// Task extraction provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub provider: TriageProvider,
    /// Base URL including `/v1`.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Maximum tasks shown on the wallpaper.
    pub max_tasks: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub fallback: TriageFallback,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            provider: TriageProvider::Auto,
            base_url: "https://api.openai.com/v1".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
            max_tasks: 6,
            timeout_secs: 30,
            fallback: TriageFallback::None,
        }
    }
}

/// Render target. Unset dimensions are taken from the primary display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Background setter backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetterKind {
    /// macOS System Events via `osascript`.
    MacOs,
    /// GNOME `gsettings`.
    Gnome,
    /// `swww` on Wayland compositors.
    Swww,
    /// User-supplied command template.
    Command,
}

impl Default for SetterKind {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Gnome
        }
    }
}

/// Desktop background setter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    pub setter: SetterKind,
    /// Argument vector for [`SetterKind::Command`]; `{path}` and `{display}` are substituted.
    pub command: Vec<String>,
    /// Displays to target. Empty means every display the setter reports.
    pub displays: Vec<String>,
    /// Per-call timeout.
    pub timeout_secs: u64,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            setter: SetterKind::default(),
            command: Vec::new(),
            displays: Vec::new(),
            timeout_secs: 10,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Also write a daily log file under [`crate::paper_dirs::logs_dir`].
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "taskpaper=info".to_owned(),
            file: true,
        }
    }
}

impl PaperConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::PaperError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        match Self::from_file(path) {
            Ok(config) => Ok(config),
            Err(crate::error::PaperError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PaperError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::paper_dirs::config_file()
    }
}
