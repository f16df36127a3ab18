//! Error types for the taskpaper crate.

/// Top-level error type for everything outside the refresh cycle itself.
///
/// Gateway failures inside a cycle never surface as `PaperError`; they are
/// folded into the cycle status (see [`crate::gateway::GatewayError`]).
#[derive(Debug, thiserror::Error)]
pub enum PaperError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Artifact store error (ledger, naming, eviction).
    #[error("artifact error: {0}")]
    Artifact(String),

    /// Scheduler error (task lifecycle, shutdown).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Host bridge channel error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Logging setup error.
    #[error("logging error: {0}")]
    Logging(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PaperError>;
