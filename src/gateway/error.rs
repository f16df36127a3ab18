//! Failure taxonomy shared by every gateway.

use serde::{Deserialize, Serialize};

/// Classification of a gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayErrorKind {
    /// Credentials invalid, expired or missing.
    AuthError,
    /// Connection, timeout, server-side or garbled-response failure.
    NetworkError,
    /// Provider rate limit or credit exhaustion.
    QuotaError,
    /// Rendering or encoding the wallpaper failed.
    RenderError,
    /// The OS refused to set the background.
    #[serde(rename = "OSError")]
    OsError,
}

impl GatewayErrorKind {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthError => "AuthError",
            Self::NetworkError => "NetworkError",
            Self::QuotaError => "QuotaError",
            Self::RenderError => "RenderError",
            Self::OsError => "OSError",
        }
    }
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed gateway call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("[{kind}] {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    #[must_use]
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::AuthError, message)
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::NetworkError, message)
    }

    #[must_use]
    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::QuotaError, message)
    }

    #[must_use]
    pub fn render(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::RenderError, message)
    }

    #[must_use]
    pub fn os(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::OsError, message)
    }

    /// Returns true when the next scheduled tick may simply try again.
    ///
    /// Only network failures qualify. Auth and quota failures need the user,
    /// render and OS failures are surfaced but do not block later ticks.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == GatewayErrorKind::NetworkError
    }

    /// Returns true when scheduled ticks should wait for user action.
    #[must_use]
    pub fn needs_user(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::AuthError | GatewayErrorKind::QuotaError
        )
    }
}

/// Map an HTTP failure status from a provider to a gateway error.
///
/// `quota_on_429` distinguishes providers whose 429 means exhausted credit
/// (LLM) from those where it is an ordinary transient throttle (calendar).
#[must_use]
pub fn classify_http_status(
    provider: &str,
    status: reqwest::StatusCode,
    message: &str,
    quota_on_429: bool,
) -> GatewayError {
    match status.as_u16() {
        401 | 403 => GatewayError::auth(format!("{provider} authentication failed: {message}")),
        429 if quota_on_429 => GatewayError::quota(format!("{provider} quota exhausted: {message}")),
        429 => GatewayError::network(format!("{provider} rate limited: {message}")),
        code => GatewayError::network(format!("{provider} HTTP {code}: {message}")),
    }
}

/// Map a reqwest transport failure to a gateway error.
#[must_use]
pub fn classify_transport(provider: &str, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::network(format!("{provider} request timed out: {err}"))
    } else {
        GatewayError::network(format!("{provider} request failed: {err}"))
    }
}

/// Extract `error.message` from a JSON error body, or return the body.
#[must_use]
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}
