//! Google Calendar adapter.
//!
//! Reads today's events (local day) from the Calendar v3 `events.list`
//! endpoint. The OAuth handshake lives outside this crate; the adapter only
//! needs a bearer token, taken from an environment variable or from the token
//! file the OAuth flow leaves behind.

use super::error::{classify_http_status, classify_transport, extract_error_message};
use super::{CalendarEvent, CalendarGateway, GatewayError, GatewayResult};
use crate::config::CalendarConfig;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PROVIDER: &str = "calendar";

/// Where the access token comes from.
#[derive(Debug, Clone)]
enum TokenSource {
    /// Env var first, then token file.
    Discover { env: String, file: PathBuf },
    Static(String),
}

/// Google Calendar gateway.
pub struct GoogleCalendar {
    config: CalendarConfig,
    client: reqwest::Client,
    token: TokenSource,
}

impl std::fmt::Debug for GoogleCalendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCalendar")
            .field("base_url", &self.config.base_url)
            .field("calendar_id", &self.config.calendar_id)
            .finish()
    }
}

impl GoogleCalendar {
    pub fn new(config: CalendarConfig) -> Self {
        let file = config
            .token_file
            .clone()
            .unwrap_or_else(crate::paper_dirs::token_file);
        let token = TokenSource::Discover {
            env: config.token_env.clone(),
            file,
        };
        Self {
            config,
            client: reqwest::Client::new(),
            token,
        }
    }

    /// Use a fixed token instead of discovering one.
    #[must_use]
    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.token = TokenSource::Static(token.into());
        self
    }

    async fn access_token(&self) -> GatewayResult<String> {
        match &self.token {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Discover { env, file } => {
                if let Ok(token) = std::env::var(env) {
                    if !token.trim().is_empty() {
                        return Ok(token.trim().to_owned());
                    }
                }
                read_token_file(file).await
            }
        }
    }

    fn events_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let calendar = urlencoding::encode(&self.config.calendar_id);
        format!("{base}/calendars/{calendar}/events")
    }
}

#[async_trait]
impl CalendarGateway for GoogleCalendar {
    async fn fetch_events(&self) -> GatewayResult<Vec<CalendarEvent>> {
        let token = self.access_token().await?;
        let (time_min, time_max) = today_window(Local::now());

        let response = self
            .client
            .get(self.events_url())
            .bearer_auth(token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", "250"),
            ])
            .timeout(Duration::from_secs(self.config.timeout_secs.max(1)))
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e))?;
        if !status.is_success() {
            return Err(classify_http_status(
                PROVIDER,
                status,
                &extract_error_message(&body),
                false,
            ));
        }

        let events = parse_events(&body, Utc::now())?;
        tracing::debug!(count = events.len(), "fetched calendar events");
        Ok(events)
    }
}

#[derive(Deserialize)]
struct TokenFile {
    token: Option<String>,
    access_token: Option<String>,
}

async fn read_token_file(path: &Path) -> GatewayResult<String> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GatewayError::auth(
                "calendar not connected: no access token configured",
            ));
        }
        Err(e) => {
            return Err(GatewayError::auth(format!(
                "cannot read token file {}: {e}",
                path.display()
            )));
        }
    };

    let parsed: TokenFile = serde_json::from_slice(&bytes).map_err(|e| {
        GatewayError::auth(format!("malformed token file {}: {e}", path.display()))
    })?;
    parsed
        .access_token
        .or(parsed.token)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| GatewayError::auth("token file has no access token"))
}

/// RFC 3339 bounds of the local calendar day containing `now`.
fn today_window(now: DateTime<Local>) -> (String, String) {
    let day = now.date_naive();
    let start = local_at(day, 0, 0, 0).unwrap_or(now);
    let end = local_at(day, 23, 59, 59).unwrap_or(now);
    (start.to_rfc3339(), end.to_rfc3339())
}

fn local_at(day: NaiveDate, h: u32, m: u32, s: u32) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&day.and_hms_opt(h, m, s)?).earliest()
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<RawEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    id: String,
    summary: Option<String>,
    status: Option<String>,
    start: Option<RawWhen>,
    end: Option<RawWhen>,
    location: Option<String>,
    hangout_link: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWhen {
    date_time: Option<String>,
    date: Option<String>,
}

impl RawWhen {
    fn resolve(&self) -> Option<DateTime<Utc>> {
        if let Some(raw) = &self.date_time {
            return DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        let day = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        local_at(day, 0, 0, 0).map(|dt| dt.with_timezone(&Utc))
    }
}

/// Parse an `events.list` body, dropping cancelled events and events that ended before `now`.
///
/// # Errors
///
/// A body that is not valid JSON is reported as a network error: the provider
/// answered, but not with anything usable.
pub fn parse_events(body: &str, now: DateTime<Utc>) -> GatewayResult<Vec<CalendarEvent>> {
    let response: EventsResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::network(format!("calendar returned unreadable body: {e}")))?;

    let events = response
        .items
        .into_iter()
        .filter(|raw| raw.status.as_deref() != Some("cancelled"))
        .filter_map(|raw| {
            let start = raw.start.as_ref().and_then(RawWhen::resolve).unwrap_or(now);
            let end = raw.end.as_ref().and_then(RawWhen::resolve).unwrap_or(now);
            if end <= now {
                return None;
            }
            Some(CalendarEvent {
                id: raw.id,
                summary: raw.summary.unwrap_or_else(|| "(no title)".to_owned()),
                start,
                end,
                location: raw.location,
                meeting_link: raw.hangout_link,
            })
        })
        .collect();
    Ok(events)
}
