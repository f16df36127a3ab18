//! Task extraction: turn today's events into a short ranked task list.
//!
//! Three extractors share the [`TaskExtractor`] trait:
//!
//! - [`OpenAiTaskExtractor`] asks an OpenAI-compatible chat completions
//!   endpoint for urgent tasks in JSON.
//! - [`HeuristicTaskExtractor`] turns meetings starting within three hours
//!   into tasks without any network call.
//! - [`FallbackTaskExtractor`] tries a primary extractor and retries against a
//!   secondary one on transient failures only.
//!
//! Every extractor ends in [`normalize_tasks`], so titles are bounded,
//! deduplicated and capped the same way regardless of where they came from.

use super::error::{classify_http_status, classify_transport, extract_error_message};
use super::{CalendarEvent, GatewayError, GatewayResult, TaskExtractor};
use crate::config::TriageConfig;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const PROVIDER: &str = "llm";
const TITLE_LIMIT: usize = 140;
const DEFAULT_PRIORITY: u8 = 3;
const MEETING_PRIORITY: u8 = 5;
const NEAR_TERM_SECS: i64 = 3 * 3600;

/// Instructions sent with every extraction request.
pub const SYSTEM_PROMPT: &str = "You are my personal assistant. I will give you a list of calendar events. \
You will extract up to 6 urgent, actionable tasks that must be handled TODAY. \
Make sure the tasks are actionable, have a deadline, and relate to me rather than someone else.\n\
Prefer: meetings starting soon, high priority events, explicit deadlines/times.\n\
Return a JSON object: {\"tasks\": [{\"title\": str, \"time\": \"HH:MM\"|null, \"priority\": 1..5, \"link\": str|null}]}\n";

/// One extracted task before it is flattened to display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrgentTask {
    pub title: String,
    /// Local `HH:MM`, when the task has a time.
    pub time: Option<String>,
    /// 1 (low) to 5 (urgent).
    pub priority: u8,
    pub link: Option<String>,
}

impl UrgentTask {
    /// Build a task from one loosely-typed JSON item. Non-objects are rejected.
    #[must_use]
    pub fn from_value(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("(no title)");
        let priority = match obj.get("priority") {
            Some(Value::Number(n)) => n.as_u64().map(|p| p.clamp(1, 5) as u8),
            Some(Value::String(s)) => s.trim().parse::<u8>().ok().map(|p| p.clamp(1, 5)),
            _ => None,
        }
        .unwrap_or(DEFAULT_PRIORITY);

        Some(Self {
            title: title.chars().take(TITLE_LIMIT).collect(),
            time: obj
                .get("time")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(String::from),
            priority,
            link: obj.get("link").and_then(Value::as_str).map(String::from),
        })
    }

    /// Display line: `HH:MM  title`, or just the title when untimed.
    #[must_use]
    pub fn display_line(&self) -> String {
        match &self.time {
            Some(time) => format!("{time}  {}", self.title),
            None => self.title.clone(),
        }
    }
}

/// Deduplicate by title (first wins), cap at `max_tasks` and flatten to display lines.
#[must_use]
pub fn normalize_tasks(tasks: Vec<UrgentTask>, max_tasks: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|task| seen.insert(task.title.clone()))
        .take(max_tasks)
        .map(|task| task.display_line())
        .collect()
}

/// User prompt: the date followed by one `- [event] HH:MM-HH:MM summary` line per event.
#[must_use]
pub fn build_user_prompt<Tz>(today: NaiveDate, events: &[CalendarEvent], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let lines: Vec<String> = events
        .iter()
        .map(|event| {
            format!(
                "- [event] {}-{} {}",
                event.start.with_timezone(tz).format("%H:%M"),
                event.end.with_timezone(tz).format("%H:%M"),
                event.summary
            )
        })
        .collect();
    format!(
        "TODAY: {}\n\nCALENDAR (today):\n{}\n",
        today.format("%Y-%m-%d"),
        lines.join("\n")
    )
}

/// Pull the task items out of a model reply.
///
/// The reply may be a bare array or an object carrying `tasks` or `items`.
///
/// # Errors
///
/// Returns a network error when the content is not JSON; the provider
/// answered but nothing usable came back.
pub fn parse_reply(content: &str) -> GatewayResult<Vec<UrgentTask>> {
    let parsed: Value = serde_json::from_str(content.trim())
        .map_err(|e| GatewayError::network(format!("{PROVIDER} reply is not JSON: {e}")))?;
    let items: &[Value] = match &parsed {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => obj
            .get("tasks")
            .or_else(|| obj.get("items"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    Ok(items.iter().filter_map(UrgentTask::from_value).collect())
}

/// Near-term meetings: events not yet ended that start within three hours of `now`.
#[must_use]
pub fn near_term_meetings<Tz>(
    events: &[CalendarEvent],
    now: DateTime<Utc>,
    tz: &Tz,
) -> Vec<UrgentTask>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    events
        .iter()
        .filter(|event| event.end > now && event.start - now <= chrono::Duration::seconds(NEAR_TERM_SECS))
        .map(|event| UrgentTask {
            title: format!("Meeting: {}", event.summary)
                .chars()
                .take(TITLE_LIMIT)
                .collect(),
            time: Some(event.start.with_timezone(tz).format("%H:%M").to_string()),
            priority: MEETING_PRIORITY,
            link: event.meeting_link.clone(),
        })
        .collect()
}

// ── OpenAI-compatible extractor ───────────────────────────────

/// Chat completions extractor.
pub struct OpenAiTaskExtractor {
    config: TriageConfig,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiTaskExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTaskExtractor")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl OpenAiTaskExtractor {
    pub fn new(config: TriageConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the API key in `config.api_key_env`, if set.
    #[must_use]
    pub fn from_env(config: TriageConfig) -> Option<Self> {
        let key = std::env::var(&config.api_key_env).ok()?;
        let key = key.trim().to_owned();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(config, key))
    }

    fn request_body(&self, user_prompt: &str) -> Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
            "response_format": {"type": "json_object"},
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
        let message = extract_error_message(body);
        if is_insufficient_quota(body) {
            return GatewayError::quota(format!("{PROVIDER} quota exhausted: {message}"));
        }
        classify_http_status(PROVIDER, status, &message, true)
    }
}

fn is_insufficient_quota(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            let code = err.get("code").and_then(Value::as_str);
            let kind = err.get("type").and_then(Value::as_str);
            Some(code == Some("insufficient_quota") || kind == Some("insufficient_quota"))
        })
        .unwrap_or(false)
}

#[async_trait]
impl TaskExtractor for OpenAiTaskExtractor {
    fn name(&self) -> &str {
        "openai"
    }

    async fn extract_tasks(&self, events: &[CalendarEvent]) -> GatewayResult<Vec<String>> {
        let prompt = build_user_prompt(Local::now().date_naive(), events, &Local);
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&prompt))
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
            return Err(Self::map_http_error(status, &body));
        }

        let envelope: Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::network(format!("{PROVIDER} response is not JSON: {e}")))?;
        let content = envelope
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::network(format!("{PROVIDER} response has no content")))?;

        let tasks = parse_reply(content)?;
        tracing::debug!(count = tasks.len(), model = %self.config.model, "llm triage complete");
        Ok(normalize_tasks(tasks, self.config.max_tasks))
    }
}

// ── Heuristic extractor ───────────────────────────────────────

/// Offline extractor: near-term meetings only.
#[derive(Debug, Clone)]
pub struct HeuristicTaskExtractor {
    max_tasks: usize,
}

impl HeuristicTaskExtractor {
    #[must_use]
    pub fn new(max_tasks: usize) -> Self {
        Self { max_tasks }
    }
}

impl Default for HeuristicTaskExtractor {
    fn default() -> Self {
        Self::new(TriageConfig::default().max_tasks)
    }
}

#[async_trait]
impl TaskExtractor for HeuristicTaskExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract_tasks(&self, events: &[CalendarEvent]) -> GatewayResult<Vec<String>> {
        let tasks = near_term_meetings(events, Utc::now(), &Local);
        Ok(normalize_tasks(tasks, self.max_tasks))
    }
}

// ── Fallback wrapper ──────────────────────────────────────────

/// Tries `primary`; on a transient failure retries the same events against `fallback`.
///
/// Auth and quota failures pass straight through so they still reach the user.
pub struct FallbackTaskExtractor {
    primary: Arc<dyn TaskExtractor>,
    fallback: Arc<dyn TaskExtractor>,
    fallback_count: AtomicU32,
}

impl FallbackTaskExtractor {
    pub fn new(primary: Arc<dyn TaskExtractor>, fallback: Arc<dyn TaskExtractor>) -> Self {
        Self {
            primary,
            fallback,
            fallback_count: AtomicU32::new(0),
        }
    }

    /// Number of times the fallback has been used.
    pub fn fallback_count(&self) -> u32 {
        self.fallback_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FallbackTaskExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackTaskExtractor")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .field("fallback_count", &self.fallback_count())
            .finish()
    }
}

#[async_trait]
impl TaskExtractor for FallbackTaskExtractor {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn extract_tasks(&self, events: &[CalendarEvent]) -> GatewayResult<Vec<String>> {
        match self.primary.extract_tasks(events).await {
            Ok(tasks) => Ok(tasks),
            Err(e) if e.is_transient() => {
                self.fallback_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "task extractor failed, using fallback"
                );
                self.fallback.extract_tasks(events).await
            }
            Err(e) => Err(e),
        }
    }
}
