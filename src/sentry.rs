//! Sentry webhook bodies
//!
//! Errors reported through Sentry arrive in Sentry's own shapes rather than
//! the client logger's. Three are recognised and mapped onto [`RawPayload`]:
//!
//! - event webhooks (`{"event": ...}` or `{"data": {"event": ...}}`) with a
//!   full exception list and per-frame positions,
//! - issue alerts (`{"data": {"issue": ...}}`), which only carry the issue
//!   metadata and a `culprit`,
//! - the flat legacy form (`{"message", "filename", "lineno", "stacktrace"}`).

use crate::telemetry::{RawError, RawMeta, RawPayload};
use crate::trace::{Frame, ANONYMOUS};
use chrono::DateTime;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// `?(src/ErrorButton)` -> `src/ErrorButton`
static CULPRIT_INNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]+)\)").expect("culprit pattern"));

/// Relative or rooted path with at least one directory and no whitespace.
static SAFE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[/\\]?(?:[\w.\[\]-]+[/\\])+[\w.\[\]-]+$").expect("safe path pattern")
});

#[derive(Debug, Default, Deserialize)]
struct SentryEvent {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    logentry: Option<LogEntry>,
    #[serde(default)]
    exception: Option<ExceptionList>,
    #[serde(default)]
    request: Option<SentryRequest>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct LogEntry {
    #[serde(default)]
    formatted: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExceptionList {
    #[serde(default)]
    values: Vec<SentryException>,
}

#[derive(Debug, Default, Deserialize)]
struct SentryException {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    stacktrace: Option<Stacktrace>,
}

#[derive(Debug, Default, Deserialize)]
struct Stacktrace {
    #[serde(default)]
    frames: Vec<SentryFrame>,
}

#[derive(Debug, Default, Deserialize)]
struct SentryFrame {
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    abs_path: Option<String>,
    #[serde(default)]
    lineno: Option<u64>,
    #[serde(default)]
    colno: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SentryRequest {
    #[serde(default)]
    url: Option<String>,
    /// Either `[[name, value], ...]` or `{name: value}`
    #[serde(default)]
    headers: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SentryIssue {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    culprit: Option<String>,
    #[serde(default)]
    metadata: IssueMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct IssueMetadata {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

/// Map a Sentry-shaped body to a raw payload. `None` when the body is not
/// one of the recognised shapes.
pub fn from_sentry(body: &Map<String, Value>) -> Option<RawPayload> {
    let data = body.get("data").and_then(Value::as_object);
    if let Some(event) = body
        .get("event")
        .or_else(|| data.and_then(|d| d.get("event")))
        .filter(|v| v.is_object())
    {
        let event: SentryEvent = serde_json::from_value(event.clone()).ok()?;
        return Some(from_event(event));
    }
    if let Some(issue) = data.and_then(|d| d.get("issue")).filter(|v| v.is_object()) {
        let issue: SentryIssue = serde_json::from_value(issue.clone()).ok()?;
        return Some(from_issue(issue));
    }
    if body.get("message").is_some_and(Value::is_string) {
        return Some(from_flat(body));
    }
    None
}

fn from_event(event: SentryEvent) -> RawPayload {
    let fallback_message = event
        .title
        .clone()
        .or_else(|| event.message.as_ref().and_then(message_text))
        .or_else(|| {
            event
                .logentry
                .as_ref()
                .and_then(|l| l.formatted.clone().or_else(|| l.message.clone()))
        });

    // The reported exception is the last value; earlier values are its causes
    let mut exceptions = event.exception.map(|e| e.values).unwrap_or_default();
    let error = match exceptions.pop() {
        Some(thrown) => {
            let mut error = exception_to_error(thrown);
            if error.message.is_none() {
                error.message = fallback_message;
            }
            error.cause = chain_causes(exceptions);
            error
        }
        None => RawError {
            message: fallback_message,
            ..RawError::default()
        },
    };

    let request = event.request.unwrap_or_default();
    RawPayload {
        error: Some(error),
        call_site: Default::default(),
        meta: RawMeta {
            url: request.url,
            user_agent: request.headers.as_ref().and_then(user_agent_header),
            environment: event.environment,
            timestamp: event.timestamp.as_ref().and_then(timestamp_text),
            event_id: event.event_id,
        },
    }
}

/// Older exceptions become nested causes, most recent first.
fn chain_causes(mut older: Vec<SentryException>) -> Option<Box<RawError>> {
    let newest = older.pop()?;
    let mut error = exception_to_error(newest);
    error.cause = chain_causes(older);
    Some(Box::new(error))
}

fn exception_to_error(exception: SentryException) -> RawError {
    // Sentry lists frames outermost first
    let frames: Vec<Frame> = exception
        .stacktrace
        .map(|s| s.frames)
        .unwrap_or_default()
        .into_iter()
        .rev()
        .map(|f| {
            let file = f.abs_path.or(f.filename).unwrap_or_default();
            Frame::new(
                f.function.as_deref().unwrap_or(ANONYMOUS),
                &file,
                &f.lineno.unwrap_or(0).to_string(),
                &f.colno.unwrap_or(0).to_string(),
            )
        })
        .collect();

    let stack = (!frames.is_empty()).then(|| render_stack(exception.kind.as_deref(), &frames));
    RawError {
        message: exception.value.filter(|v| !v.is_empty()),
        name: exception.kind,
        stack,
        traces: Some(frames).filter(|f| !f.is_empty()),
        cause: None,
    }
}

fn render_stack(kind: Option<&str>, frames: &[Frame]) -> String {
    let mut lines = vec![kind.unwrap_or("Error").to_string()];
    lines.extend(
        frames
            .iter()
            .map(|f| format!("    at {} ({})", f.function, f.location())),
    );
    lines.join("\n")
}

fn from_issue(issue: SentryIssue) -> RawPayload {
    let metadata = issue.metadata;
    let path = metadata
        .filename
        .as_deref()
        .and_then(safe_path)
        .or_else(|| issue.culprit.as_deref().and_then(culprit_path));

    let traces = path.map(|path| {
        vec![Frame::new(
            metadata.function.as_deref().unwrap_or(ANONYMOUS),
            &path,
            "0",
            "0",
        )]
    });

    RawPayload {
        error: Some(RawError {
            message: metadata.value.filter(|v| !v.is_empty()).or(issue.title),
            name: metadata.kind,
            stack: issue.culprit,
            traces,
            cause: None,
        }),
        call_site: Default::default(),
        meta: RawMeta {
            event_id: issue.id.as_ref().and_then(id_text),
            ..RawMeta::default()
        },
    }
}

fn from_flat(body: &Map<String, Value>) -> RawPayload {
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    let stack = text("stacktrace").filter(|s| !s.is_empty());
    let traces = match (&stack, text("filename")) {
        (None, Some(file)) if !file.is_empty() => {
            let line = body.get("lineno").and_then(Value::as_u64).unwrap_or(0);
            Some(vec![Frame::new(ANONYMOUS, &file, &line.to_string(), "0")])
        }
        _ => None,
    };
    RawPayload {
        error: Some(RawError {
            message: text("message"),
            stack,
            traces,
            ..RawError::default()
        }),
        call_site: Default::default(),
        meta: RawMeta {
            event_id: text("event_id"),
            ..RawMeta::default()
        },
    }
}

fn culprit_path(culprit: &str) -> Option<String> {
    let inner = CULPRIT_INNER
        .captures(culprit)
        .and_then(|c| c.get(1))
        .map_or(culprit, |m| m.as_str());
    safe_path(inner.trim())
}

fn safe_path(candidate: &str) -> Option<String> {
    SAFE_PATH
        .is_match(candidate)
        .then(|| candidate.replace('\\', "/").trim_start_matches('/').to_string())
}

fn message_text(message: &Value) -> Option<String> {
    match message {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("formatted")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn user_agent_header(headers: &Value) -> Option<String> {
    let is_ua = |name: &str| name.eq_ignore_ascii_case("user-agent");
    match headers {
        Value::Array(pairs) => pairs.iter().find_map(|pair| match pair.as_array()?.as_slice() {
            [name, value] if name.as_str().is_some_and(is_ua) => value.as_str().map(str::to_string),
            _ => None,
        }),
        Value::Object(map) => map
            .iter()
            .find(|(name, _)| is_ua(name.as_str()))
            .and_then(|(_, value)| value.as_str().map(str::to_string)),
        _ => None,
    }
}

/// Sentry sends either RFC 3339 text or fractional epoch seconds.
fn timestamp_text(timestamp: &Value) -> Option<String> {
    match timestamp {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round() as u32;
            DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).map(|t| t.to_rfc3339())
        }
        _ => None,
    }
}

fn id_text(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
