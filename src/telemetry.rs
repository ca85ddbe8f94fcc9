//! Telemetry payload ingestion
//!
//! Turns the raw webhook body (thrown error, separately captured call-site
//! stack, page metadata) into one canonical [`ErrorEvent`]. Sentry-shaped
//! bodies are mapped onto the same raw types by [`crate::sentry`].

use crate::error::IngestError;
use crate::sentry;
use crate::trace::{collect_cause_chain, parse_stack, CauseNode, CauseRecord, Frame};
use crate::util::base_name;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

/// Separator used when joining locations into a one-line call path.
const SUMMARY_SEPARATOR: &str = " <- ";

// ═══════════════════════════════════════════════════════════════════════════
//  RAW PAYLOAD
// ═══════════════════════════════════════════════════════════════════════════

/// Inbound report as posted by the client logger.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayload {
    #[serde(default)]
    pub error: Option<RawError>,
    #[serde(default)]
    pub call_site: RawCallSite,
    #[serde(default)]
    pub meta: RawMeta,
}

/// The thrown error, possibly wrapping a chain of causes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    /// Frames already parsed on the client, preferred over re-parsing `stack`.
    #[serde(default)]
    pub traces: Option<Vec<Frame>>,
    #[serde(default, deserialize_with = "deserialize_cause")]
    pub cause: Option<Box<RawError>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCallSite {
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub traces: Option<Vec<Frame>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMeta {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Identifier assigned by the reporting service, if any.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// A `cause` can be another error object, a bare message, or anything else
/// (which is ignored).
fn deserialize_cause<'de, D>(deserializer: D) -> Result<Option<Box<RawError>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(message) => Ok(Some(Box::new(RawError {
            message: Some(message),
            ..RawError::default()
        }))),
        obj @ Value::Object(_) => serde_json::from_value(obj)
            .map(|e| Some(Box::new(e)))
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

impl RawPayload {
    /// Parse a webhook body, unwrapping a relay's `{"body": ...}` envelope.
    ///
    /// Bodies without an `error` object are tried against the Sentry shapes
    /// before being handed to the contract check.
    pub fn from_value(value: Value) -> Result<Self, IngestError> {
        let value = match value {
            Value::Object(mut map) if !map.contains_key("error") && map.contains_key("body") => {
                map.remove("body").unwrap_or(Value::Null)
            }
            other => other,
        };
        let Value::Object(map) = &value else {
            return Err(IngestError::InvalidPayload(
                "expected a JSON object".to_string(),
            ));
        };
        if !map.contains_key("error") {
            if let Some(payload) = sentry::from_sentry(map) {
                return Ok(payload);
            }
        }
        serde_json::from_value(value).map_err(|e| IngestError::InvalidPayload(e.to_string()))
    }

    /// Enforce the ingestion contract. Must pass before any other stage runs.
    pub fn validate(&self) -> Result<&RawError, IngestError> {
        let error = self.error.as_ref().ok_or(IngestError::MissingField("error"))?;
        match error.message.as_deref() {
            Some(message) if !message.trim().is_empty() => Ok(error),
            _ => Err(IngestError::MissingField("error.message")),
        }
    }
}

impl RawError {
    fn throw_frames(&self) -> Vec<Frame> {
        match &self.traces {
            Some(traces) => traces.clone(),
            None => parse_stack(self.stack.as_deref().unwrap_or_default()),
        }
    }
}

impl CauseNode for RawError {
    fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("Error")
    }

    fn stack(&self) -> &str {
        self.stack.as_deref().unwrap_or_default()
    }

    fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }
}

impl RawCallSite {
    fn frames(&self) -> Vec<Frame> {
        match &self.traces {
            Some(traces) => traces.clone(),
            None => parse_stack(self.stack.as_deref().unwrap_or_default()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CANONICAL EVENT
// ═══════════════════════════════════════════════════════════════════════════

/// A project source position referenced by the error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Project-relative path, starting at the source marker.
    pub path: String,
    pub function: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// `path:line:col`
    pub fn full(&self) -> String {
        format!("{}:{}:{}", self.path, self.line, self.column)
    }
}

/// Where the error happened, from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    pub url: Option<String>,
    pub url_path: String,
    pub browser: String,
    pub os: String,
    pub user_agent: Option<String>,
    pub environment: String,
}

/// Canonical, normalized error report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub error_name: String,
    pub raw_stack: String,
    pub call_site_stack: String,
    pub throw_frames: Vec<Frame>,
    pub call_site_frames: Vec<Frame>,
    pub causes: Vec<CauseRecord>,
    pub locations: Vec<SourceLocation>,
    pub primary_location: String,
    pub stack_summary: String,
    pub context: EventContext,
    pub timestamp: String,
    /// Upstream reporter's id (Sentry event or issue), kept for cross-reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
//  BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builds [`ErrorEvent`]s from validated raw payloads.
#[derive(Debug, Clone)]
pub struct TelemetryPayloadBuilder {
    source_marker: String,
    max_locations: usize,
}

impl Default for TelemetryPayloadBuilder {
    fn default() -> Self {
        Self::new("src/", 3)
    }
}

impl TelemetryPayloadBuilder {
    pub fn new(source_marker: impl Into<String>, max_locations: usize) -> Self {
        Self {
            source_marker: source_marker.into(),
            max_locations,
        }
    }

    pub fn build(&self, payload: &RawPayload) -> Result<ErrorEvent, IngestError> {
        let error = payload.validate()?;
        let message = error.message.clone().unwrap_or_default();
        let error_name = error.name.clone().unwrap_or_else(|| "Error".to_string());

        let throw_frames = error.throw_frames();
        let call_site_frames = payload.call_site.frames();
        let causes = collect_cause_chain(error);
        let locations = self.extract_locations(&throw_frames, &call_site_frames);

        let primary_location = locations
            .first()
            .map(SourceLocation::full)
            .unwrap_or_else(|| "unknown".to_string());
        let stack_summary = locations
            .iter()
            .map(|l| format!("{}:{}", base_name(&l.path), l.line))
            .collect::<Vec<_>>()
            .join(SUMMARY_SEPARATOR);

        let meta = &payload.meta;
        let ua = classify_user_agent(meta.user_agent.as_deref());
        let context = EventContext {
            url: meta.url.clone(),
            url_path: url_path(meta.url.as_deref()),
            browser: ua.browser.to_string(),
            os: ua.os.to_string(),
            user_agent: meta.user_agent.clone(),
            environment: meta
                .environment
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        };

        Ok(ErrorEvent {
            id: Uuid::new_v4(),
            title: format!("[{}] {}", error_name, message),
            message,
            error_name,
            raw_stack: error.stack.clone().unwrap_or_default(),
            call_site_stack: payload.call_site.stack.clone().unwrap_or_default(),
            throw_frames,
            call_site_frames,
            causes,
            locations,
            primary_location,
            stack_summary,
            context,
            timestamp: meta
                .timestamp
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
            external_id: meta.event_id.clone(),
        })
    }

    /// Distinct project-source locations, throw site first.
    pub fn extract_locations(&self, throw: &[Frame], call_site: &[Frame]) -> Vec<SourceLocation> {
        let mut locations: Vec<SourceLocation> = Vec::new();
        for frame in throw.iter().chain(call_site) {
            if locations.len() >= self.max_locations {
                break;
            }
            let Some(path) = self.project_path(&frame.file) else {
                continue;
            };
            if locations.iter().any(|l| l.path == path) {
                continue;
            }
            locations.push(SourceLocation {
                path: path.to_string(),
                function: frame.function.clone(),
                line: frame.line,
                column: frame.column,
            });
        }
        locations
    }

    /// Slice of `file` starting at the source marker, if the marker appears
    /// as a whole path segment.
    fn project_path<'a>(&self, file: &'a str) -> Option<&'a str> {
        if self.source_marker.is_empty() {
            return Some(file).filter(|f| !f.is_empty());
        }
        file.match_indices(self.source_marker.as_str())
            .find(|(idx, _)| *idx == 0 || file[..*idx].ends_with('/'))
            .map(|(idx, _)| &file[idx..])
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  METADATA CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════

/// Coarse browser/OS bucket derived from a user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAgentInfo {
    pub browser: &'static str,
    pub os: &'static str,
}

/// Ordered substring tests; first match wins.
///
/// Chrome is tested before Safari because Chrome user agents also carry the
/// Safari token. iPhone user agents contain "Mac OS X" and therefore land in
/// the macOS bucket; downstream dashboards already group on that.
const BROWSER_RULES: &[(&str, &str)] = &[
    ("Chrome", "Chrome"),
    ("Firefox", "Firefox"),
    ("Safari", "Safari"),
];

const OS_RULES: &[(&str, &str)] = &[
    ("Mac", "macOS"),
    ("Win", "Windows"),
    ("Android", "Android"),
    ("iPhone", "iOS"),
];

pub fn classify_user_agent(user_agent: Option<&str>) -> UserAgentInfo {
    let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) else {
        return UserAgentInfo {
            browser: "unknown",
            os: "unknown",
        };
    };
    UserAgentInfo {
        browser: first_match(ua, BROWSER_RULES),
        os: first_match(ua, OS_RULES),
    }
}

fn first_match(ua: &str, rules: &[(&str, &'static str)]) -> &'static str {
    rules
        .iter()
        .find(|(token, _)| ua.contains(*token))
        .map(|(_, label)| *label)
        .unwrap_or("Other")
}

/// Path component of a page URL, without query or fragment.
pub fn url_path(url: Option<&str>) -> String {
    let Some(raw) = url.filter(|u| !u.is_empty()) else {
        return "unknown".to_string();
    };
    if let Ok(parsed) = Url::parse(raw) {
        if matches!(parsed.scheme(), "http" | "https") {
            return parsed.path().to_string();
        }
    }
    if raw.starts_with('/') {
        let end = raw.find(['?', '#']).unwrap_or(raw.len());
        return raw[..end].to_string();
    }
    "/".to_string()
}
