//! Model reply validation
//!
//! The fix-generation service returns free-form output. Every reply ends up
//! as exactly one [`Analysis`]: a [`ValidatedAnalysis`] when the reply meets
//! the contract, otherwise a [`FallbackAnalysis`] pinned to HIGH risk with a
//! diagnostic and a bounded copy of what came back. Validation never fails.

use super::models::RiskLevel;
use crate::util::{strip_code_fences, truncate_str};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields that must be present and non-empty.
pub const REQUIRED_FIELDS: &[&str] = &["summary", "fixCode", "riskLevel"];

/// Default bound on the raw reply kept in a fallback.
pub const DEFAULT_RAW_CAPTURE_LIMIT: usize = 2000;

const FALLBACK_SUMMARY: &str = "Model response could not be parsed";

/// Reply that satisfied the contract. Optional fields are defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedAnalysis {
    pub summary: String,
    pub problem_analysis: String,
    pub fix_strategy: String,
    pub fix_content: String,
    pub fix_code: String,
    pub test_steps: Vec<String>,
    pub commit_msg: String,
    pub pr_title: String,
    pub risk_level: RiskLevel,
}

/// Degraded outcome for a reply that broke the contract (or never arrived).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackAnalysis {
    pub summary: String,
    /// What went wrong: missing fields, parse error or transport failure
    pub diagnostic: String,
    pub problem_analysis: String,
    pub fix_strategy: String,
    pub fix_content: String,
    pub fix_code: String,
    pub test_steps: Vec<String>,
    pub commit_msg: String,
    pub pr_title: String,
    pub risk_level: RiskLevel,
    /// Truncated copy of the reply for operator inspection
    pub raw_response: String,
}

impl FallbackAnalysis {
    pub fn new(diagnostic: impl Into<String>, raw_response: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        Self {
            summary: FALLBACK_SUMMARY.to_string(),
            problem_analysis: diagnostic.clone(),
            diagnostic,
            fix_strategy: String::new(),
            fix_content: String::new(),
            fix_code: String::new(),
            test_steps: Vec::new(),
            commit_msg: String::new(),
            pr_title: String::new(),
            risk_level: RiskLevel::High,
            raw_response: raw_response.into(),
        }
    }
}

/// Exactly one of these exists per processed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Analysis {
    Validated(ValidatedAnalysis),
    Fallback(FallbackAnalysis),
}

impl Analysis {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Analysis::Fallback(_))
    }

    pub fn validated(&self) -> Option<&ValidatedAnalysis> {
        match self {
            Analysis::Validated(v) => Some(v),
            Analysis::Fallback(_) => None,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            Analysis::Validated(v) => &v.summary,
            Analysis::Fallback(f) => &f.summary,
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        match self {
            Analysis::Validated(v) => v.risk_level,
            Analysis::Fallback(f) => f.risk_level,
        }
    }

    pub fn problem_analysis(&self) -> &str {
        match self {
            Analysis::Validated(v) => &v.problem_analysis,
            Analysis::Fallback(f) => &f.problem_analysis,
        }
    }

    pub fn fix_strategy(&self) -> &str {
        match self {
            Analysis::Validated(v) => &v.fix_strategy,
            Analysis::Fallback(f) => &f.fix_strategy,
        }
    }

    pub fn fix_content(&self) -> &str {
        match self {
            Analysis::Validated(v) => &v.fix_content,
            Analysis::Fallback(f) => &f.fix_content,
        }
    }

    pub fn fix_code(&self) -> &str {
        match self {
            Analysis::Validated(v) => &v.fix_code,
            Analysis::Fallback(f) => &f.fix_code,
        }
    }

    pub fn test_steps(&self) -> &[String] {
        match self {
            Analysis::Validated(v) => &v.test_steps,
            Analysis::Fallback(f) => &f.test_steps,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CANDIDATE EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════

/// Where the model's text may live inside a service reply, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractionStrategy {
    /// Ollama `generate`: `{"response": "..."}`
    ResponseField,
    /// Chat-style: `{"message": {"content": "..."}}` or
    /// `{"choices": [{"message": {"content": "..."}}]}`
    NestedContent,
    /// The reply itself (bare string or already-structured object)
    Raw,
}

const EXTRACTION_ORDER: [ExtractionStrategy; 3] = [
    ExtractionStrategy::ResponseField,
    ExtractionStrategy::NestedContent,
    ExtractionStrategy::Raw,
];

impl ExtractionStrategy {
    fn extract(self, raw: &Value) -> Option<&Value> {
        let found = match self {
            ExtractionStrategy::ResponseField => raw.get("response"),
            ExtractionStrategy::NestedContent => raw
                .pointer("/message/content")
                .or_else(|| raw.pointer("/choices/0/message/content")),
            ExtractionStrategy::Raw => Some(raw),
        };
        found.filter(|v| !v.is_null())
    }
}

fn first_candidate(raw: &Value) -> &Value {
    EXTRACTION_ORDER
        .iter()
        .find_map(|strategy| strategy.extract(raw))
        .unwrap_or(raw)
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

fn parse_candidate(candidate: &Value) -> Result<Map<String, Value>, String> {
    let parsed = match candidate {
        Value::String(text) => parse_text(text)?,
        other => other.clone(),
    };
    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(format!(
            "response is JSON but not an object (found {})",
            json_type_name(&other)
        )),
    }
}

/// Parse model text as JSON, tolerating code fences and surrounding prose.
fn parse_text(text: &str) -> Result<Value, String> {
    let clean = strip_code_fences(text);
    match serde_json::from_str::<Value>(clean) {
        Ok(value) => Ok(value),
        Err(initial) => extract_json_fragment(clean, '{', '}')
            .and_then(|fragment| serde_json::from_str::<Value>(fragment).ok())
            .ok_or_else(|| format!("response is not valid JSON: {}", initial)),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  VALIDATOR
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ModelResponseValidator {
    raw_capture_limit: usize,
}

impl Default for ModelResponseValidator {
    fn default() -> Self {
        Self::new(DEFAULT_RAW_CAPTURE_LIMIT)
    }
}

impl ModelResponseValidator {
    pub fn new(raw_capture_limit: usize) -> Self {
        Self { raw_capture_limit }
    }

    /// Validate a service reply: a bare string, `{"response": ...}`, a
    /// chat-style nested message, or an already-structured object.
    pub fn validate(&self, raw: &Value) -> Analysis {
        let candidate = first_candidate(raw);
        match parse_candidate(candidate).and_then(|fields| build_validated(&fields)) {
            Ok(analysis) => Analysis::Validated(analysis),
            Err(diagnostic) => {
                tracing::warn!(%diagnostic, "model reply rejected; using fallback analysis");
                Analysis::Fallback(self.fallback(diagnostic, candidate))
            }
        }
    }

    pub fn validate_text(&self, text: &str) -> Analysis {
        self.validate(&Value::String(text.to_string()))
    }

    /// Fallback for a reply that never arrived (timeout, transport error).
    pub fn unavailable(&self, diagnostic: impl Into<String>) -> Analysis {
        let diagnostic = diagnostic.into();
        tracing::warn!(%diagnostic, "model reply unavailable; using fallback analysis");
        Analysis::Fallback(FallbackAnalysis::new(diagnostic, String::new()))
    }

    fn fallback(&self, diagnostic: String, candidate: &Value) -> FallbackAnalysis {
        let raw = match candidate {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let captured = truncate_str(&raw, self.raw_capture_limit).to_string();
        FallbackAnalysis::new(diagnostic, captured)
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn build_validated(fields: &Map<String, Value>) -> Result<ValidatedAnalysis, String> {
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|name| string_field(fields, name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing required fields: {}", missing.join(", ")));
    }

    let risk_level: RiskLevel = string_field(fields, "riskLevel")
        .unwrap_or_default()
        .parse()?;

    let test_steps: Vec<String> = fields
        .get("testSteps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // Required fields are kept verbatim; trimming is only used for the check
    let verbatim = |name: &str| {
        fields
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(ValidatedAnalysis {
        summary: verbatim("summary"),
        problem_analysis: verbatim("problemAnalysis"),
        fix_strategy: verbatim("fixStrategy"),
        fix_content: verbatim("fixContent"),
        fix_code: verbatim("fixCode"),
        test_steps,
        commit_msg: verbatim("commitMsg"),
        pr_title: verbatim("prTitle"),
        risk_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> ModelResponseValidator {
        ModelResponseValidator::default()
    }

    #[test]
    fn test_minimal_valid_reply() {
        let analysis = validator().validate_text(r#"{"summary":"s","fixCode":"c","riskLevel":"LOW"}"#);
        let Analysis::Validated(v) = analysis else {
            panic!("expected validated analysis");
        };
        assert_eq!(v.summary, "s");
        assert_eq!(v.fix_code, "c");
        assert_eq!(v.risk_level, RiskLevel::Low);
        assert_eq!(v.problem_analysis, "");
        assert_eq!(v.fix_strategy, "");
        assert_eq!(v.fix_content, "");
        assert!(v.test_steps.is_empty());
        assert_eq!(v.commit_msg, "");
    }

    #[test]
    fn test_not_json_falls_back_high() {
        let analysis = validator().validate_text("not json");
        let Analysis::Fallback(f) = analysis else {
            panic!("expected fallback");
        };
        assert_eq!(f.risk_level, RiskLevel::High);
        assert!(f.diagnostic.starts_with("response is not valid JSON"));
        assert_eq!(f.raw_response, "not json");
        assert!(f.raw_response.chars().count() <= DEFAULT_RAW_CAPTURE_LIMIT);
    }

    #[test]
    fn test_raw_capture_is_bounded() {
        let huge = "x".repeat(10_000);
        let analysis = ModelResponseValidator::new(1500).validate(&json!({ "response": huge }));
        let Analysis::Fallback(f) = analysis else {
            panic!("expected fallback");
        };
        assert_eq!(f.raw_response.chars().count(), 1500);
    }

    #[test]
    fn test_missing_fields_are_named() {
        let analysis = validator().validate_text(r#"{"summary":"s","fixCode":""}"#);
        let Analysis::Fallback(f) = analysis else {
            panic!("expected fallback");
        };
        assert_eq!(f.diagnostic, "missing required fields: fixCode, riskLevel");
        assert_eq!(f.problem_analysis, f.diagnostic);
        assert!(f.raw_response.contains("\"summary\""));
    }

    #[test]
    fn test_invalid_risk_level_falls_back() {
        let analysis = validator().validate_text(r#"{"summary":"s","fixCode":"c","riskLevel":"LOW | MEDIUM | HIGH"}"#);
        assert!(analysis.is_fallback());
        assert_eq!(analysis.risk_level(), RiskLevel::High);
    }

    #[test]
    fn test_response_field_is_preferred() {
        let raw = json!({
            "model": "deepseek-coder-v2:16b",
            "response": "{\"summary\":\"from response\",\"fixCode\":\"c\",\"riskLevel\":\"MEDIUM\"}",
            "message": {"content": "{\"summary\":\"from message\",\"fixCode\":\"c\",\"riskLevel\":\"LOW\"}"},
            "done": true
        });
        let analysis = validator().validate(&raw);
        assert_eq!(analysis.summary(), "from response");
        assert_eq!(analysis.risk_level(), RiskLevel::Medium);
    }

    #[test]
    fn test_nested_message_content() {
        let raw = json!({"message": {"role": "assistant", "content": "{\"summary\":\"m\",\"fixCode\":\"c\",\"riskLevel\":\"HIGH\"}"}});
        assert_eq!(validator().validate(&raw).summary(), "m");

        let raw = json!({"choices": [{"message": {"content": "{\"summary\":\"chat\",\"fixCode\":\"c\",\"riskLevel\":\"LOW\"}"}}]});
        assert_eq!(validator().validate(&raw).summary(), "chat");
    }

    #[test]
    fn test_structured_object_used_directly() {
        let raw = json!({"summary": "obj", "fixCode": "c", "riskLevel": "low", "testSteps": ["a", 3, "b"]});
        let analysis = validator().validate(&raw);
        let v = analysis.validated().unwrap();
        assert_eq!(v.summary, "obj");
        assert_eq!(v.test_steps, vec!["a", "b"]);
    }

    #[test]
    fn test_response_already_parsed_object() {
        let raw = json!({"response": {"summary": "inner", "fixCode": "c", "riskLevel": "LOW"}});
        assert_eq!(validator().validate(&raw).summary(), "inner");
    }

    #[test]
    fn test_fenced_and_prose_wrapped_json() {
        let fenced = "```json\n{\"summary\":\"f\",\"fixCode\":\"c\",\"riskLevel\":\"LOW\"}\n```";
        assert_eq!(validator().validate_text(fenced).summary(), "f");

        let prose = "Here is the fix: {\"summary\":\"p\",\"fixCode\":\"c\",\"riskLevel\":\"LOW\"} hope it helps";
        assert_eq!(validator().validate_text(prose).summary(), "p");
    }

    #[test]
    fn test_json_array_is_rejected() {
        let analysis = validator().validate_text("[1, 2, 3]");
        let Analysis::Fallback(f) = analysis else {
            panic!("expected fallback");
        };
        assert_eq!(f.diagnostic, "response is JSON but not an object (found an array)");
    }

    #[test]
    fn test_unavailable_reply() {
        let analysis = validator().unavailable("request timed out after 120s");
        assert!(analysis.is_fallback());
        assert_eq!(analysis.risk_level(), RiskLevel::High);
        assert_eq!(analysis.fix_code(), "");
    }

    #[test]
    fn test_analysis_serializes_with_outcome_tag() {
        let analysis = validator().validate_text("nope");
        let value = serde_json::to_value(&analysis).unwrap();
        assert_eq!(value["outcome"], "fallback");
        assert_eq!(value["riskLevel"], "HIGH");
    }
}
