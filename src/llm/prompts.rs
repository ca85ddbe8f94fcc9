//! Fix request rendering
//!
//! The prompt is a pure function of the event, the resolved source windows
//! and the full target file when one is available. Nothing random or time-dependent (event id, wall clock) is
//! rendered, so identical inputs always produce identical requests.

use super::models::{GenerationOptions, PromptRequest};
use crate::context::{SourceFileContext, SourceWindow, TargetFile};
use crate::telemetry::ErrorEvent;
use crate::trace::Frame;
use std::fmt::Write;

/// Frames listed per stack section.
const MAX_PROMPT_FRAMES: usize = 15;

pub const FIX_SYSTEM_PREAMBLE: &str = "You are a senior frontend developer. Analyze the runtime error below and reply with a fix as a single JSON object.";

/// Reply contract embedded verbatim in every request.
pub const FIX_RESPONSE_SCHEMA: &str = r#"{
  "summary": "one-line summary of the root cause",
  "problemAnalysis": "root cause and the circumstances that trigger it",
  "fixStrategy": "2-3 sentences on how the fix addresses the cause",
  "fixContent": "what was changed, and where",
  "fixCode": "the corrected code, scoped as the requirements state",
  "testSteps": ["step to reproduce", "step to verify the fix", "regression check"],
  "commitMsg": "fix: concise description (50 characters max)",
  "prTitle": "Auto-fix: error name and what was fixed",
  "riskLevel": "LOW | MEDIUM | HIGH"
}"#;

const REQUIREMENT_ROOT_CAUSE: &str =
    "1. Identify the root cause precisely; use the cause chain and both stacks.";

const REQUIREMENT_MINIMAL: &str = "3. Change only what the fix requires; keep everything else identical to the original.
4. riskLevel must be exactly one of LOW, MEDIUM or HIGH.";

const SCOPE_WINDOW: &str = "2. The full file is not available. fixCode must contain only the corrected replacement for the lines shown around the primary location, without line numbers or the > marker.";

const JSON_ONLY: &str =
    "Reply with JSON only. No code fences, no commentary, nothing before or after the object.";

/// Renders [`PromptRequest`]s with fixed model settings.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    model: String,
    options: GenerationOptions,
}

impl PromptAssembler {
    pub fn new(model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            model: model.into(),
            options,
        }
    }

    pub fn assemble(
        &self,
        event: &ErrorEvent,
        contexts: &[SourceFileContext],
        target: Option<&TargetFile>,
    ) -> PromptRequest {
        PromptRequest {
            model: self.model.clone(),
            prompt: render_prompt(event, contexts, target),
            stream: false,
            format: "json",
            options: self.options.clone(),
        }
    }
}

/// `target`, when present, is sent whole and becomes what `fixCode` must
/// replace; otherwise the fix is scoped to the primary window.
pub fn render_prompt(
    event: &ErrorEvent,
    contexts: &[SourceFileContext],
    target: Option<&TargetFile>,
) -> String {
    let mut out = String::new();
    out.push_str(FIX_SYSTEM_PREAMBLE);
    out.push_str("\n\n");

    out.push_str("## Error\n");
    let _ = writeln!(out, "- Title: {}", event.title);
    let _ = writeln!(out, "- Type: {}", event.error_name);
    let _ = writeln!(out, "- Message: {}", event.message);
    let _ = writeln!(out, "- Location: {}", event.primary_location);
    if !event.stack_summary.is_empty() {
        let _ = writeln!(out, "- Call path: {}", event.stack_summary);
    }
    let ctx = &event.context;
    let _ = writeln!(
        out,
        "- Page: {} ({} on {}, environment: {})",
        ctx.url_path, ctx.browser, ctx.os, ctx.environment
    );

    out.push_str("\n## Cause chain\n");
    if event.causes.is_empty() {
        out.push_str("- none\n");
    } else {
        for (idx, cause) in event.causes.iter().enumerate() {
            let at = cause
                .frames
                .first()
                .map(|f| format!(" at {}", f.location()))
                .unwrap_or_default();
            let _ = writeln!(out, "{}. [{}] {}{}", idx + 1, cause.name, cause.message, at);
        }
    }

    out.push_str("\n## Stack at throw site\n");
    push_frames(&mut out, &event.throw_frames);
    out.push_str("\n## Stack at report site\n");
    push_frames(&mut out, &event.call_site_frames);

    out.push_str("\n## Source files\n");
    if contexts.is_empty() {
        out.push_str("No project source files could be located.\n");
    }
    for context in contexts {
        push_source(&mut out, context);
    }

    if let Some(target) = target {
        let _ = writeln!(out, "\n## Full file: {}", target.path);
        out.push_str("```\n");
        out.push_str(&target.content);
        if !target.content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n");
    }

    out.push_str("\n## Requirements\n");
    out.push_str(REQUIREMENT_ROOT_CAUSE);
    out.push('\n');
    match target {
        Some(target) => {
            let _ = writeln!(
                out,
                "2. fixCode must contain the entire corrected content of {}, starting from the full file above, not a single function.",
                target.path
            );
        }
        None => {
            out.push_str(SCOPE_WINDOW);
            out.push('\n');
        }
    }
    out.push_str(REQUIREMENT_MINIMAL);
    out.push_str("\n\n## Response format (JSON only)\n");
    out.push_str(FIX_RESPONSE_SCHEMA);
    out.push_str("\n\n");
    out.push_str(JSON_ONLY);
    out
}

fn push_frames(out: &mut String, frames: &[Frame]) {
    if frames.is_empty() {
        out.push_str("- unavailable\n");
        return;
    }
    for frame in frames.iter().take(MAX_PROMPT_FRAMES) {
        let _ = writeln!(out, "- {} ({})", frame.function, frame.location());
    }
    if frames.len() > MAX_PROMPT_FRAMES {
        let _ = writeln!(out, "- ... {} more", frames.len() - MAX_PROMPT_FRAMES);
    }
}

fn push_source(out: &mut String, context: &SourceFileContext) {
    let _ = writeln!(
        out,
        "\n### {} (function {}, line {})",
        context.path, context.function, context.target_line
    );
    if !context.exists {
        out.push_str("File not found in the project checkout.\n");
        return;
    }
    match &context.window {
        SourceWindow::Lines(lines) if lines.is_empty() => {
            out.push_str("No code window available for this location.\n");
        }
        SourceWindow::Lines(_) | SourceWindow::ReadFailed(_) => {
            out.push_str("```\n");
            out.push_str(&context.snippet());
            out.push_str("\n```\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{extract_window, TargetOrigin};
    use crate::telemetry::{RawPayload, TelemetryPayloadBuilder};
    use serde_json::json;
    use std::path::PathBuf;

    fn event() -> ErrorEvent {
        let payload = RawPayload::from_value(json!({
            "error": {
                "message": "x is undefined",
                "name": "TypeError",
                "stack": "TypeError: x is undefined\n    at render (src/App.jsx:3:5)",
                "cause": {"message": "inner", "name": "RangeError", "stack": "at deep (src/deep.js:1:1)"}
            },
            "callSite": {"stack": "at report (src/lib/logger.js:9:2)"},
            "meta": {"url": "https://example.com/home", "userAgent": "Firefox/125", "environment": "staging"}
        }))
        .unwrap();
        TelemetryPayloadBuilder::default().build(&payload).unwrap()
    }

    fn context() -> SourceFileContext {
        SourceFileContext {
            path: "src/App.jsx".to_string(),
            absolute_path: PathBuf::from("/app/src/App.jsx"),
            function: "render".to_string(),
            target_line: 3,
            exists: true,
            window: SourceWindow::Lines(extract_window("a\nb\nconst y = x.z;\nd", 3, 20)),
        }
    }

    fn assembler() -> PromptAssembler {
        PromptAssembler::new("deepseek-coder-v2:16b", GenerationOptions::default())
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let event = event();
        let mut other = event.clone();
        other.id = uuid::Uuid::new_v4();
        let a = assembler().assemble(&event, &[context()], None);
        let b = assembler().assemble(&other, &[context()], None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_schema_embedded_verbatim() {
        let request = assembler().assemble(&event(), &[context()], None);
        assert!(request.prompt.contains(FIX_RESPONSE_SCHEMA));
        assert!(request.prompt.contains("LOW | MEDIUM | HIGH"));
        assert!(request.prompt.ends_with(JSON_ONLY));
        assert_eq!(request.format, "json");
        assert!(!request.stream);
    }

    #[test]
    fn test_prompt_carries_error_details() {
        let prompt = assembler().assemble(&event(), &[context()], None).prompt;
        assert!(prompt.contains("- Title: [TypeError] x is undefined"));
        assert!(prompt.contains("- Location: src/App.jsx:3:5"));
        assert!(prompt.contains("1. [RangeError] inner at src/deep.js:1:1"));
        assert!(prompt.contains("- report (src/lib/logger.js:9:2)"));
        assert!(prompt.contains(" > 3 | const y = x.z;"));
        assert!(prompt.contains("environment: staging"));
    }

    #[test]
    fn test_missing_file_is_described() {
        let mut missing = context();
        missing.exists = false;
        missing.window = SourceWindow::default();
        let prompt = assembler().assemble(&event(), &[missing], None).prompt;
        assert!(prompt.contains("File not found in the project checkout."));
    }

    #[test]
    fn test_no_sources() {
        let prompt = assembler().assemble(&event(), &[], None).prompt;
        assert!(prompt.contains("No project source files could be located."));
    }

    #[test]
    fn test_full_target_file_is_sent_whole() {
        let content = (1..=90).map(|i| format!("const v{} = {};", i, i)).collect::<Vec<_>>().join("\n");
        let target = TargetFile {
            path: "src/App.jsx".to_string(),
            content,
            sha: Some("abc".to_string()),
            origin: TargetOrigin::Remote,
        };
        let prompt = assembler().assemble(&event(), &[context()], Some(&target)).prompt;
        assert!(prompt.contains("## Full file: src/App.jsx\n```\nconst v1 = 1;"));
        // Far outside any 41-line window around line 3
        assert!(prompt.contains("const v90 = 90;\n```"));
        assert!(prompt.contains("2. fixCode must contain the entire corrected content of src/App.jsx"));
        assert!(!prompt.contains(SCOPE_WINDOW));
    }

    #[test]
    fn test_without_target_fix_is_window_scoped() {
        let prompt = assembler().assemble(&event(), &[context()], None).prompt;
        assert!(!prompt.contains("## Full file"));
        assert!(prompt.contains(SCOPE_WINDOW));
        assert!(!prompt.contains("entire corrected"));
    }
}
