//! Markdown incident report for a processed error.
//!
//! Works for both analysis outcomes. A fallback is never dressed up as a
//! real fix: the page opens with a parse-failure callout and carries the
//! captured model reply instead of fix code.

use crate::context::SourceFileContext;
use crate::llm::Analysis;
use crate::telemetry::ErrorEvent;
use crate::util::{strip_code_fences, truncate, truncate_str};
use std::fmt::Write as _;

const MAX_TITLE_LEN: usize = 100;
/// Longest code block emitted; larger bodies are cut
const MAX_CODE_BLOCK_CHARS: usize = 2000;
const DEFAULT_TEST_STEP: &str = "Perform manual testing and verification";

#[derive(Debug, Clone, Default)]
pub struct ReportRenderer;

impl ReportRenderer {
    pub fn new() -> Self {
        Self
    }

    /// `<RISK>: <message>`, capped for page-title use.
    pub fn title(&self, event: &ErrorEvent, analysis: &Analysis) -> String {
        let subject = if event.message.is_empty() {
            &event.title
        } else {
            &event.message
        };
        truncate(
            &format!("{}: {}", analysis.risk_level(), subject),
            MAX_TITLE_LEN,
        )
    }

    pub fn render(
        &self,
        event: &ErrorEvent,
        contexts: &[SourceFileContext],
        analysis: &Analysis,
    ) -> String {
        let fix_path = contexts
            .first()
            .map(|c| c.path.as_str())
            .unwrap_or("unknown");

        let mut out = String::new();
        let _ = writeln!(
            out,
            "# {} {}\n",
            analysis.risk_level().emoji(),
            self.title(event, analysis)
        );

        push_properties(&mut out, event, analysis, fix_path);

        if let Analysis::Fallback(fallback) = analysis {
            out.push_str("> [!WARNING]\n");
            out.push_str("> **Model response could not be parsed.** ");
            out.push_str("No fix was generated; review the raw response below.\n");
            let _ = writeln!(out, "> Diagnostic: {}\n", fallback.diagnostic);
        }

        out.push_str("## Root cause analysis\n\n");
        let _ = writeln!(
            out,
            "> {}\n",
            non_empty_or(analysis.problem_analysis(), "No analysis available")
        );

        out.push_str("## Fix strategy and changes\n\n");
        let _ = writeln!(
            out,
            "**Strategy:** {}\n",
            non_empty_or(analysis.fix_strategy(), "N/A")
        );
        out.push_str("**Changes:**\n\n");
        push_smart_lines(&mut out, analysis.fix_content());
        out.push('\n');

        match analysis {
            Analysis::Validated(validated) => {
                let _ = writeln!(out, "## Fixed code ({})\n", fix_path);
                push_code_block(&mut out, "javascript", strip_code_fences(&validated.fix_code));
            }
            Analysis::Fallback(fallback) => {
                out.push_str("## Raw model response\n\n");
                push_code_block(
                    &mut out,
                    "text",
                    non_empty_or(&fallback.raw_response, "(no response received)"),
                );
            }
        }

        out.push_str("## Error details\n\n");
        let _ = writeln!(out, "- **Error type:** {}", event.error_name);
        let _ = writeln!(out, "- **Location:** {}", event.primary_location);
        let _ = writeln!(
            out,
            "- **Call path:** {}",
            non_empty_or(&event.stack_summary, "unknown")
        );
        let related = contexts
            .iter()
            .map(|c| format!("{} ({})", c.path, c.function))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "- **Related files:** {}", non_empty_or(&related, "none"));
        for (idx, cause) in event.causes.iter().enumerate() {
            let _ = writeln!(out, "- **Cause {}:** [{}] {}", idx + 1, cause.name, cause.message);
        }
        out.push('\n');

        out.push_str("### Original stack trace\n\n");
        push_code_block(
            &mut out,
            "text",
            non_empty_or(&event.raw_stack, "No stack trace available"),
        );
        out.push_str("### Call-site stack (report site)\n\n");
        push_code_block(
            &mut out,
            "text",
            non_empty_or(&event.call_site_stack, "No call-site stack available"),
        );

        out.push_str("## Test checklist\n\n");
        let steps = analysis.test_steps();
        if steps.is_empty() {
            let _ = writeln!(out, "- [ ] {}", DEFAULT_TEST_STEP);
        } else {
            for step in steps {
                let _ = writeln!(out, "- [ ] {}", step);
            }
        }
        out
    }
}

fn push_properties(out: &mut String, event: &ErrorEvent, analysis: &Analysis, fix_path: &str) {
    out.push_str("| Property | Value |\n|---|---|\n");
    let rows = [
        ("Status", "Open".to_string()),
        ("Risk level", analysis.risk_level().to_string()),
        ("Environment", event.context.environment.clone()),
        ("URL path", event.context.url_path.clone()),
        ("Error type", event.error_name.clone()),
        ("Browser", format!("{} / {}", event.context.browser, event.context.os)),
        ("Timestamp", event.timestamp.clone()),
        ("File path", fix_path.to_string()),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "| {} | {} |", name, value.replace('|', "\\|"));
    }
    out.push('\n');
}

/// Bullet-looking lines (`-`, `*`, `•`) become list items, the rest
/// paragraphs. Blank lines are dropped.
fn push_smart_lines(out: &mut String, content: &str) {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        out.push_str("N/A\n");
        return;
    }
    for line in lines {
        match bullet_text(line) {
            Some(text) => {
                let _ = writeln!(out, "- {}", text);
            }
            None => {
                let _ = writeln!(out, "{}\n", line);
            }
        }
    }
}

fn bullet_text(line: &str) -> Option<&str> {
    ['-', '*', '•'].iter().find_map(|marker| {
        line.strip_prefix(*marker)
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .map(str::trim_start)
    })
}

fn push_code_block(out: &mut String, language: &str, body: &str) {
    let body = truncate_str(body, MAX_CODE_BLOCK_CHARS);
    let _ = writeln!(out, "```{}\n{}\n```\n", language, body.trim_end());
}

fn non_empty_or<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.trim().is_empty() {
        fallback
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FallbackAnalysis, RiskLevel, ValidatedAnalysis};
    use crate::telemetry::{RawPayload, TelemetryPayloadBuilder};
    use serde_json::json;

    fn event() -> ErrorEvent {
        let payload = RawPayload::from_value(json!({
            "error": {
                "message": "list.map is not a function",
                "name": "TypeError",
                "stack": "TypeError: list.map\n    at Items (http://localhost:5173/src/Items.jsx:14:10)",
                "cause": "fetch returned an object"
            },
            "meta": {
                "url": "http://localhost:5173/items?page=2",
                "environment": "production",
                "timestamp": "2026-01-02T03:04:05Z"
            }
        }))
        .unwrap();
        TelemetryPayloadBuilder::default().build(&payload).unwrap()
    }

    fn validated() -> Analysis {
        Analysis::Validated(ValidatedAnalysis {
            summary: "Default list to an array".to_string(),
            problem_analysis: "API returns an object".to_string(),
            fix_strategy: "Normalize the response".to_string(),
            fix_content: "- wrap in Array.isArray\nKeeps render pure".to_string(),
            fix_code: "```js\nconst items = [];\n```".to_string(),
            test_steps: vec![],
            commit_msg: String::new(),
            pr_title: String::new(),
            risk_level: RiskLevel::Medium,
        })
    }

    #[test]
    fn test_title_uses_risk_and_message() {
        let renderer = ReportRenderer::new();
        assert_eq!(
            renderer.title(&event(), &validated()),
            "MEDIUM: list.map is not a function"
        );
    }

    #[test]
    fn test_validated_report() {
        let page = ReportRenderer::new().render(&event(), &[], &validated());
        assert!(page.starts_with("# 🟠 MEDIUM: list.map is not a function"));
        assert!(page.contains("| Environment | production |"));
        assert!(page.contains("| URL path | /items |"));
        assert!(page.contains("| Timestamp | 2026-01-02T03:04:05Z |"));
        assert!(page.contains("- wrap in Array.isArray\n"));
        assert!(page.contains("Keeps render pure\n\n"));
        assert!(page.contains("```javascript\nconst items = [];\n```"));
        assert!(page.contains("- **Cause 1:** [Error] fetch returned an object"));
        assert!(page.contains(&format!("- [ ] {}", DEFAULT_TEST_STEP)));
        assert!(!page.contains("could not be parsed"));
    }

    #[test]
    fn test_fallback_report_is_flagged() {
        let fallback = Analysis::Fallback(FallbackAnalysis::new(
            "missing required fields: fixCode",
            "{\"summary\": \"half\"}",
        ));
        let page = ReportRenderer::new().render(&event(), &[], &fallback);
        assert!(page.starts_with("# 🔴 HIGH:"));
        assert!(page.contains("> [!WARNING]"));
        assert!(page.contains("Diagnostic: missing required fields: fixCode"));
        assert!(page.contains("## Raw model response\n\n```text\n{\"summary\": \"half\"}\n```"));
        assert!(!page.contains("## Fixed code"));
    }

    #[test]
    fn test_bullet_detection() {
        assert_eq!(bullet_text("- item"), Some("item"));
        assert_eq!(bullet_text("• item"), Some("item"));
        assert_eq!(bullet_text("-item"), None);
        assert_eq!(bullet_text("plain"), None);
    }
}
