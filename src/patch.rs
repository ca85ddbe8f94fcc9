//! Pull-request preparation from a validated fix.
//!
//! Only a [`ValidatedAnalysis`] can be turned into a patch; a fallback never
//! reaches this module.

use crate::llm::ValidatedAnalysis;
use crate::telemetry::ErrorEvent;
use crate::util::{strip_code_fences, truncate};
use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use std::fmt::Write as _;

const BRANCH_PREFIX: &str = "auto-fix/";
const MAX_SLUG_LEN: usize = 40;
const MAX_SUBJECT_LEN: usize = 72;
const DEFAULT_TEST_STEP: &str = "Reproduce the original error and confirm it no longer occurs";

/// Everything needed to push a branch and open a draft PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchPlan {
    pub branch_name: String,
    /// Fixed file content, base64 encoded for the contents API
    pub base64_content: String,
    pub commit_message: String,
    pub pr_title: String,
    pub pr_body: String,
    pub path: String,
    /// Blob SHA the fix was written against
    pub file_sha: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PatchPreparer;

impl PatchPreparer {
    pub fn new() -> Self {
        Self
    }

    pub fn prepare(
        &self,
        event: &ErrorEvent,
        analysis: &ValidatedAnalysis,
        path: &str,
        file_sha: Option<&str>,
    ) -> PatchPlan {
        self.prepare_at(event, analysis, path, file_sha, Utc::now().timestamp_millis())
    }

    /// Same as [`prepare`](Self::prepare) with an explicit branch timestamp.
    pub fn prepare_at(
        &self,
        event: &ErrorEvent,
        analysis: &ValidatedAnalysis,
        path: &str,
        file_sha: Option<&str>,
        millis: i64,
    ) -> PatchPlan {
        let code = strip_code_fences(&analysis.fix_code);
        let base64_content = base64::engine::general_purpose::STANDARD.encode(code.as_bytes());

        let commit_message = non_empty(&analysis.commit_msg).unwrap_or_else(|| {
            truncate(&format!("fix: {}", analysis.summary), MAX_SUBJECT_LEN)
        });
        let pr_title = non_empty(&analysis.pr_title).unwrap_or_else(|| {
            truncate(
                &format!("[auto-fix] {}", analysis.summary),
                MAX_SUBJECT_LEN,
            )
        });

        PatchPlan {
            branch_name: branch_name(&event.title, millis),
            base64_content,
            commit_message,
            pr_title,
            pr_body: render_pr_body(event, analysis, path),
            path: path.to_string(),
            file_sha: file_sha.map(str::to_string),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `auto-fix/<slug>-<millis>` where the slug is derived from the error title.
pub fn branch_name(title: &str, millis: i64) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}error-{}", BRANCH_PREFIX, millis)
    } else {
        format!("{}{}-{}", BRANCH_PREFIX, slug, millis)
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars() {
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn render_pr_body(event: &ErrorEvent, analysis: &ValidatedAnalysis, path: &str) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "## {}", event.title);
    let _ = writeln!(body);
    let _ = writeln!(body, "> {} at `{}`", event.error_name, event.primary_location);
    let _ = writeln!(body);
    let _ = writeln!(body, "### Summary\n{}\n", analysis.summary);
    let _ = writeln!(
        body,
        "### Risk\n**{} {}**\n",
        analysis.risk_level.emoji(),
        analysis.risk_level
    );
    body.push_str("---\n\n");
    let _ = writeln!(body, "### Root cause\n{}\n", or_na(&analysis.problem_analysis));
    let _ = writeln!(body, "### Fix strategy\n{}\n", or_na(&analysis.fix_strategy));
    body.push_str("---\n\n");
    let _ = writeln!(body, "### File\n`{}`\n", path);
    let _ = writeln!(body, "### Changes\n{}\n", or_na(&analysis.fix_content));
    body.push_str("### Test checklist\n");
    if analysis.test_steps.is_empty() {
        let _ = writeln!(body, "- [ ] {}", DEFAULT_TEST_STEP);
    } else {
        for step in &analysis.test_steps {
            let _ = writeln!(body, "- [ ] {}", step);
        }
    }
    body.push_str("\n---\n*Generated automatically by faultfix.*\n");
    body
}

fn or_na(text: &str) -> &str {
    if text.trim().is_empty() {
        "N/A"
    } else {
        text
    }
}
