//! Stack trace normalization
//!
//! Engines print stacks in a handful of textual dialects. Everything is
//! folded into [`Frame`] values, innermost frame first, and anything that
//! does not look like a frame is dropped rather than reported.

pub mod callsite;
pub mod cause;

pub use callsite::{capture_call_site, CallSiteCapture};
pub use cause::{collect_cause_chain, CauseNode, CauseRecord, MAX_CAUSE_DEPTH};

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use url::Url;

/// Function name used when the engine did not report one.
pub const ANONYMOUS: &str = "(anonymous)";

/// `at function (file:line:col)`
static NAMED_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bat\s+(.+?)\s+\((.+):(\d+):(\d+)\)").expect("named frame pattern")
});

/// `at file:line:col`
static ANONYMOUS_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bat\s+(.+):(\d+):(\d+)").expect("anonymous frame pattern")
});

/// `function@file:line:col` (function may be empty)
static AT_SIGN_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)@(.+):(\d+):(\d+)$").expect("at-sign frame pattern")
});

/// One normalized stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "default_function")]
    pub function: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

fn default_function() -> String {
    ANONYMOUS.to_string()
}

impl Frame {
    /// Build a frame from raw dialect captures.
    ///
    /// Empty function names become [`ANONYMOUS`]; numbers that overflow or
    /// fail to parse fall back to the `0` placeholder.
    pub fn new(function: &str, file: &str, line: &str, column: &str) -> Self {
        let function = function.trim();
        Self {
            function: if function.is_empty() {
                ANONYMOUS.to_string()
            } else {
                function.to_string()
            },
            file: normalize_file_path(file.trim()),
            line: line.parse().unwrap_or(0),
            column: column.parse().unwrap_or(0),
        }
    }

    /// `file:line:col`
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Reduce a frame's file token to a plain path.
///
/// Absolute URLs keep only their path without the leading slash; anything
/// else just loses its query string and fragment. Both are percent-decoded.
pub fn normalize_file_path(raw: &str) -> String {
    if let Ok(url) = Url::parse(raw) {
        // Single-letter schemes are Windows drive letters, not URLs
        if url.scheme().len() > 1 {
            return decode_path(url.path().trim_start_matches('/'));
        }
    }
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    decode_path(&raw[..end])
}

fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Parse a single stack line against every known dialect, in order.
pub fn parse_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = NAMED_FRAME.captures(line) {
        return Some(Frame::new(&caps[1], &caps[2], &caps[3], &caps[4]));
    }

    if let Some(caps) = ANONYMOUS_FRAME.captures(line) {
        return Some(Frame::new(ANONYMOUS, &caps[1], &caps[2], &caps[3]));
    }

    if let Some(caps) = AT_SIGN_FRAME.captures(line) {
        return Some(Frame::new(&caps[1], &caps[2], &caps[3], &caps[4]));
    }

    None
}

/// Parse a full stack text into frames, preserving input order.
///
/// Lines that match no dialect (the message header, `<anonymous>` natives,
/// truncation markers) are skipped.
pub fn parse_stack(stack: &str) -> Vec<Frame> {
    stack.lines().filter_map(parse_line).collect()
}
