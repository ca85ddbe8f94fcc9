//! Call-site capture
//!
//! Captures the stack of whoever called the reporting entry point, as
//! opposed to the stack carried by a thrown error. The result is rendered in
//! the named-frame dialect (`at function (file:line:col)`) so it goes through
//! the same normalizer as client-supplied stacks.

use regex::Regex;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::{LazyLock, OnceLock};

/// Symbol fragment identifying this module's own frames.
const ENTRY_POINT: &str = "capture_call_site";

/// Leading frames dropped when symbols are unavailable: the backtrace
/// machinery (`backtrace_rs` trace, `Backtrace::create`, `force_capture`)
/// followed by `CallSiteCapture::capture` and `capture_call_site`.
const UNSYMBOLIZED_SKIP: usize = 5;

static SYMBOL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+:\s+(.+)$").expect("symbol line pattern"));

static LOCATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+at\s+(.+:\d+:\d+)$").expect("location line pattern"));

static MODE: OnceLock<CallSiteCapture> = OnceLock::new();

/// How the caller's stack is trimmed of this crate's own frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteCapture {
    /// Frames carry symbol names, so everything up to and including the
    /// entry point is located by name and dropped.
    Structured,
    /// No usable symbols; a fixed number of leading frames is discarded.
    SkipLines(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawFrame {
    symbol: String,
    location: Option<String>,
}

impl CallSiteCapture {
    /// Inspect the runtime once and cache the strategy for the process.
    pub fn detect() -> Self {
        *MODE.get_or_init(|| {
            let sample = Backtrace::force_capture();
            let symbolized = sample.status() == BacktraceStatus::Captured
                && sample.to_string().contains(module_path!());
            let mode = if symbolized {
                CallSiteCapture::Structured
            } else {
                CallSiteCapture::SkipLines(UNSYMBOLIZED_SKIP)
            };
            tracing::debug!(?mode, "call-site capture strategy selected");
            mode
        })
    }

    /// Capture the current stack and trim it according to this strategy.
    pub fn capture(self) -> String {
        let backtrace = Backtrace::force_capture();
        if backtrace.status() != BacktraceStatus::Captured {
            return String::new();
        }
        self.trim(&backtrace.to_string())
    }

    fn trim(self, rendered: &str) -> String {
        let frames = split_frames(rendered);
        let kept = match self {
            CallSiteCapture::Structured => {
                let start = frames
                    .iter()
                    .rposition(|f| f.symbol.contains(ENTRY_POINT))
                    .map(|idx| idx + 1)
                    .unwrap_or(0);
                &frames[start..]
            }
            CallSiteCapture::SkipLines(n) => &frames[n.min(frames.len())..],
        };
        render_named_dialect(kept)
    }
}

/// Stack of the code that called this function, innermost first.
pub fn capture_call_site() -> String {
    CallSiteCapture::detect().capture()
}

fn split_frames(rendered: &str) -> Vec<RawFrame> {
    let mut frames: Vec<RawFrame> = Vec::new();
    for line in rendered.lines() {
        if let Some(caps) = LOCATION_LINE.captures(line) {
            if let Some(last) = frames.last_mut() {
                if last.location.is_none() {
                    last.location = Some(caps[1].to_string());
                }
            }
        } else if let Some(caps) = SYMBOL_LINE.captures(line) {
            frames.push(RawFrame {
                symbol: caps[1].trim().to_string(),
                location: None,
            });
        }
    }
    frames
}

fn render_named_dialect(frames: &[RawFrame]) -> String {
    frames
        .iter()
        .filter_map(|f| {
            f.location
                .as_ref()
                .map(|loc| format!("    at {} ({})", f.symbol, loc))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
