//! Source context resolution
//!
//! Maps the locations referenced by an error to files under the project
//! root and cuts a line-numbered window around each error line. A missing
//! or unreadable file is a normal outcome, recorded on the context rather
//! than raised.

use crate::telemetry::SourceLocation;
use crate::util::resolve_project_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Lines shown on each side of the target line.
pub const DEFAULT_RADIUS: usize = 20;

/// Most files resolved per event.
pub const DEFAULT_MAX_FILES: usize = 3;

/// Largest file handed to the model whole. Bigger files get window-scoped
/// fixes only.
pub const MAX_TARGET_FILE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowLine {
    /// 1-based line number in the file.
    pub number: usize,
    pub text: String,
    pub is_target: bool,
}

/// Excerpt around the target line, or why it could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum SourceWindow {
    Lines(Vec<WindowLine>),
    ReadFailed(String),
}

impl Default for SourceWindow {
    fn default() -> Self {
        SourceWindow::Lines(Vec::new())
    }
}

impl SourceWindow {
    pub fn lines(&self) -> &[WindowLine] {
        match self {
            SourceWindow::Lines(lines) => lines,
            SourceWindow::ReadFailed(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFileContext {
    pub path: String,
    pub absolute_path: PathBuf,
    pub function: String,
    pub target_line: u32,
    pub exists: bool,
    pub window: SourceWindow,
}

impl SourceFileContext {
    /// Window rendered for humans and models: ` > 50 | code` on the target
    /// line, `   49 | code` elsewhere.
    pub fn snippet(&self) -> String {
        match &self.window {
            SourceWindow::ReadFailed(reason) => format!("// failed to read file: {}", reason),
            SourceWindow::Lines(lines) => lines
                .iter()
                .map(|l| {
                    let marker = if l.is_target { " > " } else { "   " };
                    format!("{}{} | {}", marker, l.number, l.text)
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetOrigin {
    /// Read from the local project checkout
    Checkout,
    /// Fetched from the hosted repository
    Remote,
}

/// Full current content of the file a fix rewrites.
///
/// `sha` is the hosted blob SHA when the content came from the repository;
/// a patch built against this content must carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFile {
    pub path: String,
    pub content: String,
    pub sha: Option<String>,
    pub origin: TargetOrigin,
}

impl TargetFile {
    pub fn fits_prompt(content: &str) -> bool {
        content.len() <= MAX_TARGET_FILE_BYTES
    }
}

/// Resolves [`SourceLocation`]s against a project checkout on disk.
#[derive(Debug, Clone)]
pub struct SourceContextResolver {
    root: PathBuf,
    radius: usize,
    max_files: usize,
}

impl SourceContextResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            radius: DEFAULT_RADIUS,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn with_radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One context per distinct path, in input order, capped at `max_files`.
    pub fn resolve(&self, locations: &[SourceLocation]) -> Vec<SourceFileContext> {
        let mut seen: Vec<&str> = Vec::new();
        let mut contexts = Vec::new();
        for location in locations {
            if contexts.len() >= self.max_files {
                break;
            }
            if seen.contains(&location.path.as_str()) {
                continue;
            }
            seen.push(&location.path);
            contexts.push(self.resolve_one(location));
        }
        contexts
    }

    fn resolve_one(&self, location: &SourceLocation) -> SourceFileContext {
        let mut context = SourceFileContext {
            path: location.path.clone(),
            absolute_path: PathBuf::new(),
            function: location.function.clone(),
            target_line: location.line,
            exists: false,
            window: SourceWindow::default(),
        };

        let absolute = match resolve_project_path(&self.root, &location.path) {
            Ok(path) => path,
            Err(reason) => {
                tracing::warn!(path = %location.path, %reason, "refusing to resolve source path");
                return context;
            }
        };
        context.absolute_path = absolute.clone();

        match absolute.try_exists() {
            Ok(true) => context.exists = true,
            Ok(false) => {
                tracing::info!(path = %absolute.display(), "source file not found");
                return context;
            }
            Err(err) => {
                context.window = SourceWindow::ReadFailed(err.to_string());
                return context;
            }
        }

        if location.line == 0 {
            return context;
        }

        context.window = match read_source(&absolute) {
            Ok(content) => SourceWindow::Lines(extract_window(
                &content,
                location.line as usize,
                self.radius,
            )),
            Err(reason) => {
                tracing::warn!(path = %absolute.display(), %reason, "source file unreadable");
                SourceWindow::ReadFailed(reason)
            }
        };
        context
    }

    /// Whole content of `location`'s file from the checkout. `None` when the
    /// file is missing, unreadable, or too large to send whole.
    pub fn read_target(&self, location: &SourceLocation) -> Option<TargetFile> {
        let absolute = resolve_project_path(&self.root, &location.path).ok()?;
        let content = read_source(&absolute).ok()?;
        if !TargetFile::fits_prompt(&content) {
            tracing::info!(
                path = %location.path,
                bytes = content.len(),
                "target file too large to send whole"
            );
            return None;
        }
        Some(TargetFile {
            path: location.path.clone(),
            content,
            sha: None,
            origin: TargetOrigin::Checkout,
        })
    }
}

fn read_source(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|_| "file is not valid UTF-8".to_string())
}

/// Inclusive 1-based bounds `[target - radius, target + radius]` clamped to
/// the file. `None` when the target lies outside the file.
pub fn window_bounds(target: usize, total: usize, radius: usize) -> Option<(usize, usize)> {
    if target == 0 || target > total {
        return None;
    }
    let start = target.saturating_sub(radius).max(1);
    let end = target.saturating_add(radius).min(total);
    Some((start, end))
}

/// Line-numbered excerpt of `content` around `target` (1-based).
pub fn extract_window(content: &str, target: usize, radius: usize) -> Vec<WindowLine> {
    let lines: Vec<&str> = content.lines().collect();
    let Some((start, end)) = window_bounds(target, lines.len(), radius) else {
        return Vec::new();
    };
    lines[start - 1..end]
        .iter()
        .enumerate()
        .map(|(offset, text)| {
            let number = start + offset;
            WindowLine {
                number,
                text: (*text).to_string(),
                is_target: number == target,
            }
        })
        .collect()
}
