//! Configuration management for faultfix
//!
//! Stores settings in ~/.config/faultfix/config.json. Environment variables
//! override file values so containers can be configured without a file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Slack on top of the retry budget for connection setup and scheduling.
const GENERATION_DEADLINE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Checkout that stack paths are resolved against
    pub project_root: PathBuf,
    /// Path segment marking project source (frames without it are ignored)
    pub source_marker: String,
    /// Duplicate suppression window in milliseconds
    pub dedup_ttl_ms: u64,
    /// Stack characters folded into the duplicate key
    pub dedup_stack_prefix: usize,
    /// Most distinct source files gathered per error
    pub max_source_files: usize,
    /// Lines of context on each side of the error line
    pub context_radius: usize,
    /// Characters of a rejected model reply kept for inspection
    pub raw_capture_limit: usize,
    /// Fix-generation endpoint (Ollama `generate` API)
    pub model_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Context window requested from the model
    pub num_ctx: u32,
    pub request_timeout_secs: u64,
    /// Extra attempts after a transport failure
    pub max_retries: u32,
    pub github_owner: Option<String>,
    pub github_repo: Option<String>,
    pub github_branch: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("/app"),
            source_marker: "src/".to_string(),
            dedup_ttl_ms: 5000,
            dedup_stack_prefix: 100,
            max_source_files: 3,
            context_radius: 20,
            raw_capture_limit: 2000,
            model_url: "http://localhost:11434/api/generate".to_string(),
            model: "deepseek-coder-v2:16b".to_string(),
            temperature: 0.1,
            top_p: 0.9,
            num_ctx: 8192,
            request_timeout_secs: 120,
            max_retries: 2,
            github_owner: None,
            github_repo: None,
            github_branch: "main".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("faultfix"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk (or defaults), then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load config from a specific file, or return defaults
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                }
            }
        }
        Self::default()
    }

    /// Override fields from environment-style lookups
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("FAULTFIX_PROJECT_ROOT").filter(|v| !v.is_empty()) {
            self.project_root = PathBuf::from(root);
        }
        if let Some(url) = lookup("FAULTFIX_MODEL_URL").filter(|v| !v.is_empty()) {
            self.model_url = url;
        }
        if let Some(model) = lookup("FAULTFIX_MODEL").filter(|v| !v.is_empty()) {
            self.model = model;
        }
        if let Some(ttl) = lookup("FAULTFIX_DEDUP_TTL_MS") {
            match ttl.parse() {
                Ok(ms) => self.dedup_ttl_ms = ms,
                Err(_) => tracing::warn!(value = %ttl, "ignoring invalid FAULTFIX_DEDUP_TTL_MS"),
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<PathBuf, String> {
        let dir = Self::config_dir()
            .ok_or_else(|| "Could not determine config directory".to_string())?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("config.json");
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    /// Per-attempt timeout for one fix-generation request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Budget for a whole fix-generation call: every attempt at the full
    /// per-attempt timeout plus the longest possible backoff between them.
    pub fn generation_deadline(&self) -> Duration {
        self.request_timeout()
            .saturating_mul(self.max_retries.saturating_add(1))
            .saturating_add(crate::llm::client::max_total_backoff(self.max_retries))
            .saturating_add(GENERATION_DEADLINE_GRACE)
    }

    /// GitHub token from the environment, if set and non-empty
    pub fn github_token(&self) -> Option<String> {
        std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.dedup_ttl(), Duration::from_millis(5000));
        assert_eq!(config.source_marker, "src/");
        assert_eq!(config.max_source_files, 3);
        assert!(config.github_owner.is_none());
    }

    #[test]
    fn test_generation_deadline_outlasts_retries() {
        let config = Config {
            request_timeout_secs: 1,
            max_retries: 2,
            ..Config::default()
        };
        // three 1s attempts, at most 750ms + 1500ms of backoff, 1s grace
        assert_eq!(config.generation_deadline(), Duration::from_millis(6250));
        assert!(config.generation_deadline() > config.request_timeout());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"model": "qwen2.5-coder:7b", "dedup_ttl_ms": 1000}"#).unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.model, "qwen2.5-coder:7b");
        assert_eq!(config.dedup_ttl_ms, 1000);
        assert_eq!(config.context_radius, 20);
    }

    #[test]
    fn test_corrupt_file_is_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.json.corrupt").exists());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FAULTFIX_PROJECT_ROOT", "/srv/web"),
            ("FAULTFIX_MODEL", "llama3"),
            ("FAULTFIX_DEDUP_TTL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.project_root, PathBuf::from("/srv/web"));
        assert_eq!(config.model, "llama3");
        assert_eq!(config.dedup_ttl_ms, 5000);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.github_owner = Some("acme".to_string());
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }
}
