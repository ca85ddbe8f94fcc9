//! GitHub contents API (read side)
//!
//! Fetches the current content and blob SHA of a file so a fix can be
//! generated from, and a patch checked against, what is actually on the
//! branch.

use crate::config::Config;
use crate::context::{TargetFile, TargetOrigin};
use anyhow::{Context, Result};
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

const GITHUB_API_BASE: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 30;

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

/// Sanitize an API error body to prevent credential leakage.
/// Truncates long responses and redacts potential secrets.
fn sanitize_error_body(body: &str) -> String {
    // Patterns that might indicate secrets in error responses
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",        // GitHub personal access token prefix
        "gho_",        // GitHub OAuth token prefix
        "github_pat_", // GitHub PAT prefix
    ];

    let truncated = crate::util::truncate(body, MAX_ERROR_BODY_LEN);

    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }

    truncated
}

#[derive(Deserialize)]
struct ContentsResponse {
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
}

/// A file as it currently exists on the source host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    /// Blob SHA; changes whenever the file changes
    pub sha: String,
}

impl RemoteFile {
    /// True when the file changed since `known_sha` was read.
    pub fn is_stale(&self, known_sha: &str) -> bool {
        self.sha != known_sha
    }
}

impl From<RemoteFile> for TargetFile {
    fn from(file: RemoteFile) -> Self {
        TargetFile {
            path: file.path,
            content: file.content,
            sha: Some(file.sha),
            origin: TargetOrigin::Remote,
        }
    }
}

fn decode_contents(response: ContentsResponse) -> Result<RemoteFile> {
    let raw = response.content.unwrap_or_default();
    let content = match response.encoding.as_deref() {
        Some("base64") => {
            // The API wraps base64 at 60 columns
            let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(compact.as_bytes())
                .context("Failed to decode base64 file content")?;
            String::from_utf8(bytes).context("File content is not valid UTF-8")?
        }
        _ => raw,
    };
    Ok(RemoteFile {
        path: response.path,
        content,
        sha: response.sha,
    })
}

/// Read-only client for a repository's contents.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_base: GITHUB_API_BASE.to_string(),
            token,
        })
    }

    /// Point at a GitHub Enterprise or test server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base.trim_end_matches('/'),
            owner,
            repo,
            path.trim_start_matches('/')
        )
    }

    /// Fetch `path` at `git_ref` (branch, tag or commit).
    pub async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<RemoteFile> {
        let url = self.contents_url(owner, repo, path);
        let mut request = self
            .http
            .get(&url)
            .query(&[("ref", git_ref)])
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "faultfix")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to request {} from GitHub", path))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp.text().await.unwrap_or_default();
            if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
                return Err(anyhow::anyhow!(
                    "GitHub API error ({}): {}",
                    status,
                    api_error.message
                ));
            }
            return Err(anyhow::anyhow!(
                "GitHub API error ({}): {}",
                status,
                sanitize_error_body(&error_body)
            ));
        }

        let contents: ContentsResponse = resp
            .json()
            .await
            .context("Failed to parse contents response")?;
        decode_contents(contents)
    }
}

/// One repository and branch that fixes are written against.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    client: GitHubClient,
    owner: String,
    repo: String,
    git_ref: String,
}

impl RemoteRepo {
    pub fn new(
        client: GitHubClient,
        owner: impl Into<String>,
        repo: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            git_ref: git_ref.into(),
        }
    }

    /// The configured repository, or `None` when owner or name is unset.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let (Some(owner), Some(repo)) = (&config.github_owner, &config.github_repo) else {
            return Ok(None);
        };
        let client = GitHubClient::new(config.github_token())?;
        Ok(Some(Self::new(client, owner, repo, &config.github_branch)))
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    pub async fn fetch(&self, path: &str) -> Result<RemoteFile> {
        self.client
            .fetch_file(&self.owner, &self.repo, path, &self.git_ref)
            .await
    }
}
