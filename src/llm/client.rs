use super::models::PromptRequest;
use crate::util::truncate;
use anyhow::Context;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Retry configuration for transport failures
const INITIAL_BACKOFF_MS: u64 = 500;
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff
const MAX_BACKOFF_MS: u64 = 8000;

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

/// Anything that can turn a [`PromptRequest`] into a raw service reply.
///
/// The reply is returned untouched; contract checks belong to the validator.
pub trait FixGenerator: Send + Sync {
    fn generate(
        &self,
        request: &PromptRequest,
    ) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

/// Client for an Ollama-compatible `generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(url: impl Into<String>, timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
            max_retries,
        })
    }
}

impl FixGenerator for OllamaClient {
    async fn generate(&self, request: &PromptRequest) -> anyhow::Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            let error = match self.http.post(&self.url).json(request).send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response
                        .text()
                        .await
                        .context("Failed to read fix-generation response body")?;

                    if status.is_success() {
                        // A body that is not JSON is still a reply; the
                        // validator decides what to make of it
                        return Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)));
                    }

                    let message = format!(
                        "Fix-generation service error {}: {}",
                        status,
                        truncate(&text, MAX_ERROR_BODY_LEN)
                    );
                    if !is_retryable_status(status) {
                        return Err(anyhow::anyhow!(message));
                    }
                    message
                }
                Err(err) => format!("Fix-generation request failed: {}", err),
            };

            if attempt >= self.max_retries {
                return Err(anyhow::anyhow!(
                    "{} (gave up after {} attempts)",
                    error,
                    attempt + 1
                ));
            }

            attempt += 1;
            let delay = backoff_with_jitter(attempt, &mut rand::thread_rng());
            tracing::warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                %error,
                "retrying fix-generation request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Rate limits and server-side failures are worth another attempt.
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Exponential backoff for the given retry (1-based) plus up to half of it
/// again as random jitter, capped at [`MAX_BACKOFF_MS`].
fn backoff_with_jitter<R: Rng>(retry: u32, rng: &mut R) -> Duration {
    let base = base_backoff_ms(retry);
    let jitter = rng.gen_range(0..=base / 2);
    Duration::from_millis((base + jitter).min(MAX_BACKOFF_MS))
}

fn base_backoff_ms(retry: u32) -> u64 {
    let exp = BACKOFF_MULTIPLIER.saturating_pow(retry.saturating_sub(1));
    INITIAL_BACKOFF_MS.saturating_mul(exp).min(MAX_BACKOFF_MS)
}

/// Upper bound on the time `retries` retries spend sleeping between attempts.
pub fn max_total_backoff(retries: u32) -> Duration {
    (1..=retries)
        .map(|retry| {
            let base = base_backoff_ms(retry);
            Duration::from_millis((base + base / 2).min(MAX_BACKOFF_MS))
        })
        .sum()
}
