//! End-to-end processing of one raw error report.
//!
//! Stages run strictly in order: ingestion contract, duplicate gate, event
//! build, source context, target file, prompt, fix generation, reply
//! validation. Only the first stage can fail; everything after it degrades
//! instead.

use crate::config::Config;
use crate::context::{SourceContextResolver, SourceFileContext, TargetFile};
use crate::dedup::ErrorDeduplicator;
use crate::error::IngestError;
use crate::github::RemoteRepo;
use crate::llm::{
    Analysis, FixGenerator, GenerationOptions, ModelResponseValidator, OllamaClient,
    PromptAssembler, PromptRequest,
};
use crate::telemetry::{ErrorEvent, RawPayload, TelemetryPayloadBuilder};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Everything produced for an accepted error.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedError {
    pub event: ErrorEvent,
    pub contexts: Vec<SourceFileContext>,
    /// Whole file at the primary location, as sent to the model
    pub target: Option<TargetFile>,
    pub prompt: PromptRequest,
    /// `None` in dry-run mode
    pub analysis: Option<Analysis>,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Same error already handled inside the dedup window
    Suppressed { key: String },
    Processed(Box<ProcessedError>),
}

impl PipelineOutcome {
    pub fn processed(&self) -> Option<&ProcessedError> {
        match self {
            PipelineOutcome::Processed(p) => Some(p),
            PipelineOutcome::Suppressed { .. } => None,
        }
    }
}

/// One pipeline per process; the dedup cache inside is shared by every call.
pub struct Pipeline<G = OllamaClient> {
    dedup: ErrorDeduplicator,
    builder: TelemetryPayloadBuilder,
    resolver: SourceContextResolver,
    assembler: PromptAssembler,
    validator: ModelResponseValidator,
    generator: Option<G>,
    remote: Option<RemoteRepo>,
    /// Covers every retry of one generation call, not a single attempt
    generation_timeout: Duration,
}

impl Pipeline<OllamaClient> {
    /// Pipeline talking to the configured fix-generation endpoint, reading
    /// target files from the configured repository when there is one.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = OllamaClient::new(
            config.model_url.clone(),
            config.request_timeout(),
            config.max_retries,
        )?;
        let pipeline = Self::with_generator(config, client);
        Ok(match RemoteRepo::from_config(config)? {
            Some(remote) => pipeline.with_remote(remote),
            None => pipeline,
        })
    }

    /// Pipeline that stops after prompt assembly. Reads the checkout only.
    pub fn dry_run(config: &Config) -> Self {
        Self::build(config, None)
    }
}

impl<G: FixGenerator> Pipeline<G> {
    pub fn with_generator(config: &Config, generator: G) -> Self {
        Self::build(config, Some(generator))
    }

    /// Read target files from `remote` instead of the checkout.
    pub fn with_remote(mut self, remote: RemoteRepo) -> Self {
        self.remote = Some(remote);
        self
    }

    fn build(config: &Config, generator: Option<G>) -> Self {
        let options = GenerationOptions {
            temperature: config.temperature,
            top_p: config.top_p,
            num_ctx: config.num_ctx,
        };
        Self {
            dedup: ErrorDeduplicator::new(config.dedup_ttl())
                .with_stack_prefix(config.dedup_stack_prefix),
            builder: TelemetryPayloadBuilder::new(
                config.source_marker.clone(),
                config.max_source_files,
            ),
            resolver: SourceContextResolver::new(config.project_root.clone())
                .with_radius(config.context_radius)
                .with_max_files(config.max_source_files),
            assembler: PromptAssembler::new(config.model.clone(), options),
            validator: ModelResponseValidator::new(config.raw_capture_limit),
            generator,
            remote: None,
            generation_timeout: config.generation_deadline(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.generator.is_none()
    }

    /// Process a webhook body as received.
    pub async fn process(&self, body: Value) -> Result<PipelineOutcome, IngestError> {
        let payload = RawPayload::from_value(body)?;
        self.process_payload(&payload).await
    }

    pub async fn process_payload(
        &self,
        payload: &RawPayload,
    ) -> Result<PipelineOutcome, IngestError> {
        let error = match payload.validate() {
            Ok(error) => error,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting telemetry payload");
                return Err(err);
            }
        };

        let message = error.message.as_deref().unwrap_or_default();
        let stack = error.stack.as_deref().unwrap_or_default();
        if self.dedup.should_suppress(message, stack) {
            let key = self.dedup.dedup_key(message, stack);
            tracing::info!(message = %crate::util::truncate(message, 80), "duplicate error suppressed");
            return Ok(PipelineOutcome::Suppressed { key });
        }

        let event = self.builder.build(payload)?;
        tracing::info!(
            id = %event.id,
            title = %crate::util::truncate(&event.title, 120),
            location = %event.primary_location,
            "error accepted"
        );

        let contexts = self.resolver.resolve(&event.locations);
        let target = self.resolve_target(&event).await;
        let prompt = self.assembler.assemble(&event, &contexts, target.as_ref());

        let analysis = match &self.generator {
            Some(generator) => Some(self.generate(generator, &prompt).await),
            None => None,
        };

        Ok(PipelineOutcome::Processed(Box::new(ProcessedError {
            event,
            contexts,
            target,
            prompt,
            analysis,
        })))
    }

    /// Whole file at the primary location. The hosted copy wins so that its
    /// SHA matches the content the fix is built from.
    async fn resolve_target(&self, event: &ErrorEvent) -> Option<TargetFile> {
        let location = event.locations.first()?;
        if let Some(remote) = &self.remote {
            match remote.fetch(&location.path).await {
                Ok(file) if TargetFile::fits_prompt(&file.content) => return Some(file.into()),
                Ok(file) => {
                    tracing::info!(
                        path = %file.path,
                        bytes = file.content.len(),
                        "target file too large to send whole"
                    );
                    return None;
                }
                Err(err) => tracing::warn!(
                    path = %location.path,
                    git_ref = remote.git_ref(),
                    error = %format!("{:#}", err),
                    "remote file unavailable; reading the checkout"
                ),
            }
        }
        self.resolver.read_target(location)
    }

    async fn generate(&self, generator: &G, prompt: &PromptRequest) -> Analysis {
        let reply = tokio::time::timeout(self.generation_timeout, generator.generate(prompt)).await;
        match reply {
            Ok(Ok(raw)) => self.validator.validate(&raw),
            Ok(Err(err)) => self
                .validator
                .unavailable(format!("Fix-generation request failed: {:#}", err)),
            Err(_) => self.validator.unavailable(format!(
                "Fix-generation request timed out after {:.1}s",
                self.generation_timeout.as_secs_f64()
            )),
        }
    }
}
