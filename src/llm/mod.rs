pub mod client;
pub mod models;
pub mod prompts;
pub mod validate;

pub use client::{FixGenerator, OllamaClient};
pub use models::{GenerationOptions, PromptRequest, RiskLevel};
pub use prompts::{PromptAssembler, FIX_RESPONSE_SCHEMA};
pub use validate::{
    Analysis, FallbackAnalysis, ModelResponseValidator, ValidatedAnalysis, REQUIRED_FIELDS,
};
