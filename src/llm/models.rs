use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sampling parameters sent with every fix request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    /// Context window requested from the model
    pub num_ctx: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            num_ctx: 8192,
        }
    }
}

/// Rendered request for the fix-generation service.
///
/// Serializes directly as an Ollama `generate` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    /// Constrains the reply to JSON
    pub format: &'static str,
    pub options: GenerationOptions,
}

/// Risk of applying the suggested fix, as judged by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Low => "🟡",
            RiskLevel::Medium => "🟠",
            RiskLevel::High => "🔴",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            _ => Err(format!(
                "invalid riskLevel '{}' (expected LOW, MEDIUM or HIGH)",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_parse_is_case_insensitive() {
        assert_eq!("low".parse::<RiskLevel>(), Ok(RiskLevel::Low));
        assert_eq!(" High ".parse::<RiskLevel>(), Ok(RiskLevel::High));
        assert!("LOW | MEDIUM | HIGH".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_risk_level_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::Medium).unwrap(), "\"MEDIUM\"");
    }

    #[test]
    fn test_prompt_request_body_shape() {
        let request = PromptRequest {
            model: "deepseek-coder-v2:16b".to_string(),
            prompt: "p".to_string(),
            stream: false,
            format: "json",
            options: GenerationOptions::default(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_ctx"], 8192);
    }
}
