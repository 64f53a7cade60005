//! Anthropic-backed Reasoning Oracle
//!
//! Provides the shipped [`ReasoningOracle`] implementation over the
//! Anthropic Messages API:
//! - Similarity scoring between descriptions and scenarios
//! - Three-dimensional work item classification
//! - Structured analysis for the learning tiers

use crate::error::{Result, ThemisError};
use crate::oracle::{OracleClassification, ReasoningOracle};
use crate::types::{Complexity, DimensionResult, Scenario, Size, WorkType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use tracing::debug;

/// Prompt template keys looked up in the versioned snapshot
pub const TEMPLATE_SCORE: &str = "score";
pub const TEMPLATE_CLASSIFY: &str = "classify";

/// Configuration for the Anthropic oracle
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// Anthropic API key
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// Max tokens for responses
    pub max_tokens: usize,

    /// Temperature for sampling
    pub temperature: f32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// Reasoning Oracle backed by the Anthropic Messages API
pub struct AnthropicOracle {
    config: AnthropicConfig,
    client: reqwest::Client,
    templates: BTreeMap<String, String>,
}

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    text: String,
}

impl AnthropicOracle {
    /// Create a new oracle with custom config
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ThemisError::Validation(
                "ANTHROPIC_API_KEY not set".to_string(),
            ));
        }

        Ok(Self {
            config,
            client: reqwest::Client::new(),
            templates: default_templates(),
        })
    }

    /// Create with default config
    pub fn with_default() -> Result<Self> {
        Self::new(AnthropicConfig::default())
    }

    /// Replace the prompt templates, e.g. with the set carried by the
    /// active configuration snapshot.
    pub fn with_templates(mut self, templates: BTreeMap<String, String>) -> Self {
        for (key, value) in templates {
            self.templates.insert(key, value);
        }
        self
    }

    fn template(&self, key: &str) -> &str {
        self.templates.get(key).map(String::as_str).unwrap_or("")
    }

    /// Make an API call to the model
    async fn call_api(&self, prompt: &str) -> Result<String> {
        debug!("Calling Anthropic API");

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(ThemisError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ThemisError::OracleUnavailable {
                attempts: 1,
                message: format!("API request failed with status {}: {}", status, error_text),
            });
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ThemisError::OracleResponse(format!("Failed to parse response: {}", e)))?;

        api_response
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| ThemisError::OracleResponse("Empty response from API".to_string()))
    }
}

/// Extract a field from a structured text response
fn extract_field(response: &str, field: &str) -> Result<String> {
    response
        .lines()
        .find(|line| line.trim_start().starts_with(field))
        .and_then(|line| line.trim_start().strip_prefix(field))
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ThemisError::OracleResponse(format!("Failed to extract field: {}", field)))
}

/// Parse one dimension block of the classification response
fn parse_dimension<T: std::str::FromStr<Err = String>>(
    response: &str,
    value_field: &str,
    confidence_field: &str,
    reasoning_field: &str,
) -> Result<DimensionResult<T>> {
    let value = extract_field(response, value_field)?
        .parse::<T>()
        .map_err(ThemisError::OracleResponse)?;
    let confidence = extract_field(response, confidence_field)?
        .parse::<f32>()
        .map_err(|e| ThemisError::OracleResponse(format!("Bad confidence: {}", e)))?
        .clamp(0.0, 1.0);
    let reasoning = extract_field(response, reasoning_field)?;

    Ok(DimensionResult {
        value,
        confidence,
        reasoning,
    })
}

fn default_templates() -> BTreeMap<String, String> {
    let mut templates = BTreeMap::new();

    templates.insert(
        TEMPLATE_SCORE.to_string(),
        r#"You are scoring how well a work item description matches a reference scenario.

Work item:
{description}

Scenario: {title}
Domain: {domain}
Expected classification: {expected}
Examples:
{examples}

Respond with a similarity score from 0 (unrelated) to 100 (same work pattern).
A description covering strictly more scope than the scenario (e.g. multiple
providers where the scenario covers one) must NOT score as a full match.

Format your response EXACTLY as:
SCORE: <0-100>
"#
        .to_string(),
    );

    templates.insert(
        TEMPLATE_CLASSIFY.to_string(),
        r#"You are classifying a software work item along three dimensions.

Work item:
{description}

Context:
{context}

Classify the work item:
- SIZE: one of XS, S, M, L, XL, XXL
- COMPLEXITY: one of Low, Medium, High, Critical
- TYPE: one of Feature, Enhancement, Bug, Infrastructure, Migration, Research, Epic

For each dimension give a confidence (0.0 - 1.0) and one sentence of reasoning.

Format your response EXACTLY as:
SIZE: <value>
SIZE_CONFIDENCE: <0.0-1.0>
SIZE_REASONING: <sentence>
COMPLEXITY: <value>
COMPLEXITY_CONFIDENCE: <0.0-1.0>
COMPLEXITY_REASONING: <sentence>
TYPE: <value>
TYPE_CONFIDENCE: <0.0-1.0>
TYPE_REASONING: <sentence>
"#
        .to_string(),
    );

    templates
}

#[async_trait]
impl ReasoningOracle for AnthropicOracle {
    async fn score(&self, description: &str, scenario: &Scenario) -> Result<u8> {
        let expected = format!(
            "{}/{}/{}",
            scenario.expected.size, scenario.expected.complexity, scenario.expected.work_type
        );
        let prompt = self
            .template(TEMPLATE_SCORE)
            .replace("{description}", description)
            .replace("{title}", &scenario.title)
            .replace("{domain}", &scenario.domain)
            .replace("{expected}", &expected)
            .replace("{examples}", &scenario.examples.join("\n"));

        let response = self.call_api(&prompt).await?;
        let score = extract_field(&response, "SCORE:")?
            .parse::<i64>()
            .map_err(|e| ThemisError::OracleResponse(format!("Bad score: {}", e)))?;

        Ok(score.clamp(0, 100) as u8)
    }

    async fn classify(
        &self,
        description: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<OracleClassification> {
        let context_text = context
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = self
            .template(TEMPLATE_CLASSIFY)
            .replace("{description}", description)
            .replace("{context}", &context_text);

        let response = self.call_api(&prompt).await?;

        let size: DimensionResult<Size> =
            parse_dimension(&response, "SIZE:", "SIZE_CONFIDENCE:", "SIZE_REASONING:")?;
        let complexity: DimensionResult<Complexity> = parse_dimension(
            &response,
            "COMPLEXITY:",
            "COMPLEXITY_CONFIDENCE:",
            "COMPLEXITY_REASONING:",
        )?;
        let work_type: DimensionResult<WorkType> =
            parse_dimension(&response, "TYPE:", "TYPE_CONFIDENCE:", "TYPE_REASONING:")?;

        Ok(OracleClassification {
            size,
            complexity,
            work_type,
        })
    }

    async fn analyze(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        let prompt = format!(
            r#"Analyze the following payload and respond with a single JSON object.

{}
"#,
            serde_json::to_string_pretty(&payload)?
        );

        let response = self.call_api(&prompt).await?;

        // The model may wrap JSON in prose; take the outermost object
        let start = response.find('{');
        let end = response.rfind('}');
        match (start, end) {
            (Some(start), Some(end)) if end > start => {
                serde_json::from_str(&response[start..=end]).map_err(|e| {
                    ThemisError::OracleResponse(format!("Analysis was not valid JSON: {}", e))
                })
            }
            _ => Err(ThemisError::OracleResponse(
                "Analysis response contained no JSON object".to_string(),
            )),
        }
    }
}
