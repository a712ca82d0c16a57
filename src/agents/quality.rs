//! Quality-assessment agent
//!
//! The model answers with a JSON object that is first checked against the
//! schema generated from [`QualityOutput`], then converted into a
//! [`QualityAssessment`]. The overall score is always recomputed from the
//! five dimension ratings; only its explanation is taken from the model.

use super::{
    strip_code_fence, AgentError, AgentResult, ContentAgent, ModelSettings, PromptRunner,
    RawContent,
};
use crate::llm::provider::ResponseFormat;
use crate::protocol::{DimensionScore, QualityAssessment, QualityDimensions};
use crate::retry::RetryError;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

pub const SYSTEM_PROMPT: &str = "You are a medical research quality assessment expert. Analyze \
the given medical article and evaluate its quality based on: study_design, sample_quality, \
statistical_rigor, bias and evidence_level. Rate each dimension from 0 to 5 and return a JSON \
object where each of those keys maps to {\"rating\": <0-5>, \"explanation\": <text>}, plus \
\"overall_score\" ({\"rating\", \"explanation\"}), \"key_limitations\" (array of strings) and \
\"recommendations\" (array of strings).";

/// Highest rating a dimension may carry
pub const MAX_RATING: f64 = 5.0;

/// Provider output shape
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QualityOutput {
    pub study_design: RatedDimension,
    pub sample_quality: RatedDimension,
    pub statistical_rigor: RatedDimension,
    pub bias: RatedDimension,
    pub evidence_level: RatedDimension,
    #[serde(default)]
    pub overall_score: Option<RatedDimension>,
    #[serde(default)]
    pub key_limitations: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RatedDimension {
    pub rating: RatingValue,
    #[serde(default)]
    pub explanation: String,
}

/// Models return ratings both as numbers and as numeric strings
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RatingValue {
    Number(f64),
    Text(String),
}

impl RatedDimension {
    fn into_score(self, dimension: &str) -> Result<DimensionScore, AgentError> {
        let rating = match self.rating {
            RatingValue::Number(value) => value,
            RatingValue::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                AgentError::MalformedResponse(format!(
                    "{dimension} rating '{text}' is not numeric"
                ))
            })?,
        };
        if !rating.is_finite() || !(0.0..=MAX_RATING).contains(&rating) {
            return Err(AgentError::MalformedResponse(format!(
                "{dimension} rating {rating} is outside 0-{MAX_RATING}"
            )));
        }
        Ok(DimensionScore::new(rating, self.explanation.trim()))
    }
}

impl QualityOutput {
    /// JSON schema the provider output must satisfy
    pub fn json_schema() -> Result<Value, serde_json::Error> {
        serde_json::to_value(schemars::schema_for!(QualityOutput))
    }
}

fn check_schema(value: &Value) -> Result<(), AgentError> {
    let schema = QualityOutput::json_schema()
        .map_err(|e| AgentError::MalformedResponse(format!("schema generation failed: {e}")))?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| AgentError::MalformedResponse(format!("schema compilation failed: {e}")))?;

    validator.validate(value).map_err(|errors| {
        let error_messages: Vec<String> = errors
            .map(|e| format!("At '{}': {}", e.instance_path, e))
            .collect();
        AgentError::MalformedResponse(error_messages.join("; "))
    })
}

/// Parse and score a provider quality answer
pub fn parse_assessment(raw: &str) -> Result<QualityAssessment, AgentError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| AgentError::MalformedResponse(format!("assessment is not JSON: {e}")))?;
    check_schema(&value)?;

    let output: QualityOutput = serde_json::from_value(value)
        .map_err(|e| AgentError::MalformedResponse(format!("assessment shape: {e}")))?;

    let dimensions = QualityDimensions {
        study_design: output.study_design.into_score("study_design")?,
        sample_quality: output.sample_quality.into_score("sample_quality")?,
        statistical_rigor: output.statistical_rigor.into_score("statistical_rigor")?,
        bias: output.bias.into_score("bias")?,
        evidence_level: output.evidence_level.into_score("evidence_level")?,
    };
    let overall_explanation = output.overall_score.map(|overall| overall.explanation);

    QualityAssessment::derive(
        dimensions,
        overall_explanation,
        clean_list(output.key_limitations),
        clean_list(output.recommendations),
    )
    .ok_or_else(|| AgentError::MalformedResponse("dimension ratings are not numeric".to_string()))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

pub struct QualityAgent {
    runner: PromptRunner,
    settings: ModelSettings,
}

impl QualityAgent {
    pub fn new(runner: PromptRunner, settings: ModelSettings) -> Self {
        Self { runner, settings }
    }
}

#[async_trait]
impl ContentAgent for QualityAgent {
    type Output = QualityAssessment;

    fn name(&self) -> &'static str {
        "quality"
    }

    async fn process(&self, content: &RawContent) -> AgentResult<QualityAssessment> {
        let raw = self
            .runner
            .run(
                self.name(),
                &self.settings,
                SYSTEM_PROMPT,
                content,
                ResponseFormat::JsonObject,
            )
            .await?;
        parse_assessment(&raw).map_err(RetryError::Terminal)
    }
}
