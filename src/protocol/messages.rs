//! Wire types for the workflow endpoint
//!
//! Inbound [`WorkflowRequest`], the [`WorkflowResult`] produced by the
//! pipeline, and the success / error envelopes wrapped around it.

use crate::validation::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Payload type tag for article URL requests, currently the only one accepted
pub const PAYLOAD_TYPE_URL: &str = "url";

/// Agent labels carried on requests for routing and logging only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentName {
    UserAgent,
    WorkflowCoordinator,
    ArticleFetcherAgent,
    SummarizerAgent,
    TerminologyAgent,
    QualityAssessmentAgent,
    ResponseFormatterAgent,
    #[serde(other)]
    Unknown,
}

/// Inbound processing request
///
/// # Examples
/// ```
/// use article_digest::protocol::{AgentName, WorkflowRequest};
///
/// let request = WorkflowRequest::for_url("https://www.cdc.gov/flu/about/index.html");
/// assert_eq!(request.sender_agent, AgentName::UserAgent);
/// assert_eq!(request.article_url().unwrap(), "https://www.cdc.gov/flu/about/index.html");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRequest {
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    #[serde(default = "Uuid::new_v4")]
    pub conversation_id: Uuid,
    pub sender_agent: AgentName,
    pub recipient_agent: AgentName,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub payload_type: String,
    pub payload: Value,
}

impl WorkflowRequest {
    /// A user request to process the article at `url`
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_agent: AgentName::UserAgent,
            recipient_agent: AgentName::ArticleFetcherAgent,
            timestamp: Utc::now(),
            payload_type: PAYLOAD_TYPE_URL.to_string(),
            payload: serde_json::json!({ "url": url.into() }),
        }
    }

    /// The article URL, after checking that payload and payload type agree
    pub fn article_url(&self) -> Result<&str, ValidationError> {
        if self.payload_type != PAYLOAD_TYPE_URL {
            return Err(ValidationError::UnsupportedPayload(format!(
                "payload_type '{}' is not supported",
                self.payload_type
            )));
        }
        self.payload
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ValidationError::UnsupportedPayload(
                    "payload for type 'url' must be an object with a string 'url' field"
                        .to_string(),
                )
            })
    }
}

/// One scored quality dimension
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionScore {
    /// Numeric string in 0-5
    pub rating: String,
    pub explanation: String,
}

impl DimensionScore {
    /// Build a score from a numeric rating; integral ratings print without decimals
    pub fn new(rating: f64, explanation: impl Into<String>) -> Self {
        let rating = if rating.fract() == 0.0 {
            format!("{rating:.0}")
        } else {
            format!("{rating:.1}")
        };
        Self {
            rating,
            explanation: explanation.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.rating.trim().parse().ok()
    }
}

/// The five scored input dimensions of a quality assessment
#[derive(Debug, Clone, PartialEq)]
pub struct QualityDimensions {
    pub study_design: DimensionScore,
    pub sample_quality: DimensionScore,
    pub statistical_rigor: DimensionScore,
    pub bias: DimensionScore,
    pub evidence_level: DimensionScore,
}

impl QualityDimensions {
    fn ratings(&self) -> [Option<f64>; 5] {
        [
            self.study_design.value(),
            self.sample_quality.value(),
            self.statistical_rigor.value(),
            self.bias.value(),
            self.evidence_level.value(),
        ]
    }

    /// Mean of the five ratings rounded to one decimal
    pub fn mean_rating(&self) -> Option<f64> {
        let ratings = self.ratings();
        let mut sum = 0.0;
        for rating in ratings {
            sum += rating?;
        }
        Some((sum / ratings.len() as f64 * 10.0).round() / 10.0)
    }
}

/// Structured study-quality assessment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityAssessment {
    pub study_design: DimensionScore,
    pub sample_quality: DimensionScore,
    pub statistical_rigor: DimensionScore,
    pub bias: DimensionScore,
    pub evidence_level: DimensionScore,
    pub overall_score: DimensionScore,
    pub key_limitations: Vec<String>,
    pub recommendations: Vec<String>,
}

impl QualityAssessment {
    /// Assemble an assessment, deriving `overall_score` from the five dimensions.
    ///
    /// Returns `None` when a dimension rating is not numeric.
    pub fn derive(
        dimensions: QualityDimensions,
        overall_explanation: Option<String>,
        key_limitations: Vec<String>,
        recommendations: Vec<String>,
    ) -> Option<Self> {
        let mean = dimensions.mean_rating()?;
        let explanation = overall_explanation
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| "Mean of the five dimension ratings".to_string());

        Some(Self {
            overall_score: DimensionScore {
                rating: format!("{mean:.1}"),
                explanation,
            },
            study_design: dimensions.study_design,
            sample_quality: dimensions.sample_quality,
            statistical_rigor: dimensions.statistical_rigor,
            bias: dimensions.bias,
            evidence_level: dimensions.evidence_level,
            key_limitations,
            recommendations,
        })
    }
}

/// Final pipeline output; never mutated after assembly
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowResult {
    pub summary: String,
    pub terminology: BTreeMap<String, String>,
    pub quality_assessment: QualityAssessment,
}

/// Successful response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowResponse {
    pub success: bool,
    pub message: String,
    pub data: WorkflowData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowData {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub url: String,
    /// True when served from the response cache
    pub cached: bool,
    #[serde(flatten)]
    pub result: WorkflowResult,
}

impl WorkflowResponse {
    pub fn success(data: WorkflowData) -> Self {
        Self {
            success: true,
            message: "Article processed successfully".to_string(),
            data,
        }
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}
