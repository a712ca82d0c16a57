//! Terminology agent
//!
//! Asks the model for a JSON object mapping medical terms to plain-language
//! explanations. Anything other than a non-empty object of string values is
//! rejected as malformed rather than coerced.

use super::{
    strip_code_fence, AgentError, AgentResult, ContentAgent, ModelSettings, PromptRunner,
    RawContent,
};
use crate::llm::provider::ResponseFormat;
use crate::retry::RetryError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

pub const SYSTEM_PROMPT: &str = "You are a medical terminology expert. Extract medical terms \
from the text and provide clear, layperson-friendly explanations. Return the response as a \
JSON object with terms as keys and explanations as values.";

pub struct TerminologyAgent {
    runner: PromptRunner,
    settings: ModelSettings,
}

impl TerminologyAgent {
    pub fn new(runner: PromptRunner, settings: ModelSettings) -> Self {
        Self { runner, settings }
    }
}

/// Parse the term → explanation object
pub fn parse_terminology(raw: &str) -> Result<BTreeMap<String, String>, AgentError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| AgentError::MalformedResponse(format!("terminology is not JSON: {e}")))?;

    let Value::Object(entries) = value else {
        return Err(AgentError::MalformedResponse(
            "terminology must be a JSON object".to_string(),
        ));
    };

    let mut terms = BTreeMap::new();
    for (term, explanation) in entries {
        let Value::String(explanation) = explanation else {
            return Err(AgentError::MalformedResponse(format!(
                "explanation for '{term}' is not a string"
            )));
        };
        let (term, explanation) = (term.trim().to_string(), explanation.trim().to_string());
        if term.is_empty() || explanation.is_empty() {
            return Err(AgentError::MalformedResponse(
                "terminology contains a blank term or explanation".to_string(),
            ));
        }
        terms.insert(term, explanation);
    }

    if terms.is_empty() {
        return Err(AgentError::MalformedResponse(
            "terminology object is empty".to_string(),
        ));
    }
    Ok(terms)
}

#[async_trait]
impl ContentAgent for TerminologyAgent {
    type Output = BTreeMap<String, String>;

    fn name(&self) -> &'static str {
        "terminology"
    }

    async fn process(&self, content: &RawContent) -> AgentResult<Self::Output> {
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
        parse_terminology(&raw).map_err(RetryError::Terminal)
    }
}
