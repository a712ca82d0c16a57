//! Summarizer agent

use super::{AgentError, AgentResult, ContentAgent, ModelSettings, PromptRunner, RawContent};
use crate::llm::provider::ResponseFormat;
use crate::retry::RetryError;
use async_trait::async_trait;

pub const SYSTEM_PROMPT: &str = "You are a medical research assistant. Summarize the following \
medical article in a clear, concise way that maintains accuracy and key findings.";

pub struct Summarizer {
    runner: PromptRunner,
    settings: ModelSettings,
}

impl Summarizer {
    pub fn new(runner: PromptRunner, settings: ModelSettings) -> Self {
        Self { runner, settings }
    }
}

/// The trimmed summary text; blank output is malformed
pub fn parse_summary(raw: &str) -> Result<String, AgentError> {
    let summary = raw.trim();
    if summary.is_empty() {
        return Err(AgentError::MalformedResponse(
            "summary is empty".to_string(),
        ));
    }
    Ok(summary.to_string())
}

#[async_trait]
impl ContentAgent for Summarizer {
    type Output = String;

    fn name(&self) -> &'static str {
        "summarize"
    }

    async fn process(&self, content: &RawContent) -> AgentResult<String> {
        let raw = self
            .runner
            .run(
                self.name(),
                &self.settings,
                SYSTEM_PROMPT,
                content,
                ResponseFormat::Text,
            )
            .await?;
        parse_summary(&raw).map_err(RetryError::Terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary_trims() {
        assert_eq!(
            parse_summary("  Statins lower LDL.\n").unwrap(),
            "Statins lower LDL."
        );
    }

    #[test]
    fn test_parse_summary_rejects_blank() {
        assert!(matches!(
            parse_summary(" \n\t"),
            Err(AgentError::MalformedResponse(_))
        ));
    }
}
