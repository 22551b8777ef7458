use std::sync::Arc;

use mitsumori_core::config::LlmConfig;
use mitsumori_core::domain::product::Product;

use crate::draft::{DraftEstimate, DraftEstimateGenerator};
use crate::error::AgentError;
use crate::guardrails::GuardrailPolicy;
use crate::interview::{InterviewTurn, RequirementInterview};
use crate::llm::{ChatMessage, LlmClient, OpenAiCompatibleClient};

/// Entry point used by the HTTP layer: one interview and one generator over a shared client.
pub struct AssistantRuntime {
    interview: RequirementInterview,
    drafts: DraftEstimateGenerator,
}

impl AssistantRuntime {
    pub fn new(client: Arc<dyn LlmClient>, guardrails: GuardrailPolicy) -> Self {
        Self {
            interview: RequirementInterview::new(client.clone()),
            drafts: DraftEstimateGenerator::new(client, guardrails),
        }
    }

    /// `Ok(None)` when the assistant is switched off in configuration.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, AgentError> {
        if !config.enabled {
            return Ok(None);
        }
        let client = OpenAiCompatibleClient::from_config(config)?;
        Ok(Some(Self::new(Arc::new(client), GuardrailPolicy::default())))
    }

    pub async fn interview(&self, history: &[ChatMessage]) -> Result<InterviewTurn, AgentError> {
        self.interview.reply(history).await
    }

    pub async fn draft_estimate(
        &self,
        requirements: &str,
        catalog: &[Product],
    ) -> Result<DraftEstimate, AgentError> {
        self.drafts.generate(requirements, catalog).await
    }
}
