//! Estimate assistant: an OpenAI-compatible chat client, a requirement interview and
//! a draft-estimate generator.
//!
//! The model only proposes. Line items pass through [`guardrails::GuardrailPolicy`],
//! catalog prices replace model prices for known SKUs, and every result is a `draft`
//! estimate without an approval flow.

pub mod draft;
pub mod error;
pub mod guardrails;
pub mod interview;
pub mod llm;
pub mod runtime;

pub use draft::{extract_json_object, DraftEstimate, DraftEstimateGenerator};
pub use error::AgentError;
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use interview::{requirements_from_history, InterviewTurn, RequirementInterview, COMPLETION_MARKER};
pub use llm::{ChatMessage, ChatRole, LlmClient, OpenAiCompatibleClient, ScriptedLlmClient};
pub use runtime::AssistantRuntime;
