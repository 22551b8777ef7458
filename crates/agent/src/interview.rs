use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::AgentError;
use crate::llm::{ChatMessage, ChatRole, LlmClient};

/// Emitted by the model once it has enough to draft an estimate.
pub const COMPLETION_MARKER: &str = "[[REQUIREMENTS_COMPLETE]]";

const INTERVIEW_PROMPT: &str = "あなたは日本の中小企業向けに見積書を作成する営業アシスタントです。\
顧客の要件を聞き取り、見積に必要な情報(目的、作業範囲、数量、納期、予算、保守の有無)を\
一度に1〜2問ずつ、簡潔な日本語で質問してください。\
価格を約束したり承認を代行したりしてはいけません。\
見積の下書きを作るのに十分な情報が集まったら、要件の要約を箇条書きで示し、\
最後の行に [[REQUIREMENTS_COMPLETE]] とだけ出力してください。";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InterviewTurn {
    pub reply: String,
    pub complete: bool,
}

/// Requirement-gathering chat that precedes draft generation.
pub struct RequirementInterview {
    client: Arc<dyn LlmClient>,
}

impl RequirementInterview {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// `history` is the user/assistant exchange so far; it must end with the user's message.
    /// System messages supplied by callers are ignored.
    pub async fn reply(&self, history: &[ChatMessage]) -> Result<InterviewTurn, AgentError> {
        let conversation: Vec<ChatMessage> =
            history.iter().filter(|message| message.role != ChatRole::System).cloned().collect();
        if conversation.last().map(|message| message.role) != Some(ChatRole::User) {
            return Err(AgentError::EmptyConversation);
        }

        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatMessage::system(INTERVIEW_PROMPT));
        messages.extend(conversation);

        let raw = self.client.complete(&messages).await?;
        let turn = parse_turn(&raw);
        info!(
            event_name = "assistant.interview.turn",
            turns = messages.len() - 1,
            complete = turn.complete,
            "requirement interview replied"
        );
        Ok(turn)
    }
}

fn parse_turn(raw: &str) -> InterviewTurn {
    let complete = raw.contains(COMPLETION_MARKER);
    let reply = raw.replace(COMPLETION_MARKER, "").trim().to_string();
    InterviewTurn { reply, complete }
}

/// Flattens an interview into the requirement text handed to the draft generator.
pub fn requirements_from_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .filter(|message| message.role != ChatRole::System)
        .map(|message| {
            let speaker = match message.role {
                ChatRole::User => "顧客",
                _ => "担当",
            };
            format!("{speaker}: {}", message.content.replace(COMPLETION_MARKER, "").trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
