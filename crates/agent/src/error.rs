use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("assistant is disabled")]
    Disabled,
    #[error("assistant misconfigured: {0}")]
    Configuration(String),
    #[error("conversation is empty or does not end with a user message")]
    EmptyConversation,
    #[error("llm transport failure: {0}")]
    Transport(String),
    #[error("llm returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("llm returned no content")]
    EmptyResponse,
    #[error("draft estimate could not be read: {0}")]
    MalformedDraft(String),
}

impl AgentError {
    /// Transport and upstream failures are the assistant's provider failing, not the caller.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Upstream { .. } | Self::EmptyResponse)
    }
}
