//! LLM collaborator boundary.
//!
//! The model is an opaque `generate(prompt) -> text` call whose output must
//! be treated as adversarially unreliable: the arbiter, not this module,
//! decides what to do with a malformed reply. Transport-level failures are
//! distinguished from content-level garbage so the orchestrator can retry
//! the former at stage granularity.

mod script;

pub use script::ScriptedClient;

use async_trait::async_trait;

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Transport-level errors from the LLM collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The request could not be delivered or the connection dropped.
    #[error("llm transport error: {0}")]
    Transport(String),

    /// The request timed out.
    #[error("llm request timed out after {0} seconds")]
    Timeout(u64),

    /// The collaborator refused the request (quota, auth).
    #[error("llm request rejected: {0}")]
    Rejected(String),
}

impl LlmError {
    /// Check if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Trait for the semantic-arbitration collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt and return the raw response text.
    ///
    /// The text may be anything: valid JSON, prose, or garbage. Callers
    /// must parse defensively.
    async fn generate(&self, prompt: &str) -> LlmResult<String>;
}
