//! The LLM client contract consumed by the agent loop.
//!
//! Concrete providers (Anthropic/OpenAI/etc. HTTP clients) are external
//! collaborators; this module only defines the boundary.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChatRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: None,
        }
    }

    /// Rough token estimate using the `⌈chars/4⌉` heuristic used throughout
    /// context compression and budget accounting.
    pub fn estimated_tokens(&self) -> i64 {
        ((self.content.chars().count() as i64) + 3) / 4
    }
}

/// A tool advertised to the model for this turn, shaped for the wire format
/// rather than execution (see [`crate::tool::Tool`] for that side).
#[derive(Clone, Debug, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool invocation the model asked for.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f32>,
    pub stop_sequences: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TokenUsage {
    pub prompt: i64,
    pub completion: i64,
    pub total: i64,
}

#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    /// What this call cost against the job's `cost_cap_cents` budget.
    /// Clients that can't price a call (no provider-published rate for the
    /// model) report `0` rather than guessing.
    pub cost_cents: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm provider returned a transient error: {0}")]
    Transient(String),
    #[error("llm provider rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}
