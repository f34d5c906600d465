//! An HTTP [`LlmClient`] for OpenAI-compatible chat completion APIs (OpenAI
//! itself, Ollama, LM Studio, OpenRouter, and similar proxies). This is the
//! default concrete client wired up by `main.rs`; anything implementing the
//! same trait can be swapped in instead (see `task-core::llm`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use task_core::llm::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, FinishReason, LlmClient, LlmError,
    ToolCallRequest, TokenUsage,
};

#[derive(Clone, Debug)]
pub struct HttpLlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    /// Provider-published price per 1K prompt tokens, in cents. Defaults to
    /// `0.0`, which makes cost-budget enforcement a no-op; set this from the
    /// provider's pricing page to make `cost_cap_cents` meaningful.
    pub prompt_cost_per_1k_cents: f64,
    /// Provider-published price per 1K completion tokens, in cents.
    pub completion_cost_per_1k_cents: f64,
}

impl HttpLlmConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            request_timeout: Duration::from_secs(120),
            prompt_cost_per_1k_cents: 0.0,
            completion_cost_per_1k_cents: 0.0,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_pricing(mut self, prompt_cost_per_1k_cents: f64, completion_cost_per_1k_cents: f64) -> Self {
        self.prompt_cost_per_1k_cents = prompt_cost_per_1k_cents;
        self.completion_cost_per_1k_cents = completion_cost_per_1k_cents;
        self
    }
}

pub struct HttpLlmClient {
    config: HttpLlmConfig,
    http: Client,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = WireRequest {
            model: self.config.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop_sequences,
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        };

        let mut builder = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Transient(format!("request to {url} failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: WireResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Transient(format!("malformed response body: {e}")))?;
                body.into_chat_response(&self.config)
            }
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                Err(LlmError::Transient(format!("provider returned {status}")))
            }
            status => {
                let detail = response.text().await.unwrap_or_default();
                Err(LlmError::Rejected(format!("provider returned {status}: {detail}")))
            }
        }
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        };

        Self {
            role,
            content: message.content.clone(),
            tool_call_id: message.tool_call_id.clone(),
            name: message.name.clone(),
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

impl WireResponse {
    fn into_chat_response(self, config: &HttpLlmConfig) -> Result<ChatResponse, LlmError> {
        let cost_cents = ((self.usage.prompt_tokens as f64 / 1000.0) * config.prompt_cost_per_1k_cents
            + (self.usage.completion_tokens as f64 / 1000.0) * config.completion_cost_per_1k_cents)
            .round() as i64;

        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Rejected("response had no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments));
                ToolCallRequest { id: call.id, name: call.function.name, arguments }
            })
            .collect::<Vec<_>>();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };

        Ok(ChatResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason,
            usage: TokenUsage {
                prompt: self.usage.prompt_tokens,
                completion: self.usage.completion_tokens,
                total: self.usage.total_tokens,
            },
            cost_cents,
        })
    }
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireResponseToolCall>,
}

#[derive(Deserialize)]
struct WireResponseToolCall {
    id: String,
    function: WireResponseFunctionCall,
}

#[derive(Deserialize)]
struct WireResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}
