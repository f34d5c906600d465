use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use task_core::llm::{
    ChatRequest, ChatResponse, FinishReason, LlmClient, LlmError, ToolCallRequest, TokenUsage,
};

/// One scripted response to a `chat` call.
pub enum ScriptedTurn {
    /// Call a tool by name with the given arguments.
    Tool { name: &'static str, arguments: Value },
    /// Finish the job by calling `create_result`.
    Succeed { summary: &'static str },
    Fail { summary: &'static str },
    /// Plain assistant text with no tool call, for exercising turns that
    /// don't terminate the job.
    Text(&'static str),
    /// Like [`ScriptedTurn::Text`], but reports a fixed per-call cost — for
    /// exercising cost-cap enforcement without modeling real token pricing.
    CostlyText { text: &'static str, cost_cents: i64 },
    /// Always returns `LlmError::Transient`, for exercising retry/backoff
    /// paths in callers that wrap the client (the agent loop itself treats
    /// any `Err` from `chat` as fatal to the turn; scripting a transient
    /// error here is for tool/client-level tests, not the loop).
    TransientError,
}

/// A deterministic [`LlmClient`] that plays back a fixed script, one turn
/// per call to `chat`. Once the script is exhausted it repeats
/// [`ScriptedTurn::Succeed`] with a generic summary, so a test that
/// undercounts its own turns degrades into a pass instead of a panic deep
/// inside the agent loop.
pub struct ScriptedLlm {
    turns: Mutex<Vec<ScriptedTurn>>,
    cursor: Mutex<usize>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns),
            cursor: Mutex::new(0),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn always_succeed() -> Self {
        Self::new(vec![ScriptedTurn::Succeed {
            summary: "done",
        }])
    }

    /// Never terminates the job on its own; used by tests that drive
    /// cancellation or deadline expiry instead of letting the job finish.
    pub fn stalls_forever() -> Self {
        Self::new(vec![ScriptedTurn::Text("thinking...")])
    }

    pub fn calls_made(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::Acquire)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::AcqRel);

        let turns = self.turns.lock();
        let mut cursor = self.cursor.lock();
        let index = (*cursor).min(turns.len().saturating_sub(1));
        if *cursor < turns.len() {
            *cursor += 1;
        }

        let turn = turns.get(index).unwrap_or(&ScriptedTurn::Succeed { summary: "done" });

        match turn {
            ScriptedTurn::Tool { name, arguments } => Ok(ChatResponse {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: format!("call-{index}"),
                    name: (*name).to_owned(),
                    arguments: arguments.clone(),
                }],
                finish_reason: FinishReason::ToolCalls,
                usage: TokenUsage { prompt: 100, completion: 20, total: 120 },
                cost_cents: 0,
            }),
            ScriptedTurn::Succeed { summary } => Ok(terminal_response(index, "success", summary)),
            ScriptedTurn::Fail { summary } => Ok(terminal_response(index, "partial", summary)),
            ScriptedTurn::Text(text) => Ok(ChatResponse {
                content: Some((*text).to_owned()),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                usage: TokenUsage { prompt: 80, completion: 10, total: 90 },
                cost_cents: 0,
            }),
            ScriptedTurn::CostlyText { text, cost_cents } => Ok(ChatResponse {
                content: Some((*text).to_owned()),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                usage: TokenUsage { prompt: 80, completion: 10, total: 90 },
                cost_cents: *cost_cents,
            }),
            ScriptedTurn::TransientError => {
                Err(LlmError::Transient("scripted transient failure".to_owned()))
            }
        }
    }
}

fn terminal_response(index: usize, status: &str, summary: &str) -> ChatResponse {
    ChatResponse {
        content: None,
        tool_calls: vec![ToolCallRequest {
            id: format!("call-{index}"),
            name: "create_result".to_owned(),
            arguments: json!({ "status": status, "summary": summary }),
        }],
        finish_reason: FinishReason::ToolCalls,
        usage: TokenUsage { prompt: 100, completion: 20, total: 120 },
        cost_cents: 0,
    }
}
