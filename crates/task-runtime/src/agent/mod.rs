//! The per-job agent loop: `init → analyze → plan → act* → finalize`.
//!
//! Each state transition is one LLM turn; `act` repeats until a terminal tool
//! is called, a budget is exhausted, cancellation is observed, or the job's
//! deadline is reached. See the turn protocol for the exact per-turn steps.

pub mod compress;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use task_core::job::{CancelReason, FailureReason};
use task_core::llm::{ChatMessage, ChatRequest, FinishReason, LlmClient, ToolSpec};
use task_core::tool::{CancelSignal, EventLogger, Tool, ToolContext, ToolOutcome};
use task_core::{BudgetUsage, EventKind, Job, JobId, JobMode, JobStatus, NewEvent};
use uuid::Uuid;

use self::compress::{compress, CompressionConfig};
use crate::clock::Clock;
use crate::store::Store;

/// `create_result`'s `status` field maps directly to one of these.
const TOOL_CREATE_RESULT: &str = "create_result";
const TOOL_REQUEST_HUMAN_REVIEW: &str = "request_human_review";

const MECHANIC_MAX_PATCH_FILES: u64 = 5;
const MECHANIC_MAX_PATCH_LINES: u64 = 200;

/// What became of a job after [`AgentLoop::run`] returns. The loop has
/// already written the corresponding store transition by the time this is
/// returned; the worker only needs it for logging and task bookkeeping.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AgentOutcome {
    Finalized(JobStatus),
    WaitingHuman,
    /// The claim was lost (heartbeat failed or another worker has it). The
    /// caller must not finalize; the sweeper will recover the job.
    ClaimLost,
}

/// Where a job is in the `analyze → plan → act` arc. Each turn's reasoning is
/// logged under the matching [`EventKind`] and the phase only ever advances
/// forward — a model that calls a tool right away skips straight to `Act`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Analyze,
    Plan,
    Act,
}

impl Phase {
    fn event_kind(self) -> EventKind {
        match self {
            Phase::Analyze => EventKind::Analysis,
            Phase::Plan => EventKind::Plan,
            Phase::Act => EventKind::Decision,
        }
    }

    fn advance(self) -> Self {
        match self {
            Phase::Analyze => Phase::Plan,
            Phase::Plan | Phase::Act => Phase::Act,
        }
    }
}

/// Drives a single job's LLM-tool dialogue to completion.
pub struct AgentLoop {
    store: Arc<Store>,
    llm: Arc<dyn LlmClient>,
    tools: Vec<Arc<dyn Tool>>,
    clock: Arc<dyn Clock>,
    job: Job,
    worker_id: String,
    cancel: CancelSignal,
    claim_lost: Arc<AtomicBool>,
    compression: CompressionConfig,
    deadline: DateTime<Utc>,
    usage: BudgetUsage,
    phase: Phase,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        llm: Arc<dyn LlmClient>,
        tools: Vec<Arc<dyn Tool>>,
        clock: Arc<dyn Clock>,
        job: Job,
        worker_id: String,
        cancel: CancelSignal,
        claim_lost: Arc<AtomicBool>,
    ) -> Self {
        let started_at = job.started_at.unwrap_or_else(|| clock.now());
        let deadline = started_at + chrono::Duration::seconds(job.caps.time_cap_s);

        Self {
            store,
            llm,
            tools,
            clock,
            job,
            worker_id,
            cancel,
            claim_lost,
            compression: CompressionConfig::default(),
            deadline,
            usage: BudgetUsage::default(),
            phase: Phase::Analyze,
        }
    }

    fn job_id(&self) -> JobId {
        self.job.id
    }

    fn advertised_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|tool| match self.job.mode {
                JobMode::Mechanic => tool.risk_hint().allowed_in_mechanic(),
                JobMode::Genius => true,
            })
            .cloned()
            .collect()
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an autonomous coding agent operating under audit. \
             trace_id={trace_id} mode={mode} step_cap={step_cap} token_cap={token_cap} \
             time_limit_s={time_limit_s}. Every action you take is recorded in an append-only \
             ledger. Call `{create_result}` when the goal is resolved (or cannot be) and \
             `{human_review}` if you need a human decision before continuing.",
            trace_id = self.job.trace_id,
            mode = self.job.mode,
            step_cap = self.job.caps.step_cap,
            token_cap = self.job.caps.token_cap,
            time_limit_s = self.job.caps.time_cap_s,
            create_result = TOOL_CREATE_RESULT,
            human_review = TOOL_REQUEST_HUMAN_REVIEW,
        )
    }

    async fn log(&self, kind: EventKind, summary: impl Into<String>) {
        let event = NewEvent {
            job_id: self.job_id(),
            trace_id: self.job.trace_id,
            kind,
            tool_name: None,
            summary: summary.into(),
            params: None,
            result: None,
            duration_ms: None,
            tokens_used: None,
            cost_cents: None,
        };

        if let Err(e) = self.store.append_event(&event).await {
            tracing::warn!(job_id = %self.job_id(), "failed to append ledger event: {e}");
        }
    }

    /// Like [`Self::log`], but records what this turn's LLM call spent —
    /// used for the `analysis`/`plan`/`decision` events so the ledger shows
    /// where tokens and cost went, not just the closing total.
    async fn log_turn(&self, kind: EventKind, summary: impl Into<String>, tokens: i64, cost_cents: i64) {
        let event = NewEvent {
            job_id: self.job_id(),
            trace_id: self.job.trace_id,
            kind,
            tool_name: None,
            summary: summary.into(),
            params: None,
            result: None,
            duration_ms: None,
            tokens_used: Some(tokens),
            cost_cents: Some(cost_cents),
        };

        if let Err(e) = self.store.append_event(&event).await {
            tracing::warn!(job_id = %self.job_id(), "failed to append ledger event: {e}");
        }
    }

    /// Run the loop to completion. Never panics: any internal failure is
    /// caught, logged as an `error` event, and finalized `failed(internal)`
    /// unless the claim is already gone.
    pub async fn run(mut self) -> AgentOutcome {
        self.log(EventKind::Info, "agent loop starting").await;

        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        messages.push(ChatMessage::user(self.job.goal.clone()));

        loop {
            if let Some(outcome) = self.check_suspension_points().await {
                return outcome;
            }

            match self.turn(&mut messages).await {
                Ok(ControlFlow::Continue) => continue,
                Ok(ControlFlow::Terminal(outcome)) => return outcome,
                Err(e) => {
                    tracing::error!(job_id = %self.job_id(), "agent loop error: {e:?}");
                    self.log(EventKind::Error, format!("internal error: {e}")).await;
                    return self.finalize(JobStatus::Failed, FailureReason::Internal.to_string()).await;
                }
            }
        }
    }

    /// Suspension point (3)/(4): cancel observation and deadline check.
    /// Called before every LLM call and before every tool call.
    async fn check_suspension_points(&mut self) -> Option<AgentOutcome> {
        if self.claim_lost.load(Ordering::Acquire) {
            return Some(AgentOutcome::ClaimLost);
        }

        if self.clock.now() >= self.deadline {
            self.log(EventKind::Info, "deadline reached").await;
            return Some(
                self.finalize_aborted(CancelReason::Deadline).await,
            );
        }

        match self.store.is_cancel_requested(self.job_id()).await {
            Ok(true) => {
                self.log(EventKind::Info, "cancellation observed").await;
                Some(self.finalize_aborted(CancelReason::UserCancel).await)
            }
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id(), "failed to poll cancel flag: {e}");
                None
            }
        }
    }

    async fn finalize_aborted(&mut self, reason: CancelReason) -> AgentOutcome {
        self.finalize(JobStatus::Aborted, FailureReason::Deadline(reason).to_string()).await
    }

    async fn finalize(&mut self, status: JobStatus, summary: impl Into<String>) -> AgentOutcome {
        let summary = summary.into();

        match self.store.finalize(self.job_id(), &self.worker_id, status, self.usage).await {
            Ok(true) => {
                self.log_finalize(status, &summary).await;
                AgentOutcome::Finalized(status)
            }
            Ok(false) => AgentOutcome::ClaimLost,
            Err(e) => {
                tracing::error!(job_id = %self.job_id(), "failed to finalize job: {e}");
                AgentOutcome::ClaimLost
            }
        }
    }

    /// The closing event must be the last event for the job; it is appended
    /// after the row transition commits, never before.
    async fn log_finalize(&self, status: JobStatus, summary: &str) {
        let event = NewEvent {
            job_id: self.job_id(),
            trace_id: self.job.trace_id,
            kind: if status == JobStatus::Succeeded { EventKind::Info } else { EventKind::Error },
            tool_name: None,
            summary: format!("job finalized as {status}: {summary}"),
            params: None,
            result: None,
            duration_ms: None,
            tokens_used: Some(self.usage.tokens_used),
            cost_cents: Some(self.usage.cost_used_cents),
        };

        if let Err(e) = self.store.append_event(&event).await {
            tracing::warn!(job_id = %self.job_id(), "failed to append closing event: {e}");
        }
    }

    /// One full turn of the protocol: assemble, call the LLM, handle its
    /// response.
    async fn turn(&mut self, messages: &mut Vec<ChatMessage>) -> anyhow::Result<ControlFlow> {
        let compressed = compress(messages, &self.compression);
        let tools = self.advertised_tools();

        let request = ChatRequest {
            messages: compressed,
            tools: tools.iter().map(|tool| tool_spec(tool.as_ref())).collect(),
            max_tokens: Some((self.job.caps.token_cap - self.usage.tokens_used).max(0)),
            temperature: None,
            stop_sequences: Vec::new(),
        };

        let response = match self.llm.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                self.log(EventKind::Error, format!("llm call failed: {e}")).await;
                return Ok(ControlFlow::Continue);
            }
        };

        self.usage.tokens_used += response.usage.total;
        self.usage.cost_used_cents += response.cost_cents;
        if self.usage.tokens_used > self.job.caps.token_cap {
            return Ok(ControlFlow::Terminal(
                self.finalize(JobStatus::Failed, FailureReason::TokenCapExhausted.to_string()).await,
            ));
        }
        if self.usage.cost_used_cents > self.job.caps.cost_cap_cents {
            return Ok(ControlFlow::Terminal(
                self.finalize(JobStatus::Failed, FailureReason::CostCapExhausted.to_string()).await,
            ));
        }

        if let Some(content) = &response.content {
            if !content.trim().is_empty() {
                messages.push(ChatMessage::assistant(content.clone()));
                self.log_turn(
                    self.phase.event_kind(),
                    summarize_text(content),
                    response.usage.total,
                    response.cost_cents,
                )
                .await;
            }
        }

        if response.tool_calls.is_empty() {
            self.phase = self.phase.advance();
            if response.finish_reason == FinishReason::Stop {
                // The model produced a plain response with no tool call and no
                // terminal tool. Nudge it back toward the protocol rather than
                // silently spinning.
                messages.push(ChatMessage::user(
                    "Continue working the goal, or call a terminal tool when done.",
                ));
            }
            return Ok(ControlFlow::Continue);
        }

        self.phase = Phase::Act;

        for call in response.tool_calls {
            if let Some(outcome) = self.check_suspension_points().await {
                return Ok(ControlFlow::Terminal(outcome));
            }

            if call.name == TOOL_CREATE_RESULT {
                return Ok(ControlFlow::Terminal(self.handle_create_result(&call.arguments).await));
            }

            if call.name == TOOL_REQUEST_HUMAN_REVIEW {
                return Ok(ControlFlow::Terminal(self.handle_human_review(&call.arguments).await));
            }

            let Some(tool) = tools.iter().find(|t| t.name() == call.name) else {
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    format!("unknown or unadvertised tool `{}`", call.name),
                ));
                continue;
            };

            if let Err(reason) = validate_arguments(&tool.parameter_schema(), &call.arguments) {
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    format!("rejected: {reason}"),
                ));
                self.log(EventKind::Error, format!("malformed tool call for `{}`: {reason}", tool.name())).await;
                continue;
            }

            if let Err(violation) = self.check_patch_limits(tool.as_ref(), &call.arguments) {
                messages.push(ChatMessage::tool_result(call.id.clone(), violation.clone()));
                self.log(EventKind::Error, format!("policy violation: {violation}")).await;
                continue;
            }

            let outcome = self.execute_tool(tool.as_ref(), &call.id, call.arguments.clone()).await;
            messages.push(ChatMessage::tool_result(call.id.clone(), render_tool_result(&outcome)));

            self.usage.steps_used += 1;
            if self.usage.steps_used >= self.job.caps.step_cap {
                return Ok(ControlFlow::Terminal(
                    self.finalize(JobStatus::Failed, FailureReason::StepCapExhausted.to_string()).await,
                ));
            }
        }

        Ok(ControlFlow::Continue)
    }

    fn check_patch_limits(&self, tool: &dyn Tool, arguments: &Value) -> Result<(), String> {
        if self.job.mode != JobMode::Mechanic {
            return Ok(());
        }

        let files = arguments.get("files").and_then(Value::as_array).map(Vec::len).unwrap_or(0) as u64;
        let added = arguments.get("lines_added").and_then(Value::as_u64).unwrap_or(0);
        let removed = arguments.get("lines_removed").and_then(Value::as_u64).unwrap_or(0);

        if files > MECHANIC_MAX_PATCH_FILES || added + removed > MECHANIC_MAX_PATCH_LINES {
            return Err(format!(
                "`{}` exceeds mechanic-mode patch limits (max {MECHANIC_MAX_PATCH_FILES} files, \
                 {MECHANIC_MAX_PATCH_LINES} changed lines)",
                tool.name()
            ));
        }

        Ok(())
    }

    async fn execute_tool(&self, tool: &dyn Tool, call_id: &str, arguments: Value) -> ToolOutcome {
        let logger: Arc<dyn EventLogger> = Arc::new(StoreEventLogger {
            store: self.store.clone(),
            job_id: self.job_id(),
            trace_id: self.job.trace_id,
        });

        let ctx = ToolContext {
            job_id: self.job_id(),
            trace_id: self.job.trace_id,
            repo_path: self.job.repo_path.clone(),
            mode: self.job.mode,
            budget: self.job.remaining(),
            logger,
            cancel: self.cancel.clone(),
        };

        let started = self.clock.now();
        let outcome = tool.execute(arguments.clone(), &ctx).await;
        let duration_ms = (self.clock.now() - started).num_milliseconds().max(0);

        let event = NewEvent {
            job_id: self.job_id(),
            trace_id: self.job.trace_id,
            kind: EventKind::ToolCall,
            tool_name: Some(tool.name().to_owned()),
            summary: format!("called `{}`", tool.name()),
            params: Some(redact(&arguments)),
            result: Some(summarize_outcome(&outcome)),
            duration_ms: Some(duration_ms),
            tokens_used: None,
            cost_cents: None,
        };

        if let Err(e) = self.store.append_event(&event).await {
            tracing::warn!(job_id = %self.job_id(), call_id, "failed to append tool_call event: {e}");
        }

        outcome
    }

    async fn handle_create_result(&mut self, arguments: &Value) -> AgentOutcome {
        let status = arguments.get("status").and_then(Value::as_str).unwrap_or("success");
        let summary = arguments
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("agent reported completion")
            .to_owned();

        let terminal = match status {
            "success" => JobStatus::Succeeded,
            "partial" => JobStatus::Failed,
            _ => JobStatus::Failed,
        };

        self.finalize(terminal, summary).await
    }

    async fn handle_human_review(&mut self, arguments: &Value) -> AgentOutcome {
        let reason = arguments
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("agent requested human review")
            .to_owned();

        self.log(EventKind::Escalation, reason).await;

        match self.store.mark_waiting_human(self.job_id(), &self.worker_id).await {
            Ok(true) => AgentOutcome::WaitingHuman,
            Ok(false) => AgentOutcome::ClaimLost,
            Err(e) => {
                tracing::error!(job_id = %self.job_id(), "failed to mark waiting_human: {e}");
                AgentOutcome::ClaimLost
            }
        }
    }
}

enum ControlFlow {
    Continue,
    Terminal(AgentOutcome),
}

/// Checks a tool call's arguments against the tool's declared JSON Schema
/// before it's executed: every required property must be present, and every
/// property present with a declared `type` must match it. This is not a full
/// schema validator (no `enum`/`minimum`/nested `$ref` support) — just enough
/// to catch a model omitting a required field or confusing types, which is
/// the failure mode that actually shows up in practice.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else { return Ok(()) };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if arguments.get(key).is_none() {
                return Err(format!("missing required parameter `{key}`"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in properties {
            let Some(value) = arguments.get(key) else { continue };
            let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else { continue };
            if !json_type_matches(value, expected) {
                return Err(format!("parameter `{key}` must be of type `{expected}`"));
            }
        }
    }

    Ok(())
}

fn json_type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Clamp assistant commentary before it goes into an `analysis`/`plan`/
/// `decision` event summary; the full text is still in the message history
/// that gets compressed separately.
fn summarize_text(text: &str) -> String {
    const MAX_CHARS: usize = 500;
    if text.chars().count() <= MAX_CHARS {
        return text.to_owned();
    }
    let truncated: String = text.chars().take(MAX_CHARS).collect();
    format!("{truncated}…")
}

fn tool_spec(tool: &dyn Tool) -> ToolSpec {
    let schema = tool.parameter_schema();
    let description = schema
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or(tool.name())
        .to_owned();

    ToolSpec {
        name: tool.name().to_owned(),
        description,
        parameters: schema,
    }
}

/// Redact tool call parameters before they're written to the ledger. Only a
/// conservative denylist is stripped; tool authors owning secrets in other
/// field names are responsible for their own redaction.
fn redact(params: &Value) -> Value {
    const SENSITIVE_KEYS: &[&str] = &["token", "password", "secret", "api_key", "authorization"];

    let mut params = params.clone();
    if let Value::Object(map) = &mut params {
        for key in SENSITIVE_KEYS {
            if map.contains_key(*key) {
                map.insert((*key).to_owned(), Value::String("[redacted]".to_owned()));
            }
        }
    }
    params
}

fn summarize_outcome(outcome: &ToolOutcome) -> Value {
    if outcome.success {
        outcome.data.clone().unwrap_or(Value::Null)
    } else {
        serde_json::json!({ "error": outcome.error })
    }
}

fn render_tool_result(outcome: &ToolOutcome) -> String {
    if outcome.success {
        outcome
            .data
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "ok".to_owned())
    } else {
        let error = outcome.error.as_ref();
        format!(
            "error: {}",
            error.map(|e| e.message.as_str()).unwrap_or("unknown tool failure")
        )
    }
}

struct StoreEventLogger {
    store: Arc<Store>,
    job_id: JobId,
    trace_id: Uuid,
}

#[async_trait::async_trait]
impl EventLogger for StoreEventLogger {
    async fn log_event(&self, kind: EventKind, summary: String, params: Option<Value>, result: Option<Value>) {
        let event = NewEvent {
            job_id: self.job_id,
            trace_id: self.trace_id,
            kind,
            tool_name: None,
            summary,
            params,
            result,
            duration_ms: None,
            tokens_used: None,
            cost_cents: None,
        };

        if let Err(e) = self.store.append_event(&event).await {
            tracing::warn!(job_id = %self.job_id, "tool-initiated log_event failed: {e}");
        }
    }
}
