//! The tool contract consumed by the agent loop.
//!
//! Tool *implementations* (file I/O, patching, git, repo cloning, external
//! API auth) are external collaborators; this module only defines the
//! boundary they must honor.

use async_trait::async_trait;
use serde_json::Value;

use crate::job::{BudgetRemaining, JobId, JobMode};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ToolCategory {
    ReadOnly,
    Mutating,
    Meta,
}

/// How risky a tool is to run unsupervised. `mechanic` mode only advertises
/// tools whose hint is `Safe` or `Reversible`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum RiskHint {
    Safe,
    Reversible,
    Destructive,
}

impl RiskHint {
    /// Whether a tool with this hint may be advertised in `mechanic` mode.
    pub const fn allowed_in_mechanic(self) -> bool {
        matches!(self, RiskHint::Safe | RiskHint::Reversible)
    }
}

/// A recoverable, structured failure record returned by a tool.
///
/// Tools never throw across the loop boundary (see the error handling
/// design): every failure, from a malformed argument to an I/O flake, comes
/// back through this type instead of a panic or a propagated `Result::Err`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

/// The outcome of a single tool invocation.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<ToolError>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: ToolError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Cooperative cancellation signal handed to every tool invocation.
///
/// Tools must poll this (or race it against their own I/O) at every I/O
/// boundary; the agent loop only observes cancellation between turns, so a
/// tool that ignores this signal can run past its job's deadline.
#[derive(Clone)]
pub struct CancelSignal(std::sync::Arc<CancelSignalState>);

struct CancelSignalState {
    flag: std::sync::atomic::AtomicBool,
    notify: tokio::sync::Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self(std::sync::Arc::new(CancelSignalState {
            flag: std::sync::atomic::AtomicBool::new(false),
            notify: tokio::sync::Notify::new(),
        }))
    }

    pub fn cancel(&self) {
        self.0.flag.store(true, std::sync::atomic::Ordering::Release);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.flag.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }

        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }

        notified.await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback a tool uses to record ledger events for its own sub-steps
/// (for example, a multi-file patch tool logging one event per file).
#[async_trait]
pub trait EventLogger: Send + Sync {
    async fn log_event(
        &self,
        kind: crate::event::EventKind,
        summary: String,
        params: Option<Value>,
        result: Option<Value>,
    );
}

/// Everything a tool needs to execute besides its own parameters.
pub struct ToolContext {
    pub job_id: JobId,
    pub trace_id: uuid::Uuid,
    pub repo_path: String,
    pub mode: JobMode,
    pub budget: BudgetRemaining,
    pub logger: std::sync::Arc<dyn EventLogger>,
    pub cancel: CancelSignal,
}

impl ToolContext {
    pub async fn log_event(
        &self,
        kind: crate::event::EventKind,
        summary: impl Into<String>,
        params: Option<Value>,
        result: Option<Value>,
    ) {
        self.logger.log_event(kind, summary.into(), params, result).await;
    }
}

/// A tool advertised to the LLM and invocable by the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> ToolCategory;
    fn risk_hint(&self) -> RiskHint;

    /// Rough relative cost, used only for display/sorting; not billed.
    fn cost_hint(&self) -> u32 {
        1
    }

    fn parameter_schema(&self) -> Value;
    fn result_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome;
}
