use async_trait::async_trait;
use serde_json::{json, Value};
use task_core::tool::{RiskHint, Tool, ToolCategory, ToolContext, ToolError, ToolOutcome};

/// Echoes its `text` argument back as `data.echo`. Safe, read-only, always
/// succeeds; used to exercise the turn loop without caring what the tool
/// actually does.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn risk_hint(&self) -> RiskHint {
        RiskHint::Safe
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
        })
    }

    fn result_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "echo": { "type": "string" } },
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolOutcome {
        let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
        ToolOutcome::ok(json!({ "echo": text }))
    }
}

/// Fails its first `failures_before_success` calls with a recoverable error,
/// then succeeds. Used to exercise a tool-error turn that doesn't terminate
/// the job.
pub struct FlakyTool {
    failures_before_success: u32,
    calls: std::sync::atomic::AtomicU32,
}

impl FlakyTool {
    pub fn new(failures_before_success: u32) -> Self {
        Self { failures_before_success, calls: std::sync::atomic::AtomicU32::new(0) }
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutating
    }

    fn risk_hint(&self) -> RiskHint {
        RiskHint::Reversible
    }

    fn parameter_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn result_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "attempt": { "type": "integer" } } })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolOutcome {
        let attempt = self.calls.fetch_add(1, std::sync::atomic::Ordering::AcqRel) + 1;

        if attempt <= self.failures_before_success {
            ToolOutcome::err(ToolError {
                code: "transient".to_owned(),
                message: format!("attempt {attempt} failed"),
                recoverable: true,
            })
        } else {
            ToolOutcome::ok(json!({ "attempt": attempt }))
        }
    }
}
