use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::job::JobId;

/// Identity of an event row. Events are totally ordered per job by
/// `(created_at, id)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct EventId(pub i64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "event_kind", rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Analysis,
    Plan,
    ToolCall,
    Decision,
    Escalation,
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Info => "info",
            EventKind::Analysis => "analysis",
            EventKind::Plan => "plan",
            EventKind::ToolCall => "tool_call",
            EventKind::Decision => "decision",
            EventKind::Escalation => "escalation",
            EventKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// A single append-only ledger entry.
///
/// Callers must generate [`EventId`]-free drafts via [`NewEvent`] and let the
/// store assign `id`/`created_at`; `appendEvent` itself is not idempotent, so
/// retries of a failed append are the caller's responsibility.
#[derive(Clone, Debug)]
pub struct Event {
    pub id: EventId,
    pub job_id: JobId,
    pub trace_id: Uuid,
    pub kind: EventKind,
    pub tool_name: Option<String>,
    pub summary: String,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub duration_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub cost_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A not-yet-persisted event, as produced by the agent loop.
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub job_id: JobId,
    pub trace_id: Uuid,
    pub kind: EventKind,
    pub tool_name: Option<String>,
    pub summary: String,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub duration_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub cost_cents: Option<i64>,
}

impl NewEvent {
    pub fn info(job_id: JobId, trace_id: Uuid, summary: impl Into<String>) -> Self {
        Self {
            job_id,
            trace_id,
            kind: EventKind::Info,
            tool_name: None,
            summary: summary.into(),
            params: None,
            result: None,
            duration_ms: None,
            tokens_used: None,
            cost_cents: None,
        }
    }

    pub fn error(job_id: JobId, trace_id: Uuid, summary: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            ..Self::info(job_id, trace_id, summary)
        }
    }
}

/// The payload the ledger store publishes on the `dashboard_events` change
/// channel every time `appendEvent` commits.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EventNotification {
    pub job_id: i64,
    pub conversation_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub data: Value,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Event,
    Status,
}
