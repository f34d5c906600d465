use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity of a job row.
///
/// Jobs are identified by an opaque, monotonically increasing id assigned by
/// the ledger store on insert.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution mode. Controls default budgets and which tools are advertised to
/// the agent loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "job_mode", rename_all = "snake_case")]
pub enum JobMode {
    /// Tight caps, only `safe`/`reversible` tools, small patch limits.
    Mechanic,
    /// Large caps, the full tool catalog, no patch limits.
    Genius,
}

impl JobMode {
    /// Default budget caps assigned by [`insertJob`](crate::job::JobSpec) when
    /// the caller does not override them.
    pub const fn default_caps(self) -> BudgetCaps {
        match self {
            JobMode::Mechanic => BudgetCaps {
                step_cap: 20,
                token_cap: 50_000,
                cost_cap_cents: 100,
                time_cap_s: 900,
            },
            JobMode::Genius => BudgetCaps {
                step_cap: 100,
                token_cap: 200_000,
                cost_cap_cents: 500,
                time_cap_s: 3_600,
            },
        }
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobMode::Mechanic => "mechanic",
            JobMode::Genius => "genius",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobMode {
    type Err = InvalidJobMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mechanic" => Ok(JobMode::Mechanic),
            "genius" => Ok(JobMode::Genius),
            _ => Err(InvalidJobMode(s.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job mode `{0}`, expected `mechanic` or `genius`")]
pub struct InvalidJobMode(pub String);

/// Lifecycle status of a job.
///
/// See the invariants in the data model: `assigned_to` and
/// `last_heartbeat_at` are set iff status is one of `Running`, `Cancelling`,
/// or `WaitingHuman`; `finished_at` is set iff status is terminal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    WaitingHuman,
    Succeeded,
    Failed,
    Aborted,
    Cancelling,
}

impl JobStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Aborted)
    }

    pub const fn holds_claim(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Cancelling | JobStatus::WaitingHuman)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::WaitingHuman => "waiting_human",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
            JobStatus::Cancelling => "cancelling",
        };
        f.write_str(s)
    }
}

/// The per-mode resource caps a job is bound by.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BudgetCaps {
    pub step_cap: i32,
    pub token_cap: i64,
    pub cost_cap_cents: i64,
    pub time_cap_s: i64,
}

/// Resource consumption recorded against a job's caps so far.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BudgetUsage {
    pub steps_used: i32,
    pub tokens_used: i64,
    pub cost_used_cents: i64,
}

/// A fully durable job row as read back from the ledger store.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub goal: String,
    pub mode: JobMode,
    pub agent_kind: String,
    pub repo_path: String,
    pub conversation_id: Option<i64>,
    pub status: JobStatus,
    pub caps: BudgetCaps,
    pub usage: BudgetUsage,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub creator: Option<String>,
    pub trace_id: Uuid,
}

impl Job {
    /// Remaining step/token budget available for the current turn.
    pub fn remaining(&self) -> BudgetRemaining {
        BudgetRemaining {
            steps_remaining: (self.caps.step_cap - self.usage.steps_used).max(0),
            tokens_remaining: (self.caps.token_cap - self.usage.tokens_used).max(0),
        }
    }
}

/// What the agent loop is allowed to spend this turn; handed to tools via
/// [`crate::tool::ToolContext`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BudgetRemaining {
    pub steps_remaining: i32,
    pub tokens_remaining: i64,
}

/// Parameters for submitting a new job.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub goal: String,
    pub mode: JobMode,
    pub agent_kind: String,
    pub repo_path: String,
    pub conversation_id: Option<i64>,
    pub priority: i32,
    pub caps: Option<BudgetCaps>,
    pub creator: Option<String>,
}

impl JobSpec {
    pub fn new(goal: impl Into<String>, repo_path: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            mode: JobMode::Mechanic,
            agent_kind: "default".to_owned(),
            repo_path: repo_path.into(),
            conversation_id: None,
            priority: 0,
            caps: None,
            creator: None,
        }
    }

    pub fn resolved_caps(&self) -> BudgetCaps {
        self.caps.unwrap_or_else(|| self.mode.default_caps())
    }
}

/// Why a terminal (`aborted`/`cancelling`) transition happened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CancelReason {
    UserCancel,
    Deadline,
    WorkerDrain,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancelReason::UserCancel => "user_cancel",
            CancelReason::Deadline => "deadline",
            CancelReason::WorkerDrain => "worker_drain",
        };
        f.write_str(s)
    }
}

/// Why a job finished, carried in the closing event's summary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureReason {
    StepCapExhausted,
    TokenCapExhausted,
    CostCapExhausted,
    Deadline(CancelReason),
    Internal,
    PolicyViolation(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::StepCapExhausted => f.write_str("step_cap_exhausted"),
            FailureReason::TokenCapExhausted => f.write_str("token_cap_exhausted"),
            FailureReason::CostCapExhausted => f.write_str("cost_cap_exhausted"),
            FailureReason::Deadline(reason) => write!(f, "{reason}"),
            FailureReason::Internal => f.write_str("internal"),
            FailureReason::PolicyViolation(msg) => write!(f, "policy_violation: {msg}"),
        }
    }
}
