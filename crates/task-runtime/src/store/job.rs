use chrono::Utc;
use sqlx::Row;
use task_core::{BudgetCaps, BudgetUsage, Job, JobId, JobMode, JobSpec, JobStatus};
use uuid::Uuid;

use super::Store;
use crate::error::StoreError;
use crate::util::IntoPgInterval;

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    goal: String,
    mode: JobMode,
    agent_kind: String,
    repo_path: String,
    conversation_id: Option<i64>,
    status: JobStatus,
    step_cap: i32,
    token_cap: i64,
    cost_cap_cents: i64,
    time_cap_s: i64,
    steps_used: i32,
    tokens_used: i64,
    cost_used_cents: i64,
    priority: i32,
    created_at: chrono::DateTime<Utc>,
    started_at: Option<chrono::DateTime<Utc>>,
    finished_at: Option<chrono::DateTime<Utc>>,
    assigned_to: Option<String>,
    last_heartbeat_at: Option<chrono::DateTime<Utc>>,
    cancel_requested: bool,
    creator: Option<String>,
    trace_id: Uuid,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId(row.id),
            goal: row.goal,
            mode: row.mode,
            agent_kind: row.agent_kind,
            repo_path: row.repo_path,
            conversation_id: row.conversation_id,
            status: row.status,
            caps: BudgetCaps {
                step_cap: row.step_cap,
                token_cap: row.token_cap,
                cost_cap_cents: row.cost_cap_cents,
                time_cap_s: row.time_cap_s,
            },
            usage: BudgetUsage {
                steps_used: row.steps_used,
                tokens_used: row.tokens_used,
                cost_used_cents: row.cost_used_cents,
            },
            priority: row.priority,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            assigned_to: row.assigned_to,
            last_heartbeat_at: row.last_heartbeat_at,
            cancel_requested: row.cancel_requested,
            creator: row.creator,
            trace_id: row.trace_id,
        }
    }
}

const JOB_COLUMNS: &str = "\
    id, goal, mode, agent_kind, repo_path, conversation_id, \
    status, step_cap, token_cap, cost_cap_cents, time_cap_s, \
    steps_used, tokens_used, cost_used_cents, priority, created_at, started_at, \
    finished_at, assigned_to, last_heartbeat_at, cancel_requested, creator, trace_id";

/// Which jobs a worker is willing to claim. `mechanic`-only workers must
/// never claim `genius` jobs.
#[derive(Copy, Clone, Debug)]
pub enum ClaimFilter {
    Any,
    ModeOnly(JobMode),
}

impl Store {
    /// *insertJob(spec) → id.* Fails only on constraint violation.
    pub async fn insert_job(
        &self,
        spec: &JobSpec,
        default_caps: BudgetCaps,
    ) -> Result<JobId, StoreError> {
        let caps = spec.caps.unwrap_or(default_caps);
        let trace_id = Uuid::new_v4();

        let query = format!(
            "INSERT INTO jobs (
                goal, mode, agent_kind, repo_path, conversation_id,
                step_cap, token_cap, cost_cap_cents, time_cap_s,
                priority, creator, trace_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {JOB_COLUMNS}"
        );

        let row: JobRow = sqlx::query_as(&query)
            .bind(&spec.goal)
            .bind(spec.mode)
            .bind(&spec.agent_kind)
            .bind(&spec.repo_path)
            .bind(spec.conversation_id)
            .bind(caps.step_cap)
            .bind(caps.token_cap)
            .bind(caps.cost_cap_cents)
            .bind(caps.time_cap_s)
            .bind(spec.priority)
            .bind(&spec.creator)
            .bind(trace_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(JobId(row.id))
    }

    /// *claimNext(workerId, modeFilter?) → job | null.*
    ///
    /// The `FOR UPDATE SKIP LOCKED` CTE is the central concurrency primitive:
    /// it takes a row lock before returning a candidate and excludes rows
    /// already locked by a concurrent claim, so two workers racing this query
    /// never end up with the same job.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        filter: ClaimFilter,
    ) -> Result<Option<Job>, StoreError> {
        let query = format!(
            "WITH candidate AS (
                SELECT id FROM jobs
                WHERE status = 'queued'
                  AND ($1::job_mode IS NULL OR mode = $1)
                ORDER BY priority DESC, created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE jobs
               SET status = 'running',
                   assigned_to = $2,
                   started_at = now(),
                   last_heartbeat_at = now()
              FROM candidate
             WHERE jobs.id = candidate.id
            RETURNING {JOB_COLUMNS}"
        );

        let mode_filter = match filter {
            ClaimFilter::Any => None,
            ClaimFilter::ModeOnly(mode) => Some(mode),
        };

        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(mode_filter)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Job::from))
    }

    /// *heartbeat(jobId, workerId) → ok.* A `false` return means the claim is
    /// gone and the caller must abandon the job without finalizing it.
    pub async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs
                SET last_heartbeat_at = now()
              WHERE id = $1
                AND assigned_to = $2
                AND status IN ('running', 'cancelling')",
        )
        .bind(job_id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// *requestCancel(jobId).* Idempotent.
    pub async fn request_cancel(&self, job_id: JobId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE jobs SET cancel_requested = true WHERE id = $1")
            .bind(job_id.0)
            .execute(&mut *tx)
            .await?;

        let aborted = sqlx::query(
            "UPDATE jobs
                SET status = 'aborted', finished_at = now()
              WHERE id = $1 AND status = 'queued'
            RETURNING id",
        )
        .bind(job_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        if aborted.is_some() {
            append_event_tx(
                &mut tx,
                job_id,
                Uuid::nil(),
                task_core::EventKind::Info,
                None,
                "job cancelled before it was ever claimed".to_owned(),
                None,
                None,
                None,
                None,
                None,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// *requeueStale(thresholdMs) → count.* Idempotent; races between
    /// concurrent sweepers are harmless because the predicate only matches
    /// rows that are actually still stale.
    pub async fn requeue_stale(&self, threshold: std::time::Duration) -> Result<u64, StoreError> {
        let threshold = threshold.into_pg_interval();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "UPDATE jobs
                SET status = 'queued',
                    assigned_to = NULL,
                    started_at = NULL,
                    last_heartbeat_at = NULL
              WHERE status IN ('running', 'cancelling')
                AND now() - last_heartbeat_at > $1
            RETURNING id, trace_id",
        )
        .bind(threshold)
        .try_map(|row: sqlx::postgres::PgRow| {
            let id: i64 = row.try_get("id")?;
            let trace_id: Uuid = row.try_get("trace_id")?;
            Ok((id, trace_id))
        })
        .fetch_all(&mut *tx)
        .await?;

        for (id, trace_id) in &rows {
            append_event_tx(
                &mut tx,
                JobId(*id),
                *trace_id,
                task_core::EventKind::Info,
                None,
                "worker lost, requeued".to_owned(),
                None,
                None,
                None,
                None,
                None,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    /// *finalize(jobId, workerId, terminalStatus, usage).* Requires that
    /// `workerId` still owns the claim.
    pub async fn finalize(
        &self,
        job_id: JobId,
        worker_id: &str,
        terminal_status: JobStatus,
        usage: BudgetUsage,
    ) -> Result<bool, StoreError> {
        debug_assert!(terminal_status.is_terminal());

        let result = sqlx::query(
            "UPDATE jobs
                SET status = $3,
                    finished_at = now(),
                    steps_used = $4,
                    tokens_used = $5,
                    cost_used_cents = $6
              WHERE id = $1 AND assigned_to = $2",
        )
        .bind(job_id.0)
        .bind(worker_id)
        .bind(terminal_status)
        .bind(usage.steps_used)
        .bind(usage.tokens_used)
        .bind(usage.cost_used_cents)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition a job to `waiting_human` without releasing the claim; used
    /// when `request_human_review` fires.
    pub async fn mark_waiting_human(&self, job_id: JobId, worker_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs
                SET status = 'waiting_human'
              WHERE id = $1 AND assigned_to = $2 AND status = 'running'",
        )
        .bind(job_id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cheap poll used by the agent loop at each suspension point; avoids
    /// pulling the whole row just to check one flag.
    pub async fn is_cancel_requested(&self, job_id: JobId) -> Result<bool, StoreError> {
        let flag: Option<bool> = sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(flag.unwrap_or(false))
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Job::from))
    }

    /// *listJobs(filter)* — filters by status and/or conversation id, newest
    /// first, paginated.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        conversation_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
              WHERE ($1::job_status IS NULL OR status = $1)
                AND ($2::bigint IS NULL OR conversation_id = $2)
              ORDER BY created_at DESC
              LIMIT $3 OFFSET $4"
        );

        let rows: Vec<JobRow> = sqlx::query_as(&query)
            .bind(status)
            .bind(conversation_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }
}

/// Shared by `requestCancel` and `requeueStale`, both of which append a
/// system event inside the same transaction as their row mutation.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn append_event_tx(
    tx: &mut sqlx::PgConnection,
    job_id: JobId,
    trace_id: Uuid,
    kind: task_core::EventKind,
    tool_name: Option<String>,
    summary: String,
    params: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
    duration_ms: Option<i64>,
    tokens_used: Option<i64>,
    cost_cents: Option<i64>,
) -> Result<(), StoreError> {
    crate::store::event::append_event_in(
        tx, job_id, trace_id, kind, tool_name, summary, params, result, duration_ms, tokens_used,
        cost_cents,
    )
    .await
}
