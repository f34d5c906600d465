use serde_json::Value;
use task_core::{Event, EventId, EventKind, JobId, NewEvent};
use uuid::Uuid;

use super::Store;
use crate::error::StoreError;

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    job_id: i64,
    trace_id: Uuid,
    kind: EventKind,
    tool_name: Option<String>,
    summary: String,
    params: Option<Value>,
    result: Option<Value>,
    duration_ms: Option<i64>,
    tokens_used: Option<i64>,
    cost_cents: Option<i64>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: EventId(row.id),
            job_id: JobId(row.job_id),
            trace_id: row.trace_id,
            kind: row.kind,
            tool_name: row.tool_name,
            summary: row.summary,
            params: row.params,
            result: row.result,
            duration_ms: row.duration_ms,
            tokens_used: row.tokens_used,
            cost_cents: row.cost_cents,
            created_at: row.created_at,
        }
    }
}

const EVENT_COLUMNS: &str = "\
    id, job_id, trace_id, kind, tool_name, summary, \
    params, result, duration_ms, tokens_used, cost_cents, created_at";

impl Store {
    /// *appendEvent(event).* Inserts the row and, in the same transaction,
    /// notifies `dashboard_events` so the bus can fan the change out. Not
    /// idempotent: a caller that must retry a failed append is responsible
    /// for generating its own de-duplication key (none is enforced here).
    pub async fn append_event(&self, event: &NewEvent) -> Result<EventId, StoreError> {
        let mut tx = self.pool.begin().await?;

        let id = append_event_in(
            &mut tx,
            event.job_id,
            event.trace_id,
            event.kind,
            event.tool_name.clone(),
            event.summary.clone(),
            event.params.clone(),
            event.result.clone(),
            event.duration_ms,
            event.tokens_used,
            event.cost_cents,
        )
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// *listEvents(jobId, afterId?)* — events are totally ordered per job by
    /// `(created_at, id)`.
    pub async fn list_events(
        &self,
        job_id: JobId,
        after_id: Option<EventId>,
        limit: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let query = format!(
            "SELECT {EVENT_COLUMNS}
               FROM events
              WHERE job_id = $1 AND ($2::bigint IS NULL OR id > $2)
              ORDER BY created_at ASC, id ASC
              LIMIT $3"
        );

        let rows: Vec<EventRow> = sqlx::query_as(&query)
            .bind(job_id.0)
            .bind(after_id.map(|id| id.0))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Event::from).collect())
    }

    /// Last `n` events for a job, oldest first — used by the stream gateway's
    /// snapshot.
    pub async fn tail_events(&self, job_id: JobId, n: i64) -> Result<Vec<Event>, StoreError> {
        let query = format!(
            "SELECT {EVENT_COLUMNS}
               FROM (
                   SELECT * FROM events
                    WHERE job_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
               ) recent
              ORDER BY created_at ASC, id ASC"
        );

        let rows: Vec<EventRow> = sqlx::query_as(&query)
            .bind(job_id.0)
            .bind(n)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Event::from).collect())
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn append_event_in(
    tx: &mut sqlx::PgConnection,
    job_id: JobId,
    trace_id: Uuid,
    kind: EventKind,
    tool_name: Option<String>,
    summary: String,
    params: Option<Value>,
    result: Option<Value>,
    duration_ms: Option<i64>,
    tokens_used: Option<i64>,
    cost_cents: Option<i64>,
) -> Result<EventId, StoreError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO events (
            job_id, trace_id, kind, tool_name, summary, params, result,
            duration_ms, tokens_used, cost_cents
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id",
    )
    .bind(job_id.0)
    .bind(trace_id)
    .bind(kind)
    .bind(tool_name)
    .bind(summary.clone())
    .bind(params)
    .bind(result)
    .bind(duration_ms)
    .bind(tokens_used)
    .bind(cost_cents)
    .fetch_one(&mut *tx)
    .await?;

    let conversation_id: Option<i64> =
        sqlx::query_scalar("SELECT conversation_id FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .flatten();

    notify(tx, job_id, conversation_id, &kind, &summary).await?;

    Ok(EventId(id))
}

async fn notify(
    conn: &mut sqlx::PgConnection,
    job_id: JobId,
    conversation_id: Option<i64>,
    kind: &EventKind,
    summary: &str,
) -> Result<(), StoreError> {
    let payload = serde_json::json!({
        "job_id": job_id.0,
        "conversation_id": conversation_id,
        "type": "event",
        "data": { "kind": kind.to_string(), "summary": summary },
    });

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(crate::event::CHANNEL)
        .bind(payload.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}
