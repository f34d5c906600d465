//! Thin client for submitting, querying, and streaming jobs on the job
//! substrate, for use by submitters and dashboards that live in a different
//! process than the worker pool.
//!
//! A client owns its own notification listener: unlike a worker, it cannot
//! share the in-process event bus of whatever process happens to be running
//! the worker pool, so `TaskClient::connect` opens its own `LISTEN`
//! connection and bridges it into a private `EventBus`.

mod error;

pub use self::error::ClientError;
pub use task_runtime::{BusMessage, GatewayError, JobSnapshot, StreamItem, Topic};

use std::sync::Arc;

use task_core::{BudgetCaps, Job, JobId, JobSpec, JobStatus};
use task_runtime::{Config, Event, EventBus, EventSource, Gateway, PgEventSource, Store};
use tokio::sync::mpsc;

/// A handle to the job substrate. Cheap to clone; clones share the same
/// store connection pool, event bridge, and gateway.
#[derive(Clone)]
pub struct TaskClient {
    store: Arc<Store>,
    gateway: Gateway,
    config: Config,
}

impl TaskClient {
    /// Connect with default configuration.
    pub async fn connect(pool: sqlx::PgPool) -> Result<Self, ClientError> {
        Self::with_config(pool, Config::default()).await
    }

    pub async fn with_config(pool: sqlx::PgPool, config: Config) -> Result<Self, ClientError> {
        let store = Arc::new(Store::new(pool.clone()));
        let bus = Arc::new(EventBus::new());
        let event_source = PgEventSource::new(&pool).await?;
        spawn_bridge(event_source, bus.clone());

        let gateway = Gateway::new(store.clone(), bus, config.clone());

        Ok(Self { store, gateway, config })
    }

    /// *insertJob(spec) → id.*
    pub async fn submit(&self, spec: &JobSpec) -> Result<JobId, ClientError> {
        let default_caps = self.config.default_caps(spec.mode);
        Ok(self.store.insert_job(spec, default_caps).await?)
    }

    /// *insertJob(spec) → id*, with an explicit cap override instead of the
    /// mode's default.
    pub async fn submit_with_caps(
        &self,
        spec: &JobSpec,
        caps: BudgetCaps,
    ) -> Result<JobId, ClientError> {
        Ok(self.store.insert_job(spec, caps).await?)
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>, ClientError> {
        Ok(self.store.get_job(job_id).await?)
    }

    pub async fn list(
        &self,
        status: Option<JobStatus>,
        conversation_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, ClientError> {
        Ok(self
            .store
            .list_jobs(status, conversation_id, limit, offset)
            .await?)
    }

    /// *requestCancel(jobId).* Idempotent; safe to call on a job that has
    /// already finished.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), ClientError> {
        Ok(self.store.request_cancel(job_id).await?)
    }

    /// Current row plus the last `gateway_snapshot_events` events.
    pub async fn snapshot(&self, job_id: JobId) -> Result<JobSnapshot, ClientError> {
        Ok(self.gateway.snapshot(job_id).await?)
    }

    /// Subscribe to a job's live stream: an initial snapshot, then events,
    /// heartbeats, and periodic resyncs until the job reaches a terminal
    /// status. Dropping the receiver tears the subscription down.
    pub fn stream(&self, job_id: JobId) -> mpsc::Receiver<Result<StreamItem, GatewayError>> {
        self.gateway.subscribe(job_id)
    }
}

/// Forwards notifications from a client's own `PgEventSource` into its
/// private bus for as long as the listener connection stays up. Gateway
/// subscriptions resync from a fresh snapshot on their own schedule, so a
/// dead bridge only costs subscribers some staleness, not correctness.
fn spawn_bridge(mut event_source: PgEventSource, bus: Arc<EventBus>) {
    tokio::spawn(async move {
        loop {
            match event_source.next().await {
                Ok(Event::Notification(notification)) => bus.publish(notification),
                Ok(Event::Lagged) => {
                    tracing::debug!("client event source lagged; resync on next gateway tick")
                }
                Err(e) => {
                    tracing::warn!("client event bridge failed, stopping: {e}");
                    return;
                }
            }
        }
    });
}
