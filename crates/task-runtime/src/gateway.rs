//! Stream Gateway: the read surface dashboards and CLIs subscribe to.
//!
//! Subscribing to a job yields a snapshot (current row + last N events) and
//! then a live tail built from the event bus, interleaved with periodic
//! heartbeats and resync snapshots. This is the only component in the
//! runtime that fans an in-process subscription out to potentially many
//! external callers; it holds no state of its own beyond the subscription.

use std::sync::Arc;

use task_core::{Event, EventNotification, Job, JobId};
use tokio::sync::mpsc;

use crate::bus::{BusMessage, EventBus};
use crate::config::Config;
use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {0} does not exist")]
    NotFound(JobId),
}

/// The current job row plus its most recent events, in ascending order.
#[derive(Clone, Debug)]
pub struct JobSnapshot {
    pub job: Job,
    pub events: Vec<Event>,
}

/// One record on a live job stream. Mirrors the external stream's record
/// types one-to-one; a transport layer (SSE, websocket, ...) maps each
/// variant onto its own wire event.
#[derive(Clone, Debug)]
pub enum StreamItem {
    Snapshot(JobSnapshot),
    Event(EventNotification),
    Heartbeat,
}

#[derive(Clone)]
pub struct Gateway {
    store: Arc<Store>,
    bus: Arc<EventBus>,
    config: Config,
}

impl Gateway {
    pub fn new(store: Arc<Store>, bus: Arc<EventBus>, config: Config) -> Self {
        Self { store, bus, config }
    }

    pub async fn snapshot(&self, job_id: JobId) -> Result<JobSnapshot, GatewayError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(GatewayError::NotFound(job_id))?;
        let events = self
            .store
            .tail_events(job_id, self.config.gateway_snapshot_events)
            .await?;
        Ok(JobSnapshot { job, events })
    }

    /// Subscribe to a job's live stream.
    ///
    /// The first item is always a `Snapshot`. After that, appended events are
    /// forwarded as `Event`s, interleaved with `Heartbeat`s every
    /// `gateway_heartbeat_interval` and resync `Snapshot`s every
    /// `gateway_resync_interval`. The channel closes once the job reaches a
    /// terminal status and that status has been observed, or once the
    /// receiver is dropped — dropping the receiver is the only cleanup a
    /// caller needs to do; the subscription and its timers are torn down with
    /// the background task.
    pub fn subscribe(&self, job_id: JobId) -> mpsc::Receiver<Result<StreamItem, GatewayError>> {
        let (tx, rx) = mpsc::channel(64);
        let gateway = self.clone();

        tokio::spawn(async move {
            gateway.run_subscription(job_id, tx).await;
        });

        rx
    }

    async fn run_subscription(
        &self,
        job_id: JobId,
        tx: mpsc::Sender<Result<StreamItem, GatewayError>>,
    ) {
        let snapshot = match self.snapshot(job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let mut terminal = snapshot.job.status.is_terminal();
        if tx.send(Ok(StreamItem::Snapshot(snapshot))).await.is_err() || terminal {
            return;
        }

        let mut subscription = self.bus.subscribe_job(job_id);
        let mut heartbeat = tokio::time::interval(self.config.gateway_heartbeat_interval);
        let mut resync = tokio::time::interval(self.config.gateway_resync_interval);
        heartbeat.tick().await;
        resync.tick().await;

        while !terminal {
            tokio::select! {
                biased;

                _ = tx.closed() => return,

                message = subscription.recv() => {
                    let item = match message {
                        Some(BusMessage::Event(notification)) => {
                            terminal = self.is_terminal(job_id).await;
                            Ok(StreamItem::Event(notification))
                        }
                        Some(BusMessage::Lagged) | None => self.resync(job_id, &mut terminal).await,
                    };

                    if tx.send(item).await.is_err() { return; }
                }

                _ = heartbeat.tick() => {
                    if tx.send(Ok(StreamItem::Heartbeat)).await.is_err() { return; }
                }

                _ = resync.tick() => {
                    let item = self.resync(job_id, &mut terminal).await;
                    if tx.send(item).await.is_err() { return; }
                }
            }
        }
    }

    async fn resync(&self, job_id: JobId, terminal: &mut bool) -> Result<StreamItem, GatewayError> {
        let snapshot = self.snapshot(job_id).await?;
        *terminal = snapshot.job.status.is_terminal();
        Ok(StreamItem::Snapshot(snapshot))
    }

    async fn is_terminal(&self, job_id: JobId) -> bool {
        matches!(self.store.get_job(job_id).await, Ok(Some(job)) if job.status.is_terminal())
    }
}
