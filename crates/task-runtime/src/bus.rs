//! In-process publish/subscribe layer.
//!
//! Every `appendEvent` commit on the ledger store is mirrored here by the
//! worker's [`crate::event::PgEventSource`] listener, so in-process and
//! cross-process subscribers see the same stream without the store having to
//! know about either. A slow subscriber only drops its own backlog (oldest
//! first) instead of blocking the publisher; an `overflow` counter is bumped
//! via the `metrics` crate whenever that happens.
//!
//! Per-job order is preserved because publication happens from the single
//! `process_events` task in arrival order; no ordering is promised across
//! jobs.

use std::collections::HashMap;

use parking_lot::Mutex;
use task_core::{EventNotification, JobId};
use tokio::sync::broadcast;

/// Global, non-job-scoped topics a subscriber can also listen to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Topic {
    Metrics,
    Jobs,
    Insights,
    Alerts,
    Health,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Metrics,
        Topic::Jobs,
        Topic::Insights,
        Topic::Alerts,
        Topic::Health,
    ];
}

const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

#[derive(Clone, Debug)]
pub enum BusMessage {
    Event(EventNotification),
    /// Raised when a subscriber's queue overflowed and events were dropped;
    /// the gateway treats this the same as a `Lagged` cross-process event.
    Lagged,
}

struct JobChannel {
    sender: broadcast::Sender<BusMessage>,
}

/// The in-process event bus. Cheaply cloneable; every clone shares the same
/// subscriber tables.
#[derive(Clone)]
pub struct EventBus {
    jobs: std::sync::Arc<Mutex<HashMap<JobId, JobChannel>>>,
    topics: std::sync::Arc<HashMap<Topic, broadcast::Sender<BusMessage>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let topics = Topic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(SUBSCRIBER_QUEUE_DEPTH).0))
            .collect();

        Self {
            jobs: std::sync::Arc::new(Mutex::new(HashMap::new())),
            topics: std::sync::Arc::new(topics),
        }
    }

    /// Publish a notification to its job's channel, creating the channel on
    /// first use. Channels for jobs with no subscribers are cheap (just a
    /// sender with no receivers) and are reaped lazily: once every sender's
    /// broadcast handle drops, the channel is useless but harmless to keep,
    /// so we leave cleanup to process lifetime rather than adding a GC pass.
    pub fn publish(&self, notification: EventNotification) {
        let job_id = JobId(notification.job_id);

        let sender = {
            let mut jobs = self.jobs.lock();
            jobs.entry(job_id)
                .or_insert_with(|| JobChannel {
                    sender: broadcast::channel(SUBSCRIBER_QUEUE_DEPTH).0,
                })
                .sender
                .clone()
        };

        // A broadcast send only fails when there are no receivers, which is a
        // normal and expected state (nobody is watching this job right now).
        let _ = sender.send(BusMessage::Event(notification.clone()));

        if let Some(topic) = self.topics.get(&Topic::Jobs) {
            let _ = topic.send(BusMessage::Event(notification));
        }
    }

    /// Tell every subscriber of `job_id` that a gap may have occurred and
    /// they should resync from a fresh snapshot.
    pub fn publish_lagged(&self, job_id: JobId) {
        let sender = self.jobs.lock().get(&job_id).map(|c| c.sender.clone());
        if let Some(sender) = sender {
            let _ = sender.send(BusMessage::Lagged);
        }
    }

    pub fn subscribe_job(&self, job_id: JobId) -> BusSubscription {
        let sender = {
            let mut jobs = self.jobs.lock();
            jobs.entry(job_id)
                .or_insert_with(|| JobChannel {
                    sender: broadcast::channel(SUBSCRIBER_QUEUE_DEPTH).0,
                })
                .sender
                .clone()
        };

        BusSubscription {
            receiver: sender.subscribe(),
        }
    }

    pub fn subscribe_topic(&self, topic: Topic) -> BusSubscription {
        let sender = self.topics[&topic].clone();
        BusSubscription {
            receiver: sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to either a job channel or a global topic.
pub struct BusSubscription {
    receiver: broadcast::Receiver<BusMessage>,
}

impl BusSubscription {
    /// Wait for the next message, transparently recording dropped-message
    /// overflow as a `Lagged` message instead of surfacing the broadcast
    /// channel's `RecvError::Lagged` to the caller.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("task_bus_overflow_total").increment(skipped);
                    return Some(BusMessage::Lagged);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
