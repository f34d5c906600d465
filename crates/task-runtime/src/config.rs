use std::time::Duration;

use derive_setters::Setters;
use task_core::{BudgetCaps, JobMode};

/// Tunables for a [`crate::worker::Worker`]. Every field has a sane default;
/// override individual fields with the generated setters.
#[derive(Clone, Debug, Setters)]
#[setters(prefix = "with_", into)]
pub struct Config {
    /// How often the acquisition loop polls `claimNext` when idle.
    #[setters(skip)]
    pub poll_interval: Duration,

    /// How often the heartbeat task refreshes `last_heartbeat_at` for each
    /// active job.
    ///
    /// The actual period is jittered downward by up to 1/4 to avoid
    /// thundering herds on the database.
    #[setters(skip)]
    pub heartbeat_interval: Duration,

    /// The age past which a claimed job's heartbeat is considered stale and
    /// eligible for `requeueStale`. Per the recommended production default,
    /// this is `3 * heartbeat_interval`, floored at 30s.
    #[setters(skip)]
    pub stale_after: Duration,

    /// How often the stale sweeper runs. Every worker runs it; races are
    /// tolerated because the underlying update is idempotent.
    #[setters(skip)]
    pub sweep_interval: Duration,

    /// Only applies when a job has no explicit mode filter: how many job
    /// activities a single worker process will run concurrently.
    pub concurrency: usize,

    /// Upper bound on how long the worker waits for in-flight jobs to reach
    /// a clean suspension point during drain before abandoning them.
    #[setters(skip)]
    pub drain_deadline: Duration,

    /// Number of events included in a stream gateway snapshot.
    pub gateway_snapshot_events: i64,

    /// Interval between keep-alive heartbeat records on a live stream.
    #[setters(skip)]
    pub gateway_heartbeat_interval: Duration,

    /// Interval between resync snapshots on a live stream.
    #[setters(skip)]
    pub gateway_resync_interval: Duration,

    /// Per-mode defaults applied by `insertJob` when the caller does not
    /// override caps explicitly.
    #[setters(skip)]
    pub mechanic_caps: BudgetCaps,
    #[setters(skip)]
    pub genius_caps: BudgetCaps,
}

impl Config {
    pub fn default_caps(&self, mode: JobMode) -> BudgetCaps {
        match mode {
            JobMode::Mechanic => self.mechanic_caps,
            JobMode::Genius => self.genius_caps,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.stale_after = (interval * 3).max(Duration::from_secs(30));
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(10);

        Self {
            poll_interval: Duration::from_millis(500),
            heartbeat_interval,
            stale_after: (heartbeat_interval * 3).max(Duration::from_secs(30)),
            sweep_interval: Duration::from_secs(10),
            concurrency: 1,
            drain_deadline: Duration::from_secs(30),
            gateway_snapshot_events: 100,
            gateway_heartbeat_interval: Duration::from_secs(12),
            gateway_resync_interval: Duration::from_secs(30),
            mechanic_caps: JobMode::Mechanic.default_caps(),
            genius_caps: JobMode::Genius.default_caps(),
        }
    }
}
