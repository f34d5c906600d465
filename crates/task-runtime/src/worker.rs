use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_concurrency::future::Join;
use task_core::llm::LlmClient;
use task_core::tool::{CancelSignal, Tool};
use task_core::{Job, JobId};
use tokio::task::JoinSet;

use crate::agent::{AgentLoop, AgentOutcome};
use crate::clock::{Clock, SystemClock};
use crate::entropy::{Entropy, SystemEntropy};
use crate::event::{Event, EventSource, PgEventSource};
use crate::flag::{ShutdownFlag, ShutdownGuard};
use crate::store::{ClaimFilter, Store};
use crate::Config;
use crate::bus::EventBus;

pub(crate) struct SharedState {
    pub shutdown: ShutdownFlag,
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub entropy: Arc<dyn Entropy>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub worker_id: String,
    pub claim_filter: ClaimFilter,
}

pub struct WorkerBuilder {
    pool: sqlx::PgPool,
    llm: Arc<dyn LlmClient>,
    tools: Vec<Arc<dyn Tool>>,
    config: Config,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
    event_source: Option<Box<dyn EventSource>>,
    bus: Option<Arc<EventBus>>,
    worker_id: Option<String>,
    claim_filter: ClaimFilter,
    migrate: bool,
    validate: bool,
}

impl WorkerBuilder {
    pub fn new(pool: sqlx::PgPool, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            pool,
            llm,
            tools: Vec::new(),
            config: Config::default(),
            clock: Arc::new(SystemClock),
            entropy: Arc::new(SystemEntropy),
            event_source: None,
            bus: None,
            worker_id: None,
            claim_filter: ClaimFilter::Any,
            migrate: false,
            validate: true,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn entropy(mut self, entropy: Arc<dyn Entropy>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn event_source(mut self, event_source: Box<dyn EventSource>) -> Self {
        self.event_source = Some(event_source);
        self
    }

    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Only claim jobs of this mode. `mechanic`-only workers must never claim
    /// `genius` jobs.
    pub fn claim_filter(mut self, filter: ClaimFilter) -> Self {
        self.claim_filter = filter;
        self
    }

    /// Whether the database should be migrated to the latest schema version
    /// on startup. False by default; not recommended for clusters with more
    /// than one worker since concurrent migration attempts race.
    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    pub fn validate_database(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub async fn build(self) -> anyhow::Result<Worker> {
        let migrator = crate::migrate::Migrator::new();
        let mut conn = self.pool.acquire().await?;

        if self.migrate {
            let options = crate::migrate::Options {
                target: migrator.latest(),
                transaction_mode: crate::migrate::TransactionMode::Single,
                ..Default::default()
            };

            migrator
                .migrate(&mut conn, &options)
                .await
                .context("failed to migrate the ledger store schema")?;
        } else if self.validate {
            let version = migrator.read_database_version(&mut conn).await?.unwrap_or(0);
            let latest = migrator.latest_version();

            if version != latest {
                anyhow::bail!(
                    "ledger store schema version does not match what this worker expects \
                     (expected {latest}, got {version})"
                );
            }
        }
        drop(conn);

        let event_source = match self.event_source {
            Some(source) => source,
            None => Box::new(PgEventSource::new(&self.pool).await?),
        };

        let shared = Arc::new(SharedState {
            shutdown: ShutdownFlag::new(),
            store: Arc::new(Store::new(self.pool)),
            bus: self.bus.unwrap_or_default(),
            config: self.config,
            clock: self.clock,
            entropy: self.entropy,
            llm: self.llm,
            tools: self.tools,
            worker_id: self.worker_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            claim_filter: self.claim_filter,
        });

        Ok(Worker {
            shared,
            event_source,
            tasks: JoinSet::new(),
        })
    }
}

/// A handle that can request a worker shut down from outside its `run` task.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<SharedState>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        self.shared.shutdown.raise();
    }
}

/// A long-lived process that claims jobs, runs their agent loops, heartbeats
/// them, and recovers stale claims. See the acquisition loop, heartbeat task,
/// and stale sweeper.
pub struct Worker {
    shared: Arc<SharedState>,
    event_source: Box<dyn EventSource>,
    tasks: JoinSet<()>,
}

impl Worker {
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle { shared: self.shared.clone() }
    }

    pub fn id(&self) -> &str {
        &self.shared.worker_id
    }

    /// Runs until [`WorkerHandle::shutdown`] is called (or `SIGTERM` is wired
    /// up by the caller, see `main.rs`). On drain, acquisition stops, active
    /// jobs keep heartbeating, and the call returns once they finish or the
    /// drain deadline passes — whichever is first. Jobs still running at that
    /// point are abandoned for the sweeper to reclaim.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.shared.shutdown.reset();
        tracing::info!(worker_id = %self.shared.worker_id, "worker starting");

        let sweeper = Self::stale_sweeper(self.shared.clone());
        let process = self.process_events();

        let (sweeper, process) = (sweeper, process).join().await;

        self.drain().await;

        process?;
        sweeper?;
        Ok(())
    }

    /// Wait for active jobs to finish up to the drain deadline, then abandon
    /// whatever is still running.
    async fn drain(&mut self) {
        let deadline = tokio::time::sleep(self.shared.config.drain_deadline);
        tokio::pin!(deadline);

        loop {
            if self.tasks.is_empty() {
                return;
            }

            tokio::select! {
                biased;
                _ = &mut deadline => {
                    tracing::warn!(
                        remaining = self.tasks.len(),
                        "drain deadline reached; abandoning in-flight jobs for the sweeper"
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    return;
                }
                _ = self.tasks.join_next() => (),
            }
        }
    }

    async fn process_events(&mut self) -> anyhow::Result<()> {
        let shutdown = self.shared.shutdown.clone();
        let _guard = ShutdownGuard::new(&shutdown);
        let mut shutdown_fut = std::pin::pin!(shutdown.wait());

        self.try_claim_more().await?;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_fut.as_mut() => break,

                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = result {
                        if !e.is_cancelled() {
                            tracing::error!("job task panicked: {e}");
                        }
                    }
                    self.try_claim_more().await?;
                }

                _ = tokio::time::sleep(self.shared.config.poll_interval) => {
                    self.try_claim_more().await?;
                }

                event = self.event_source.next() => {
                    match event? {
                        Event::Notification(notification) => self.shared.bus.publish(notification),
                        Event::Lagged => {
                            tracing::debug!(
                                "event source lagged; bus subscribers must resync from a fresh snapshot"
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn try_claim_more(&mut self) -> anyhow::Result<()> {
        if self.shared.shutdown.is_raised() {
            return Ok(());
        }

        while self.tasks.len() < self.shared.config.concurrency {
            let job = self
                .shared
                .store
                .claim_next(&self.shared.worker_id, self.shared.claim_filter)
                .await?;

            let Some(job) = job else { break };

            tracing::info!(job_id = %job.id, "claimed job");
            let shared = self.shared.clone();
            self.tasks.spawn(async move { Self::run_job(shared, job).await });
        }

        Ok(())
    }

    async fn run_job(shared: Arc<SharedState>, job: Job) {
        let job_id = job.id;
        let claim_lost = Arc::new(AtomicBool::new(false));
        let cancel = CancelSignal::new();

        let heartbeat_shared = shared.clone();
        let heartbeat_claim_lost = claim_lost.clone();
        let heartbeat_handle =
            tokio::spawn(Self::heartbeat_job(heartbeat_shared, job_id, heartbeat_claim_lost));

        let agent = AgentLoop::new(
            shared.store.clone(),
            shared.llm.clone(),
            shared.tools.clone(),
            shared.clock.clone(),
            job,
            shared.worker_id.clone(),
            cancel,
            claim_lost,
        );

        let outcome = agent.run().await;
        heartbeat_handle.abort();

        match outcome {
            AgentOutcome::Finalized(status) => {
                tracing::info!(job_id = %job_id, ?status, "job finalized");
            }
            AgentOutcome::WaitingHuman => {
                tracing::info!(job_id = %job_id, "job is waiting on human review");
            }
            AgentOutcome::ClaimLost => {
                tracing::warn!(job_id = %job_id, "claim lost mid-run; abandoning for the sweeper");
            }
        }
    }

    /// While a job is active, refresh its heartbeat every
    /// `config.heartbeat_interval` (jittered down by up to 1/4 to avoid
    /// thundering herds). Exits as soon as the claim is confirmed gone; the
    /// caller is responsible for aborting this task once its job finishes.
    ///
    /// If the store stays unreachable for longer than `stale_after / 2`, this
    /// voluntarily raises `claim_lost` instead of retrying forever: by that
    /// point the sweeper on some other, reachable worker is entitled to
    /// reclaim the row, and racing it would let two workers run the same job.
    async fn heartbeat_job(shared: Arc<SharedState>, job_id: JobId, claim_lost: Arc<AtomicBool>) {
        let abort_after = shared.config.stale_after / 2;
        let mut failing_since: Option<chrono::DateTime<chrono::Utc>> = None;

        loop {
            let interval = jittered(shared.config.heartbeat_interval, shared.entropy.as_ref());
            shared.clock.sleep(interval).await;

            match shared.store.heartbeat(job_id, &shared.worker_id).await {
                Ok(true) => {
                    failing_since = None;
                    continue;
                }
                Ok(false) => {
                    claim_lost.store(true, Ordering::Release);
                    return;
                }
                Err(e) => {
                    let since = *failing_since.get_or_insert_with(|| shared.clock.now());
                    let down_for = shared.clock.now() - since;
                    tracing::warn!(job_id = %job_id, "heartbeat update failed: {e}");

                    if down_for.to_std().unwrap_or_default() >= abort_after {
                        tracing::error!(
                            job_id = %job_id,
                            "store unreachable for longer than half the stale threshold; \
                             voluntarily aborting this claim"
                        );
                        claim_lost.store(true, Ordering::Release);
                        return;
                    }
                }
            }
        }
    }

    /// Every worker runs the stale sweeper; races between concurrent
    /// sweepers are harmless since `requeueStale`'s predicate is idempotent.
    async fn stale_sweeper(shared: Arc<SharedState>) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&shared.shutdown);
        let mut shutdown = std::pin::pin!(shared.shutdown.wait());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.as_mut() => break,
                _ = tokio::time::sleep(shared.config.sweep_interval) => (),
            }

            match shared.store.requeue_stale(shared.config.stale_after).await {
                Ok(0) => (),
                Ok(n) => tracing::info!("requeued {n} stale job(s)"),
                Err(e) => tracing::warn!("stale sweep failed: {e}"),
            }
        }

        Ok(())
    }
}

fn jittered(base: Duration, entropy: &dyn Entropy) -> Duration {
    let quarter = base / 4;
    if quarter.is_zero() {
        return base;
    }

    let jitter_nanos = entropy.random_range(0..quarter.as_nanos());
    base.saturating_sub(Duration::from_nanos(jitter_nanos as u64))
}
