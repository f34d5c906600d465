//! Test harness shared by the integration suite: worker spawn/shutdown
//! helpers and a couple of deterministic stand-ins for the external LLM and
//! tool collaborators, so the agent loop can be driven end to end without a
//! real model or real tools.

mod llm;
mod tool;

pub use self::llm::{ScriptedLlm, ScriptedTurn};
pub use self::tool::{EchoTool, FlakyTool};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use task_core::llm::LlmClient;
use task_core::tool::Tool;
use task_runtime::{Clock, Config, Entropy, WorkerBuilder, WorkerHandle};
use tokio::task::JoinHandle;

/// Spawn a worker against `pool` with a scripted LLM that immediately
/// reports success, and no tools. Good enough for trivial lifecycle tests.
pub async fn spawn_worker(pool: sqlx::PgPool) -> anyhow::Result<WorkerShutdownGuard> {
    spawn_worker_with(pool, Config::default(), Arc::new(ScriptedLlm::always_succeed()), vec![]).await
}

pub async fn spawn_worker_with(
    pool: sqlx::PgPool,
    config: Config,
    llm: Arc<dyn LlmClient>,
    tools: Vec<Arc<dyn Tool>>,
) -> anyhow::Result<WorkerShutdownGuard> {
    let builder = WorkerBuilder::new(pool, llm).config(config).tools(tools).migrate(true);
    spawn_from_builder(builder).await
}

/// Spawn with injected `Clock`/`Entropy`, for tests that need to control
/// heartbeat timing or jitter.
pub async fn spawn_worker_with_clock(
    pool: sqlx::PgPool,
    config: Config,
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
) -> anyhow::Result<WorkerShutdownGuard> {
    let builder = WorkerBuilder::new(pool, llm)
        .config(config)
        .clock(clock)
        .entropy(entropy)
        .migrate(true);
    spawn_from_builder(builder).await
}

async fn spawn_from_builder(builder: WorkerBuilder) -> anyhow::Result<WorkerShutdownGuard> {
    let mut worker = builder.build().await?;

    let handle = worker.handle();
    let task = tokio::spawn(async move { worker.run().await });

    Ok(WorkerShutdownGuard { handle, task })
}

/// Shuts the worker down and aborts its drain on drop, so a panicking
/// assertion never leaves a worker running against the test's connection
/// pool after the test function returns.
pub struct WorkerShutdownGuard {
    handle: WorkerHandle,
    task: JoinHandle<anyhow::Result<()>>,
}

impl WorkerShutdownGuard {
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }
}

impl Future for WorkerShutdownGuard {
    type Output = anyhow::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = std::task::ready!(self.task.poll_unpin(cx));

        Poll::Ready(match result {
            Ok(result) => result,
            Err(e) => match e.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(e) => Err(anyhow::anyhow!(e)),
            },
        })
    }
}

impl Drop for WorkerShutdownGuard {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

#[ctor::ctor]
fn setup_tracing() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();
}
