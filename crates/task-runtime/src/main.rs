use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use task_core::JobMode;
use task_runtime::{ClaimFilter, HttpLlmClient, HttpLlmConfig, WorkerBuilder, WorkerHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Automatically migrate the database to the latest schema on startup if
    /// the database version does not match what this worker expects.
    #[arg(long)]
    migrate: bool,

    /// Stable identifier for this worker process. Defaults to a fresh uuid,
    /// which is fine for processes run under a supervisor that doesn't need
    /// to recognize a restarted worker as "the same" one.
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Restrict this worker to jobs of a single mode. Unset claims either.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// How many job activities this worker runs concurrently.
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long, env = "LLM_BASE_URL")]
    llm_base_url: String,

    #[arg(long, env = "LLM_MODEL")]
    llm_model: String,

    #[arg(long, env = "LLM_API_KEY")]
    llm_api_key: Option<String>,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum ModeArg {
    Mechanic,
    Genius,
}

impl From<ModeArg> for JobMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Mechanic => JobMode::Mechanic,
            ModeArg::Genius => JobMode::Genius,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_filter(tracing_subscriber::EnvFilter::from_default_env()),
    );

    #[cfg(feature = "tokio-console")]
    let registry = registry.with(console_subscriber::spawn());

    registry.init();

    let args = Args::parse();

    let options = sqlx::postgres::PgConnectOptions::from_str(&args.database_url)
        .context("failed to parse database url")?
        .application_name("task-worker");
    let pool = sqlx::pool::PoolOptions::new()
        .acquire_timeout(Duration::from_secs(60))
        .max_connections(20)
        .connect_with(options)
        .await
        .context("failed to connect to the database")?;

    let mut llm_config = HttpLlmConfig::new(args.llm_base_url, args.llm_model);
    if let Some(api_key) = args.llm_api_key {
        llm_config = llm_config.with_api_key(api_key);
    }
    let llm = Arc::new(HttpLlmClient::new(llm_config).context("failed to build the llm client")?);

    let mut builder = WorkerBuilder::new(pool, llm).migrate(args.migrate);

    if let Some(worker_id) = args.worker_id {
        builder = builder.worker_id(worker_id);
    }
    if let Some(mode) = args.mode {
        builder = builder.claim_filter(ClaimFilter::ModeOnly(mode.into()));
    }
    if let Some(concurrency) = args.concurrency {
        builder = builder.config(task_runtime::Config::default().with_concurrency(concurrency));
    }

    let mut worker = builder.build().await?;
    let handle = worker.handle();

    let signal = tokio::task::spawn(async move {
        struct DropGuard(WorkerHandle);

        impl Drop for DropGuard {
            fn drop(&mut self) {
                self.0.shutdown();
            }
        }

        let _guard = DropGuard(handle);

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            tokio::select! {
                _ = sigint.recv() => (),
                _ = sigterm.recv() => (),
            }
        }

        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        tracing::info!("received shutdown signal, draining");

        anyhow::Ok(())
    });

    tracing::info!(worker_id = worker.id(), "task-worker starting up");
    worker.run().await?;

    signal
        .await
        .context("signal task exited early with an error")?
        .context("signal task exited early with an error")?;

    Ok(())
}
