use std::time::Duration;

use task_core::{JobSpec, JobStatus};
use task_runtime::Store;
use task_test::ScriptedLlm;

#[sqlx::test]
async fn cancel_mid_run_aborts_the_job(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());
    let llm = std::sync::Arc::new(ScriptedLlm::stalls_forever());
    let _guard = task_test::spawn_worker_with(
        pool,
        task_runtime::Config::default(),
        llm,
        vec![],
    )
    .await?;

    let spec = JobSpec::new("never finish on its own", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;

    // Give the worker a moment to claim it before requesting cancellation;
    // otherwise we'd be racing the claim itself.
    crate::wait_for_status(&store, job_id, JobStatus::Running, Duration::from_secs(5)).await?;

    store.request_cancel(job_id).await?;

    let job = crate::wait_for_terminal(&store, job_id, Duration::from_secs(5)).await?;
    assert_eq!(job.status, JobStatus::Aborted);

    Ok(())
}

#[sqlx::test]
async fn cancel_before_claim_aborts_without_a_worker(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool);

    let spec = JobSpec::new("cancel me before anyone claims me", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;

    store.request_cancel(job_id).await?;

    let job = store.get_job(job_id).await?.expect("job row must exist");
    assert_eq!(job.status, JobStatus::Aborted);
    assert!(job.assigned_to.is_none());

    // Idempotent: cancelling an already-aborted job is a no-op, not an error.
    store.request_cancel(job_id).await?;
    let job = store.get_job(job_id).await?.expect("job row must exist");
    assert_eq!(job.status, JobStatus::Aborted);

    Ok(())
}
