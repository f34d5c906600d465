use std::time::Duration;

use task_core::{Job, JobId, JobStatus};
use task_runtime::Store;

mod basic;
mod cancel;
mod stale;
mod stream;

/// Poll `get_job` until it reaches a terminal status or the timeout expires.
async fn wait_for_terminal(store: &Store, job_id: JobId, timeout: Duration) -> anyhow::Result<Job> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get_job(job_id).await?.expect("job row must exist");
        if job.status.is_terminal() {
            return Ok(job);
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("job {job_id} did not reach a terminal status within {timeout:?} (status: {:?})", job.status);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_status(
    store: &Store,
    job_id: JobId,
    status: JobStatus,
    timeout: Duration,
) -> anyhow::Result<Job> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get_job(job_id).await?.expect("job row must exist");
        if job.status == status {
            return Ok(job);
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "job {job_id} did not reach status {status:?} within {timeout:?} (status: {:?})",
                job.status
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
