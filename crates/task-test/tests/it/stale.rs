use std::time::Duration;

use task_core::{JobSpec, JobStatus};
use task_runtime::{ClaimFilter, Store};

/// Simulates a worker that claims a job and then disappears without ever
/// heartbeating it. The sweeper must notice the stale claim and return the
/// job to `queued` so another worker can pick it up.
#[sqlx::test]
async fn stale_claim_is_requeued(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool);

    let spec = JobSpec::new("abandoned by a crashed worker", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;

    let claimed = store.claim_next("worker-that-crashes", ClaimFilter::Any).await?;
    assert_eq!(claimed.map(|j| j.id), Some(job_id));

    // The claim is fresh, so a normal threshold must not touch it yet.
    let requeued = store.requeue_stale(Duration::from_secs(3600)).await?;
    assert_eq!(requeued, 0);
    let job = store.get_job(job_id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Running);

    // Backdate the heartbeat by sleeping past a near-zero threshold instead
    // of reaching into the row directly; this is the same "real clock"
    // surface the sweeper itself uses.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let requeued = store.requeue_stale(Duration::from_millis(10)).await?;
    assert_eq!(requeued, 1);

    let job = store.get_job(job_id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.assigned_to.is_none());
    assert!(job.last_heartbeat_at.is_none());

    // Idempotent: sweeping again finds nothing left to requeue.
    let requeued_again = store.requeue_stale(Duration::from_millis(10)).await?;
    assert_eq!(requeued_again, 0);

    Ok(())
}

#[sqlx::test]
async fn heartbeat_keeps_a_claim_alive(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool);

    let spec = JobSpec::new("actively worked", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;
    store.claim_next("diligent-worker", ClaimFilter::Any).await?;

    assert!(store.heartbeat(job_id, "diligent-worker").await?);

    // A heartbeat from a worker id that doesn't own the claim is a no-op,
    // not an error, and must not extend anyone's claim.
    assert!(!store.heartbeat(job_id, "impostor-worker").await?);

    Ok(())
}
