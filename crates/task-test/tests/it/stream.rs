use std::sync::Arc;
use std::time::Duration;

use task_client::{StreamItem, TaskClient};
use task_core::{JobSpec, JobStatus};
use task_runtime::Store;
use task_test::ScriptedLlm;

#[sqlx::test]
async fn stream_of_an_already_finished_job_yields_one_terminal_snapshot(
    pool: sqlx::PgPool,
) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());
    let _guard = task_test::spawn_worker(pool.clone()).await?;

    let spec = JobSpec::new("finish before anyone subscribes", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;
    crate::wait_for_terminal(&store, job_id, Duration::from_secs(10)).await?;

    let client = TaskClient::connect(pool).await?;
    let mut stream = client.stream(job_id);

    let first = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await?
        .expect("stream must yield at least the initial snapshot");
    match first.expect("gateway must not error on a finished job") {
        StreamItem::Snapshot(snapshot) => {
            assert_eq!(snapshot.job.id, job_id);
            assert_eq!(snapshot.job.status, JobStatus::Succeeded);
        }
        other => panic!("expected a snapshot first, got {other:?}"),
    }

    // The job is already terminal, so the gateway closes the stream right
    // after the first snapshot; nothing else should ever arrive.
    let closed = tokio::time::timeout(Duration::from_secs(2), stream.recv()).await;
    assert!(matches!(closed, Ok(None)), "stream should close after the terminal snapshot");

    Ok(())
}

#[sqlx::test]
async fn stream_of_a_running_job_observes_its_cancellation(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());
    let llm = Arc::new(ScriptedLlm::stalls_forever());
    let _guard =
        task_test::spawn_worker_with(pool.clone(), task_runtime::Config::default(), llm, vec![])
            .await?;

    let spec = JobSpec::new("stream me while I run", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;
    crate::wait_for_status(&store, job_id, JobStatus::Running, Duration::from_secs(5)).await?;

    let client = TaskClient::connect(pool).await?;
    let mut stream = client.stream(job_id);

    let first = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await?
        .expect("stream must yield the initial snapshot")
        .expect("gateway must not error on a running job");
    assert!(matches!(first, StreamItem::Snapshot(ref s) if s.job.status == JobStatus::Running));

    client.cancel(job_id).await?;

    // Drain items until we observe the job reach a terminal state on the
    // stream itself, rather than only through a direct store poll.
    let saw_terminal = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match stream.recv().await {
                Some(Ok(StreamItem::Snapshot(snapshot))) if snapshot.job.status.is_terminal() => {
                    return true;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("gateway stream error: {e}"),
                None => return false,
            }
        }
    })
    .await?;

    assert!(saw_terminal, "stream should observe the job's terminal status before closing");

    Ok(())
}
