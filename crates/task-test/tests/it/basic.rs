use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use task_core::{JobMode, JobSpec, JobStatus};
use task_runtime::{Config, Store};
use task_test::{EchoTool, ScriptedLlm, ScriptedTurn};

#[sqlx::test]
async fn malformed_tool_call_is_rejected_without_executing(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());

    // The first call omits the required `text` argument; the second is
    // well-formed. If schema validation didn't run, the first call would
    // execute `echo` with no `text` instead of bouncing back to the model.
    let llm = Arc::new(ScriptedLlm::new(vec![
        ScriptedTurn::Tool { name: "echo", arguments: json!({}) },
        ScriptedTurn::Succeed { summary: "done" },
    ]));
    let tools: Vec<Arc<dyn task_core::tool::Tool>> = vec![Arc::new(EchoTool)];
    let _guard = task_test::spawn_worker_with(pool, Config::default(), llm, tools).await?;

    let spec = JobSpec::new("call echo without text", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;

    let job = crate::wait_for_terminal(&store, job_id, Duration::from_secs(10)).await?;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.usage.steps_used, 0, "the rejected call must not count as an executed step");

    Ok(())
}

#[sqlx::test]
async fn trivial_job_succeeds(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());
    let _guard = task_test::spawn_worker(pool).await?;

    let spec = JobSpec::new("say hello", "/repo");
    let job_id = store.insert_job(&spec, spec.mode.default_caps()).await?;

    let job = crate::wait_for_terminal(&store, job_id, Duration::from_secs(10)).await?;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.finished_at.is_some());
    assert!(job.assigned_to.is_some());

    Ok(())
}

#[sqlx::test]
async fn job_fails_when_step_cap_exhausted(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());

    // Loops a single non-terminal tool call forever; the step cap, not the
    // model, is what ends the job.
    let llm = Arc::new(ScriptedLlm::new(vec![ScriptedTurn::Tool {
        name: "echo",
        arguments: json!({ "text": "again" }),
    }]));
    let tools: Vec<Arc<dyn task_core::tool::Tool>> = vec![Arc::new(EchoTool)];
    let _guard = task_test::spawn_worker_with(pool, Config::default(), llm, tools).await?;

    let mut spec = JobSpec::new("loop until capped", "/repo");
    spec.mode = JobMode::Mechanic;
    let mut caps = spec.mode.default_caps();
    caps.step_cap = 3;
    spec.caps = Some(caps);

    let job_id = store.insert_job(&spec, caps).await?;

    let job = crate::wait_for_terminal(&store, job_id, Duration::from_secs(10)).await?;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.usage.steps_used >= 3);

    Ok(())
}

#[sqlx::test]
async fn job_fails_when_cost_cap_exhausted(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let store = Store::new(pool.clone());

    // Never calls a terminal tool; the cost cap, not the model, ends the job.
    let llm = Arc::new(ScriptedLlm::new(vec![ScriptedTurn::CostlyText {
        text: "still working",
        cost_cents: 50,
    }]));
    let _guard = task_test::spawn_worker_with(pool, Config::default(), llm, vec![]).await?;

    let mut spec = JobSpec::new("burn the cost budget", "/repo");
    spec.mode = JobMode::Mechanic;
    let mut caps = spec.mode.default_caps();
    caps.cost_cap_cents = 120;
    spec.caps = Some(caps);

    let job_id = store.insert_job(&spec, caps).await?;

    let job = crate::wait_for_terminal(&store, job_id, Duration::from_secs(10)).await?;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.usage.cost_used_cents > caps.cost_cap_cents);

    Ok(())
}
