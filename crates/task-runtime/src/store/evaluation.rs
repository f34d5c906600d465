use task_core::{Evaluation, JobId};

use super::Store;
use crate::error::StoreError;

#[derive(sqlx::FromRow)]
struct EvaluationRow {
    job_id: i64,
    correctness: f64,
    efficiency: f64,
    honesty: f64,
    safety: f64,
    flags: Vec<String>,
}

impl From<EvaluationRow> for Evaluation {
    fn from(row: EvaluationRow) -> Self {
        Evaluation {
            job_id: JobId(row.job_id),
            correctness: row.correctness,
            efficiency: row.efficiency,
            honesty: row.honesty,
            safety: row.safety,
            flags: row.flags,
        }
    }
}

impl Store {
    /// Writes the evaluator agent's scores for a terminal job. Scoring a job
    /// twice overwrites the previous scores rather than erroring, since the
    /// evaluator may itself be re-run.
    pub async fn put_evaluation(&self, evaluation: &Evaluation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO evaluations (job_id, correctness, efficiency, honesty, safety, flags)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (job_id) DO UPDATE
               SET correctness = excluded.correctness,
                   efficiency = excluded.efficiency,
                   honesty = excluded.honesty,
                   safety = excluded.safety,
                   flags = excluded.flags",
        )
        .bind(evaluation.job_id.0)
        .bind(evaluation.correctness)
        .bind(evaluation.efficiency)
        .bind(evaluation.honesty)
        .bind(evaluation.safety)
        .bind(&evaluation.flags)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_evaluation(&self, job_id: JobId) -> Result<Option<Evaluation>, StoreError> {
        let row: Option<EvaluationRow> = sqlx::query_as(
            "SELECT job_id, correctness, efficiency, honesty, safety, flags
               FROM evaluations
              WHERE job_id = $1",
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Evaluation::from))
    }
}
