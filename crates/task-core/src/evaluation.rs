use crate::job::JobId;

/// A post-hoc score for a terminal job, written at most once by an evaluator
/// agent. Every field lives in `[0.0, 1.0]`; the scorer is free to leave the
/// whole row absent.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub job_id: JobId,
    pub correctness: f64,
    pub efficiency: f64,
    pub honesty: f64,
    pub safety: f64,
    pub flags: Vec<String>,
}
