//! The error taxonomy shared across the store, worker, and agent loop.
//!
//! See the error handling design: `transient` failures are retried with the
//! job left `running`; `policy` failures finalize the job as `failed` with no
//! retry; `client` failures are reported to the model as a tool-role error
//! and the loop continues; `fatal` failures cause the worker to abandon the
//! job without finalizing it, leaving the sweeper to recover it.
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Transient,
    Policy,
    Client,
    Fatal,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct AbortError;

impl std::fmt::Display for AbortError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "this job is no longer assigned to the current worker and has been abandoned"
        )
    }
}

impl std::error::Error for AbortError {}

#[derive(Copy, Clone, Debug, Default)]
pub struct LostClaimError;

impl std::fmt::Display for LostClaimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "heartbeat failed: the claim on this job has been lost")
    }
}

impl std::error::Error for LostClaimError {}
