//! Runtime-local error types. The shared taxonomy lives in
//! [`task_core::error`]; this module adds the store/runtime specific variants
//! that don't belong in the domain crate.

pub use task_core::error::{AbortError, ErrorKind, LostClaimError};

/// Errors returned by [`crate::store`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("job {0} does not exist")]
    NotFound(task_core::JobId),
}
