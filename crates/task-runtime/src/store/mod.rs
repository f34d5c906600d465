//! The Ledger Store: the durable state (jobs, events, conversations,
//! messages, evaluations) and the transactional operations defined against
//! it. Every mutating operation here is a single transaction; nothing else in
//! the runtime is allowed to write to these tables directly.

mod conversation;
mod evaluation;
mod event;
mod job;

pub use self::job::ClaimFilter;

use sqlx::PgPool;

/// Handle to the ledger store. Cheap to clone — it's just a pool handle.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
