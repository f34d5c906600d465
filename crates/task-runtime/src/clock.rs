//! Clock abstraction used for every internal time read and sleep.
//!
//! Everything in the worker that reads the current time or sleeps for a
//! duration — heartbeat jitter, deadline checks, drain timeouts — goes
//! through a [`Clock`] instead of calling `chrono::Utc::now()` or
//! `tokio::time::sleep` directly, so that test code can inject a controlled
//! clock instead of waiting on real wall time.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// The default clock, backed by real system time.
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
