//! Runtime for the durable job substrate.
//!
//! This crate owns everything stateful: the ledger store (`store`), the
//! cross-process notification bridge and in-process fan-out (`event`,
//! `bus`), the worker pool that claims and drives jobs (`worker`), the
//! per-job LLM-tool dialogue (`agent`), and the read side used by
//! dashboards and CLIs (`gateway`). `task-core` defines the types these
//! modules move around; this crate defines how they move.

pub mod agent;
mod bus;
mod clock;
mod config;
mod entropy;
mod error;
mod event;
mod flag;
mod gateway;
mod llm_client;
mod migrate;
mod store;
mod util;
mod worker;

pub use self::bus::{BusMessage, BusSubscription, EventBus, Topic};
pub use self::clock::{Clock, SystemClock};
pub use self::config::Config;
pub use self::entropy::{Entropy, SystemEntropy};
pub use self::error::StoreError;
pub use self::event::{Event, EventSource, PgEventSource};
pub use self::gateway::{Gateway, GatewayError, JobSnapshot, StreamItem};
pub use self::llm_client::{HttpLlmClient, HttpLlmConfig};
pub use self::migrate::Migrator;
pub use self::store::{ClaimFilter, Store};
pub use self::worker::{Worker, WorkerBuilder, WorkerHandle};
