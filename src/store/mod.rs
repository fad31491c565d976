//! Remote store task pool
//!
//! A batched, pipelined client for a Redis-compatible key/value store:
//! - Point operations are queued on one of `concurrency` partitions
//! - Each partition worker flushes its queue as one pipelined round-trip
//! - Write operations are retried on transient failures
//! - A background prober marks the store dead/recovered

mod connection;
mod liveness;
mod pool;
mod retry;
mod task;
mod transport;

use std::time::Duration;

pub use connection::RedisConnection;
pub use liveness::{LivenessTransition, StoreLiveness, PROBE_INTERVAL};
pub use pool::TaskPool;
pub use retry::with_retries;
pub use task::{Resp, TaskKind};
pub use transport::{Command, RedisTransport, Reply, Transport};

/// Errors produced by the task pool and its transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Remote store {addr} is dead")]
    Dead { addr: String },

    #[error("Task pool has been shut down")]
    Shutdown,

    #[error("Connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Timed out during {op} against {addr}")]
    Timeout { addr: String, op: &'static str },

    #[error("No free connection to {addr} within {waited:?}")]
    PoolTimeout { addr: String, waited: Duration },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Connection to {0} closed")]
    Disconnected(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Store replied with error: {0}")]
    Reply(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Invalid store config: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether resubmitting the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Connect { .. }
                | StoreError::Timeout { .. }
                | StoreError::PoolTimeout { .. }
                | StoreError::Io(_)
                | StoreError::Disconnected(_)
        )
    }
}
