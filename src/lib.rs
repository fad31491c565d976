//! Vigil: instance liveness tracking for a service registry
//!
//! - [`record`]: compact string codec for liveness records
//! - [`store`]: batched, pipelined remote store client with failure detection
//! - [`health`]: health checker contract with memory and remote-store backends

pub mod clock;
pub mod config;
pub mod health;
pub mod metrics;
pub mod record;
pub mod store;

pub use config::{BackendKind, Config, HealthCheckConfig, StoreConfig};
pub use health::{
    new_health_checker, CheckRequest, CheckResponse, HealthChecker, HealthError,
    MemoryHealthChecker, QueryResult, RedisHealthChecker, Verdict,
};
pub use record::{LivenessRecord, RecordError};
pub use store::{Resp, StoreError, StoreLiveness, TaskPool};
