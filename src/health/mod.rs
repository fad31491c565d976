//! Instance liveness checking
//!
//! This module provides:
//! - The `HealthChecker` contract (report/query/check/suspend)
//! - An in-process backend and a remote-store backend
//! - Tri-state verdicts with suspend and recover windows

mod checker;
mod memory;
mod redis;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{BackendKind, ConfigError, HealthCheckConfig};
use crate::record::RecordError;
use crate::store::StoreError;

pub use checker::{
    CheckRequest, CheckResponse, HealthChecker, QueryResult, SuspendWindow, Verdict,
};
pub use memory::MemoryHealthChecker;
pub use redis::RedisHealthChecker;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Malformed record for instance {instance_id}: {source}")]
    Record {
        instance_id: String,
        source: RecordError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Build the checker selected by `config.backend`
pub async fn new_health_checker(
    config: &HealthCheckConfig,
    shutdown: CancellationToken,
) -> Result<Arc<dyn HealthChecker>, HealthError> {
    info!(backend = config.backend.as_str(), "Creating health checker");
    let checker: Arc<dyn HealthChecker> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryHealthChecker::new()),
        BackendKind::Redis => Arc::new(RedisHealthChecker::connect(config, shutdown).await?),
    };
    Ok(checker)
}
