use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::{system_clock, Clock};
use crate::config::HealthCheckConfig;
use crate::metrics::metrics;
use crate::record::LivenessRecord;
use crate::store::{Resp, StoreLiveness, TaskPool};

use super::checker::{judge, observe_verdict, unchanged, within_window, SuspendWindow};
use super::{CheckRequest, CheckResponse, HealthChecker, HealthError, QueryResult};

const BACKEND: &str = "redis";

/// Health checker keeping records in a Redis-compatible store
///
/// Reports go through a dedicated write pool so reads are never queued
/// behind write batches. Verdicts are withheld while the write pool's store
/// is dead or recovering from an outage.
pub struct RedisHealthChecker {
    write_pool: TaskPool,
    read_pool: TaskPool,
    key_prefix: String,
    suspend: SuspendWindow,
    clock: Clock,
}

impl RedisHealthChecker {
    /// Connect both pools and register this node in the known-servers set
    pub async fn connect(
        config: &HealthCheckConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, HealthError> {
        let store = config.store_config()?;
        let write_pool = TaskPool::connect(store.clone(), shutdown.clone()).await?;
        let read_pool = TaskPool::connect(store, shutdown).await?;
        Self::with_pools(write_pool, read_pool, config).await
    }

    /// Build over existing pools
    pub async fn with_pools(
        write_pool: TaskPool,
        read_pool: TaskPool,
        config: &HealthCheckConfig,
    ) -> Result<Self, HealthError> {
        let members = [config.local_host.clone()];
        if let Some(err) = write_pool.sadd(&config.servers_key, &members).await.err {
            error!(
                addr = %write_pool.address(),
                servers_key = %config.servers_key,
                local_host = %config.local_host,
                error = %err,
                "Failed to register in known-servers set"
            );
            return Err(err.into());
        }

        info!(
            addr = %write_pool.address(),
            local_host = %config.local_host,
            key_prefix = %config.key_prefix,
            "Redis health checker ready"
        );

        Ok(Self {
            write_pool,
            read_pool,
            key_prefix: config.key_prefix.clone(),
            suspend: SuspendWindow::new(),
            clock: system_clock(),
        })
    }

    /// Use `clock` for suspend timestamps
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn key(&self, instance_id: &str) -> String {
        format!("{}{}", self.key_prefix, instance_id)
    }

    fn parse(instance_id: &str, resp: Resp) -> Result<QueryResult, HealthError> {
        let resp = resp.into_result()?;
        if !resp.exists {
            return Ok(QueryResult::absent(instance_id));
        }
        let record = LivenessRecord::deserialize(&resp.value, resp.compatible).map_err(|source| {
            HealthError::Record {
                instance_id: instance_id.to_string(),
                source,
            }
        })?;
        Ok(QueryResult::from_record(instance_id, &record))
    }

    async fn judge_stored(&self, request: &CheckRequest, now: i64) -> Result<CheckResponse, HealthError> {
        let last_heartbeat = self.query(&request.instance_id).await?.last_heartbeat_time_sec;
        let expire = request.expire_duration_sec;

        if self.suspend.is_active(now, expire) {
            return Ok(unchanged(request, last_heartbeat));
        }
        // Reports are failing, stored heartbeats are stale
        if self.write_pool.is_dead() {
            return Ok(unchanged(request, last_heartbeat));
        }
        if within_window(self.write_pool.recover_time_sec(), now, expire) {
            return Ok(unchanged(request, last_heartbeat));
        }
        if now < last_heartbeat {
            return Ok(unchanged(request, last_heartbeat));
        }
        Ok(judge(request, now, last_heartbeat))
    }
}

#[async_trait]
impl HealthChecker for RedisHealthChecker {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn report(
        &self,
        instance_id: &str,
        origin_host: &str,
        timestamp_sec: i64,
        report_count: i64,
    ) -> Result<(), HealthError> {
        let record = LivenessRecord::new(origin_host, timestamp_sec, report_count);
        self.write_pool
            .set(&self.key(instance_id), &record)
            .await
            .into_result()?;
        metrics().record_report(BACKEND);
        Ok(())
    }

    async fn query(&self, instance_id: &str) -> Result<QueryResult, HealthError> {
        let resp = self.read_pool.get(&self.key(instance_id)).await;
        Self::parse(instance_id, resp)
    }

    async fn batch_query(&self, instance_ids: &[String]) -> Result<Vec<QueryResult>, HealthError> {
        let keys: Vec<String> = instance_ids.iter().map(|id| self.key(id)).collect();
        let resps = join_all(keys.iter().map(|key| self.read_pool.get(key))).await;
        instance_ids
            .iter()
            .zip(resps)
            .map(|(id, resp)| Self::parse(id, resp))
            .collect()
    }

    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse, HealthError> {
        let now = request.current_time_sec();
        match self.judge_stored(request, now).await {
            Ok(response) => {
                observe_verdict(BACKEND, request, now, &response);
                Ok(response)
            }
            Err(e) => {
                metrics().record_check_error(BACKEND);
                Err(e)
            }
        }
    }

    async fn delete(&self, instance_id: &str) -> Result<(), HealthError> {
        self.read_pool
            .delete(&self.key(instance_id))
            .await
            .into_result()?;
        Ok(())
    }

    fn suspend(&self) {
        let now = (self.clock)();
        self.suspend.suspend(now);
        metrics().set_suspend_time(BACKEND, now);
    }

    fn suspend_time_sec(&self) -> i64 {
        self.suspend.suspend_time_sec()
    }

    fn store_liveness(&self) -> Option<Arc<StoreLiveness>> {
        Some(self.write_pool.liveness())
    }
}
