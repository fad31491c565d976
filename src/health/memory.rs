use async_trait::async_trait;
use dashmap::DashMap;

use crate::clock::{system_clock, Clock};
use crate::metrics::metrics;
use crate::record::LivenessRecord;

use super::checker::{judge, observe_verdict, unchanged, SuspendWindow};
use super::{CheckRequest, CheckResponse, HealthChecker, HealthError, QueryResult};

const BACKEND: &str = "memory";

/// Health checker keeping records in this process
///
/// Has no store to lose, so only the suspend window and the expiry test
/// apply.
pub struct MemoryHealthChecker {
    records: DashMap<String, LivenessRecord>,
    suspend: SuspendWindow,
    clock: Clock,
}

impl MemoryHealthChecker {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            suspend: SuspendWindow::new(),
            clock: system_clock(),
        }
    }

    /// Use `clock` for suspend timestamps
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn lookup(&self, instance_id: &str) -> QueryResult {
        match self.records.get(instance_id) {
            Some(record) => QueryResult::from_record(instance_id, record.value()),
            None => QueryResult::absent(instance_id),
        }
    }
}

impl Default for MemoryHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthChecker for MemoryHealthChecker {
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
        self.records.insert(
            instance_id.to_string(),
            LivenessRecord::new(origin_host, timestamp_sec, report_count),
        );
        metrics().record_report(BACKEND);
        Ok(())
    }

    async fn query(&self, instance_id: &str) -> Result<QueryResult, HealthError> {
        Ok(self.lookup(instance_id))
    }

    async fn batch_query(&self, instance_ids: &[String]) -> Result<Vec<QueryResult>, HealthError> {
        Ok(instance_ids.iter().map(|id| self.lookup(id)).collect())
    }

    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse, HealthError> {
        let now = request.current_time_sec();
        let last_heartbeat = self.lookup(&request.instance_id).last_heartbeat_time_sec;

        let response = if self.suspend.is_active(now, request.expire_duration_sec) {
            unchanged(request, last_heartbeat)
        } else {
            judge(request, now, last_heartbeat)
        };
        observe_verdict(BACKEND, request, now, &response);
        Ok(response)
    }

    async fn delete(&self, instance_id: &str) -> Result<(), HealthError> {
        self.records.remove(instance_id);
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
}
