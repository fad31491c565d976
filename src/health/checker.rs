//! Health checker contract and the verdict rules shared by every backend

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::clock::{fixed_clock, system_clock, Clock};
use crate::metrics::metrics;
use crate::record::LivenessRecord;
use crate::store::StoreLiveness;

use super::HealthError;

/// Liveness capability set implemented by every backend
///
/// Callers invoke `report` on each heartbeat and `check` on a periodic sweep,
/// and only persist a health change when `check` returns a real transition.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Backend name, used in logs and metrics
    fn name(&self) -> &'static str;

    /// Overwrite the stored record for `instance_id`
    async fn report(
        &self,
        instance_id: &str,
        origin_host: &str,
        timestamp_sec: i64,
        report_count: i64,
    ) -> Result<(), HealthError>;

    async fn query(&self, instance_id: &str) -> Result<QueryResult, HealthError>;

    /// Query many instances at once
    ///
    /// One malformed record fails the whole batch.
    async fn batch_query(&self, instance_ids: &[String]) -> Result<Vec<QueryResult>, HealthError>;

    /// Compute the tri-state verdict for one instance
    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse, HealthError>;

    async fn delete(&self, instance_id: &str) -> Result<(), HealthError>;

    /// Withhold verdicts for one expiry cycle starting now
    fn suspend(&self);

    /// Unix seconds of the last suspend, 0 if never suspended
    fn suspend_time_sec(&self) -> i64;

    /// Liveness of the backing store, for backends that have one
    fn store_liveness(&self) -> Option<Arc<StoreLiveness>> {
        None
    }
}

/// Snapshot of one instance's record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub instance_id: String,
    pub exists: bool,
    pub origin_host: String,
    pub last_heartbeat_time_sec: i64,
    pub report_count: i64,
}

impl QueryResult {
    pub fn absent(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            ..Self::default()
        }
    }

    pub fn from_record(instance_id: &str, record: &LivenessRecord) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            exists: true,
            origin_host: record.origin_host.clone(),
            last_heartbeat_time_sec: record.last_report_time_sec,
            report_count: record.report_count,
        }
    }
}

/// Input of one `check` call
#[derive(Clone)]
pub struct CheckRequest {
    pub instance_id: String,
    pub expire_duration_sec: i64,
    /// Health the caller currently believes the instance has
    pub healthy: bool,
    clock: Clock,
}

impl CheckRequest {
    /// Request judged against the system clock
    pub fn new(instance_id: impl Into<String>, expire_duration_sec: i64, healthy: bool) -> Self {
        Self {
            instance_id: instance_id.into(),
            expire_duration_sec,
            healthy,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Pin "now" to `now_sec`
    pub fn at(self, now_sec: i64) -> Self {
        self.with_clock(fixed_clock(now_sec))
    }

    pub fn current_time_sec(&self) -> i64 {
        (self.clock)()
    }
}

impl fmt::Debug for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRequest")
            .field("instance_id", &self.instance_id)
            .field("expire_duration_sec", &self.expire_duration_sec)
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

/// Outcome of one `check` call
///
/// `stay_unchanged` means the caller must leave its stored health alone;
/// `healthy` is only meaningful when it is false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckResponse {
    pub healthy: bool,
    pub stay_unchanged: bool,
    pub last_heartbeat_time_sec: i64,
}

impl CheckResponse {
    pub fn verdict(&self) -> Verdict {
        match (self.stay_unchanged, self.healthy) {
            (true, _) => Verdict::Unchanged,
            (false, true) => Verdict::Healthy,
            (false, false) => Verdict::Unhealthy,
        }
    }
}

/// Tri-state check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Unhealthy,
    /// Do not touch the stored health status
    Unchanged,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Healthy => "healthy",
            Verdict::Unhealthy => "unhealthy",
            Verdict::Unchanged => "unchanged",
        }
    }
}

/// Operator-triggered pause of verdicts
#[derive(Debug, Default)]
pub struct SuspendWindow {
    suspend_time_sec: AtomicI64,
}

impl SuspendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self, now_sec: i64) {
        self.suspend_time_sec.store(now_sec, Ordering::Release);
    }

    pub fn suspend_time_sec(&self) -> i64 {
        self.suspend_time_sec.load(Ordering::Acquire)
    }

    pub fn is_active(&self, now_sec: i64, expire_duration_sec: i64) -> bool {
        within_window(self.suspend_time_sec(), now_sec, expire_duration_sec)
    }
}

/// True when `start_sec` is set and `now_sec` lies in `[start, start + expire)`
pub(crate) fn within_window(start_sec: i64, now_sec: i64, expire_duration_sec: i64) -> bool {
    if start_sec <= 0 {
        return false;
    }
    let elapsed = now_sec.saturating_sub(start_sec);
    elapsed >= 0 && elapsed < expire_duration_sec
}

/// No verdict; the caller's belief stands
pub(crate) fn unchanged(request: &CheckRequest, last_heartbeat_time_sec: i64) -> CheckResponse {
    CheckResponse {
        healthy: request.healthy,
        stay_unchanged: true,
        last_heartbeat_time_sec,
    }
}

/// Expiry test, reported as unchanged when it agrees with the caller
pub(crate) fn judge(
    request: &CheckRequest,
    now_sec: i64,
    last_heartbeat_time_sec: i64,
) -> CheckResponse {
    let expired =
        now_sec.saturating_sub(last_heartbeat_time_sec) >= request.expire_duration_sec;
    let healthy = !expired;
    CheckResponse {
        healthy,
        stay_unchanged: healthy == request.healthy,
        last_heartbeat_time_sec,
    }
}

/// Log real transitions and count verdicts
pub(crate) fn observe_verdict(
    backend: &'static str,
    request: &CheckRequest,
    now_sec: i64,
    response: &CheckResponse,
) {
    let verdict = response.verdict();
    match verdict {
        Verdict::Unchanged => debug!(
            backend,
            instance_id = %request.instance_id,
            now_sec,
            last_heartbeat_time_sec = response.last_heartbeat_time_sec,
            "Health unchanged"
        ),
        Verdict::Healthy | Verdict::Unhealthy => info!(
            backend,
            instance_id = %request.instance_id,
            now_sec,
            last_heartbeat_time_sec = response.last_heartbeat_time_sec,
            expire_duration_sec = request.expire_duration_sec,
            verdict = verdict.as_str(),
            "Instance health changed"
        ),
    }
    metrics().record_check_verdict(backend, verdict.as_str());
}
