use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::unix_now_sec;
use crate::metrics::metrics;

use super::transport::Transport;

/// Period between probe rounds
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Probes issued per round
const PROBES_PER_ROUND: usize = 3;

/// Failed probes in one round that mark the store dead
const DEAD_THRESHOLD: usize = 2;

/// State change produced by a probe round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessTransition {
    Died,
    Recovered,
}

/// Reachability of one remote store, as seen by its pool's prober
///
/// Written only by the prober, read on every operation.
#[derive(Debug, Default)]
pub struct StoreLiveness {
    dead: AtomicBool,
    /// Unix seconds of the last dead → alive transition, 0 while dead or never dead
    recover_time_sec: AtomicI64,
}

impl StoreLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn recover_time_sec(&self) -> i64 {
        self.recover_time_sec.load(Ordering::Acquire)
    }

    /// Returns true if this call flipped the store to dead
    pub fn mark_dead(&self) -> bool {
        if self
            .dead
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.recover_time_sec.store(0, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Returns true if this call flipped the store back to alive
    pub fn mark_alive(&self, now_sec: i64) -> bool {
        if self
            .dead
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.recover_time_sec.store(now_sec, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Apply the outcome of one probe round
    pub fn record_round(&self, failures: usize, now_sec: i64) -> Option<LivenessTransition> {
        if failures >= DEAD_THRESHOLD {
            self.mark_dead().then_some(LivenessTransition::Died)
        } else {
            self.mark_alive(now_sec).then_some(LivenessTransition::Recovered)
        }
    }
}

/// Probe the store every [`PROBE_INTERVAL`] until `shutdown` fires
pub(crate) async fn run_prober(
    transport: Arc<dyn Transport>,
    liveness: Arc<StoreLiveness>,
    shutdown: CancellationToken,
) {
    // Random initial delay to stagger pools created together
    let initial_delay = rand::thread_rng().gen_range(0..PROBE_INTERVAL.as_millis() as u64);
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(Duration::from_millis(initial_delay)) => {}
    }

    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(addr = %transport.address(), "Store prober stopped");
                break;
            }
            _ = ticker.tick() => {
                probe_round(transport.as_ref(), &liveness).await;
            }
        }
    }
}

async fn probe_round(transport: &dyn Transport, liveness: &StoreLiveness) {
    let addr = transport.address();
    let mut failures = 0;
    for _ in 0..PROBES_PER_ROUND {
        if let Err(e) = transport.ping().await {
            failures += 1;
            debug!(addr = %addr, error = %e, "Store probe failed");
        }
    }
    if failures > 0 {
        metrics().record_probe_failures(addr, failures as u64);
    }

    match liveness.record_round(failures, unix_now_sec()) {
        Some(LivenessTransition::Died) => {
            error!(addr = %addr, failures, "Remote store is dead");
            metrics().set_store_dead(addr, true);
        }
        Some(LivenessTransition::Recovered) => {
            info!(
                addr = %addr,
                recover_time_sec = liveness.recover_time_sec(),
                "Remote store recovered"
            );
            metrics().set_store_dead(addr, false);
        }
        None => {}
    }
}
