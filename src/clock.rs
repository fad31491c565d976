//! Wall-clock helpers
//!
//! Liveness decisions compare unix-second timestamps. Components take a
//! [`Clock`] so tests can pin "now".

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current unix time in seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Current unix time in seconds
pub fn unix_now_sec() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Clock reading the system time
pub fn system_clock() -> Clock {
    Arc::new(unix_now_sec)
}

/// Clock frozen at `now_sec`
pub fn fixed_clock(now_sec: i64) -> Clock {
    Arc::new(move || now_sec)
}
