use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::task::Resp;

/// Run `op` up to `max_attempts` times, sleeping `backoff` between attempts
///
/// Only responses flagged retryable are resubmitted; success and terminal
/// errors return immediately.
pub async fn with_retries<F, Fut>(max_attempts: usize, backoff: Duration, mut op: F) -> Resp
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Resp>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let resp = op().await;
        let Some(err) = resp.err.as_ref() else {
            return resp;
        };
        if !resp.retryable || attempt >= max_attempts {
            return resp;
        }
        warn!(attempt, max_attempts, error = %err, "Store operation failed, retrying");
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}
