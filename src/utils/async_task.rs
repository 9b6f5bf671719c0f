use std::time::Duration;

use rand::Rng;
use tracing::error;

use crate::BackoffPolicy;
use crate::Result;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max_delay_ms`, with up to 50% random jitter subtracted.
pub fn backoff_delay(
    policy: &BackoffPolicy,
    attempt: u32,
) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let raw = policy.base_delay_ms.saturating_mul(1u64 << exp);
    let capped = raw.min(policy.max_delay_ms).max(1);
    let jitter = rand::thread_rng().gen_range(0..=capped / 2);
    Duration::from_millis(capped - jitter)
}

/// Spawns `task_fn`, logging its error, and tracks the handle when asked.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<tokio::task::JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
