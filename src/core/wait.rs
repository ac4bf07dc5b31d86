use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::portal::{ControlDescriptor, Portal};

/// Polls `condition` every `interval` until it yields `true` or `timeout`
/// elapses. Errors from the condition count as "not yet".
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if matches!(condition().await, Ok(true)) {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

pub async fn wait_for_control<P: Portal + ?Sized>(
    portal: &P,
    control: &ControlDescriptor,
    min_count: usize,
    timeout: Duration,
    interval: Duration,
) -> bool {
    poll_until(timeout, interval, || async move {
        Ok(portal.count(control).await? >= min_count)
    })
    .await
}
