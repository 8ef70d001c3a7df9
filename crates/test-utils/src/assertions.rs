//! Polling helpers for asynchronous effects such as fan-out delivery.

use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep};

/// Interval between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition held. It is checked once more after the
/// deadline, so a slow last poll is not lost.
///
/// ```no_run
/// use std::time::Duration;
/// use tagindex_test_utils::assert_eventually;
///
/// # async fn example(pending: impl Fn() -> usize) {
/// assert!(assert_eventually(Duration::from_secs(2), || pending() == 0).await);
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Awaits `poll` repeatedly until it yields `Some`, or `timeout` elapses.
///
/// For conditions that need a network round trip, like querying a shard
/// until a fan-out write lands.
pub async fn poll_until<T, F, Fut>(timeout: Duration, mut poll: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = poll().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(POLL_INTERVAL).await;
    }
}
