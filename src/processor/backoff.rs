use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::{sleep, Instant};

/// Polling schedule with a growing delay and an overall deadline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub deadline: Duration,
}

impl PollBackoff {
    pub(crate) fn new(initial_delay: Duration, deadline: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: initial_delay,
            deadline,
        }
    }

    pub(crate) fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.initial_delay);
        self
    }
}

pub(crate) enum PollOutcome<T> {
    Ready(T),
    TimedOut { attempts: usize },
}

/// Calls `check` until it yields a value or the deadline passes. The check
/// always runs at least once, and never starts after the deadline.
pub(crate) async fn poll_until<T, F, Fut>(config: PollBackoff, mut check: F) -> PollOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        if let Some(value) = check(attempt).await {
            return PollOutcome::Ready(value);
        }

        let remaining = config.deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return PollOutcome::TimedOut { attempts: attempt };
        }

        pause(delay.min(remaining)).await;
        delay = next_backoff(delay, config.max_delay);
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        yield_now().await;
    } else {
        sleep(delay).await;
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
