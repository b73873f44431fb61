//! Time source used for timestamps, acquisition deadlines, retry backoff and
//! low-power suspension.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[allow(async_fn_in_trait)]
pub trait Clock: Clone {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Virtual clock: `sleep` returns immediately after moving time forward.
///
/// Clones share the same timeline, so a fake peripheral holding a clone can
/// observe (or advance) the time seen by the scheduler.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        // A panic while holding the lock cannot leave the state half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        forward(&mut self.lock().now, duration);
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn last_sleep(&self) -> Option<Duration> {
        self.lock().sleeps.last().copied()
    }
}

fn forward(now: &mut DateTime<Utc>, duration: Duration) {
    let advanced = chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta));
    if let Some(advanced) = advanced {
        *now = advanced;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.lock();
            forward(&mut state.now, duration);
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances_time() {
        tokio_test::block_on(async {
            let start = DateTime::from_timestamp(1_000, 0).unwrap();
            let clock = ManualClock::new(start);
            let shared = clock.clone();

            clock.sleep(Duration::from_secs(300)).await;
            shared.advance(Duration::from_secs(5));

            assert_eq!(clock.now().timestamp(), 1_305);
            assert_eq!(shared.sleeps(), vec![Duration::from_secs(300)]);
        });
    }
}
