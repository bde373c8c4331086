//! Time source for the operator loops.
//!
//! The seeding and monitor loops only wait for fixed intervals and stamp log
//! lines. Both go through [`Clock`] so tests can run them with a
//! [`ManualClock`] that advances instantly and records every wait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time::sleep`.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that never blocks: `sleep` advances `now` and is recorded.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|s| s.sleeps.clone())
            .unwrap_or_default()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .map(|s| s.now)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut s) = self.state.lock() {
            s.sleeps.push(duration);
            if let Ok(d) = chrono::Duration::from_std(duration) {
                s.now += d;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_without_waiting() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.sleep(Duration::from_secs(20)).await;
        clock.sleep(Duration::from_secs(5)).await;
        assert_eq!(clock.now() - start, chrono::Duration::seconds(25));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(20), Duration::from_secs(5)]
        );
        assert_eq!(clock.total_slept(), Duration::from_secs(25));
    }
}
