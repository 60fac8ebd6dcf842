//! Time source for the waiter
//!
//! The waiter never reads a global clock directly. [`TokioClock`] follows the
//! tokio timer (so paused-time tests work); [`ManualClock`] is a fully virtual
//! clock whose `sleep` advances time instantly and records the request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

#[async_trait]
impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

/// Wall clock anchored once, advanced by the tokio monotonic timer
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.origin.elapsed();
        chrono::Duration::from_std(elapsed)
            .map(|offset| self.origin_wall + offset)
            .unwrap_or(self.origin_wall)
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

/// Virtual clock for deterministic, sleep-free tests
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

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.now = shift(state.now, duration);
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.state.lock().sleeps.iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.sleeps.push(duration);
        state.now = shift(state.now, duration);
    }
}

fn shift(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|offset| at.checked_add_signed(offset))
        .unwrap_or(at)
}

/// Non-negative elapsed time between two instants of the same clock
pub fn elapsed_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or(Duration::ZERO)
}
