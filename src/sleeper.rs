//! Abstraction for waiting out jitter and debounce windows
//!
//! Production code sleeps on the tokio timer; tests swap in [`InstantSleeper`] or
//! [`TrackingSleeper`] so retry and debounce logic can be exercised without real delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Abstraction for sleeping/waiting
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Production sleeper using tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Sleeper that returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async {})
    }
}

/// Sleeper that records every requested duration and returns immediately.
///
/// Clones share the same log, so a test can keep one handle and give another to the policy.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sleeps requested so far.
    pub fn calls(&self) -> usize {
        self.log().len()
    }

    /// Duration requested by the `idx`-th sleep.
    pub fn call_at(&self, idx: usize) -> Option<Duration> {
        self.log().get(idx).copied()
    }

    /// All recorded durations, oldest first.
    pub fn durations(&self) -> Vec<Duration> {
        self.log().clone()
    }

    pub fn clear(&self) {
        self.log().clear();
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<Duration>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.log().push(duration);
        Box::pin(async {})
    }
}

impl<S: Sleeper + ?Sized> Sleeper for Arc<S> {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        (**self).sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instant_sleeper_returns_immediately() {
        let start = std::time::Instant::now();
        InstantSleeper.sleep(Duration::from_secs(10)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn tracking_sleeper_records_in_order() {
        let sleeper = TrackingSleeper::new();
        let shared = sleeper.clone();

        shared.sleep(Duration::from_millis(120)).await;
        shared.sleep(Duration::from_millis(7)).await;

        assert_eq!(sleeper.calls(), 2);
        assert_eq!(sleeper.call_at(0), Some(Duration::from_millis(120)));
        assert_eq!(sleeper.call_at(1), Some(Duration::from_millis(7)));
        assert_eq!(sleeper.call_at(2), None);

        sleeper.clear();
        assert!(sleeper.durations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_runtime_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(300)).await;
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn arc_sleeper_delegates() {
        let tracking = Arc::new(TrackingSleeper::new());
        let as_dyn: Arc<dyn Sleeper> = tracking.clone();
        as_dyn.sleep(Duration::from_millis(3)).await;
        assert_eq!(tracking.calls(), 1);
    }
}
