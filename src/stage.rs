//! Latest-wins derived stages
//!
//! A stage watches an upstream `watch::Receiver<I>` and keeps a downstream
//! `watch::Receiver<O>` up to date:
//!
//! - [`switch_latest`] runs an async `tower::Service` per upstream value. A newer upstream
//!   value aborts the in-flight call, and only the result for the newest value is ever
//!   published. Failures are replaced by a fallback value and never escape the stage.
//! - [`map_latest`] applies a synchronous, total function on every upstream change.
//!
//! Stages must be created inside a tokio runtime; dropping a [`Stage`] aborts its driver and
//! any in-flight work.
//!
//! ```rust
//! use switchyard::{map_latest, StageConfig};
//! use tokio::sync::watch;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (tx, rx) = watch::channel(2_u32);
//! let doubled = map_latest(rx, |n: &u32| n * 2, StageConfig::new("double"));
//! assert_eq!(doubled.current(), 4);
//!
//! let mut out = doubled.subscribe();
//! tx.send_replace(5);
//! out.changed().await.unwrap();
//! assert_eq!(*out.borrow(), 10);
//! # });
//! ```

use crate::telemetry::{PipelineEvent, StageEvent, Telemetry};
use crate::{Sleeper, TokioSleeper};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_service::Service;

/// Per-stage settings.
#[derive(Clone, Debug)]
pub struct StageConfig {
    name: &'static str,
    debounce: Option<Duration>,
    skip_duplicates: bool,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl StageConfig {
    /// `name` labels log lines and telemetry events.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            debounce: None,
            skip_duplicates: false,
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::null(),
        }
    }

    /// Wait `window` after an upstream change before calling the service. A change within
    /// the window supersedes the pending call before it is issued.
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    /// Ignore upstream values equal to the last one dispatched.
    pub fn skip_duplicates(mut self) -> Self {
        self.skip_duplicates = true;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    async fn emit(&self, event: StageEvent) {
        self.telemetry.emit(PipelineEvent::Stage(event)).await;
    }
}

/// Aborts the wrapped task when dropped.
#[derive(Debug)]
pub(crate) struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self { handle: tokio::spawn(future) }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Let the task run to completion.
    pub(crate) async fn finish(mut self) {
        let _ = (&mut self.handle).await;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Generation-checked publisher. Advancing the generation and publishing share one lock, so
/// a result computed for an older generation can never be sent after a newer one started.
struct Latest<O> {
    generation: Mutex<u64>,
    tx: watch::Sender<O>,
}

impl<O> Latest<O> {
    fn new(tx: watch::Sender<O>) -> Self {
        Self { generation: Mutex::new(0), tx }
    }

    fn advance(&self) -> u64 {
        let mut current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *current += 1;
        *current
    }

    fn publish_if_current(&self, generation: u64, value: O) -> bool {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            return false;
        }
        self.tx.send_replace(value);
        true
    }
}

/// Observable output of a stage.
pub struct Stage<O> {
    name: &'static str,
    rx: watch::Receiver<O>,
    _driver: TaskGuard,
}

impl<O: Clone> Stage<O> {
    /// A fresh receiver; the current value counts as already seen.
    pub fn subscribe(&self) -> watch::Receiver<O> {
        let mut rx = self.rx.clone();
        rx.mark_unchanged();
        rx
    }

    pub fn current(&self) -> O {
        self.rx.borrow().clone()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<O> fmt::Debug for Stage<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Derive an async value from every upstream value, cancelling superseded work.
///
/// `initial` is observable until the first derivation publishes. A service error is logged
/// and replaced by `fallback(&input, error)`.
pub fn switch_latest<I, O, S, F>(
    mut upstream: watch::Receiver<I>,
    service: S,
    initial: O,
    fallback: F,
    config: StageConfig,
) -> Stage<O>
where
    I: Clone + PartialEq + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    S: Service<I, Response = O> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    F: Fn(&I, S::Error) -> O + Send + Sync + 'static,
{
    let name = config.name;
    let (tx, rx) = watch::channel(initial);
    let latest = Arc::new(Latest::new(tx));
    let fallback = Arc::new(fallback);

    let driver = TaskGuard::spawn(async move {
        let mut in_flight: Option<(u64, TaskGuard)> = None;
        let mut last_dispatched: Option<I> = None;
        let mut first = true;

        loop {
            if !first && upstream.changed().await.is_err() {
                break;
            }
            first = false;

            let input = upstream.borrow_and_update().clone();
            if config.skip_duplicates && last_dispatched.as_ref() == Some(&input) {
                tracing::trace!(stage = name, "duplicate upstream value ignored");
                continue;
            }
            last_dispatched = Some(input.clone());

            let generation = latest.advance();
            if let Some((previous, task)) = in_flight.take() {
                if !task.is_finished() {
                    drop(task);
                    tracing::debug!(stage = name, generation = previous, "superseded");
                    config.emit(StageEvent::Superseded { stage: name, generation: previous }).await;
                }
            }

            config.emit(StageEvent::Started { stage: name, generation }).await;
            let task = TaskGuard::spawn(derive(
                input,
                generation,
                service.clone(),
                fallback.clone(),
                latest.clone(),
                config.clone(),
            ));
            in_flight = Some((generation, task));
        }

        if let Some((_, task)) = in_flight {
            task.finish().await;
        }
        tracing::debug!(stage = name, "upstream closed; stage driver exiting");
    });

    Stage { name, rx, _driver: driver }
}

async fn derive<I, O, S, F>(
    input: I,
    generation: u64,
    service: S,
    fallback: Arc<F>,
    latest: Arc<Latest<O>>,
    config: StageConfig,
) where
    I: Clone,
    S: Service<I, Response = O>,
    S::Error: fmt::Display,
    F: Fn(&I, S::Error) -> O,
{
    let stage = config.name;
    if let Some(window) = config.debounce {
        config.sleeper.sleep(window).await;
    }

    let (value, used_fallback) = match service.oneshot(input.clone()).await {
        Ok(value) => (value, false),
        Err(error) => {
            tracing::warn!(stage, generation, %error, "derivation failed; publishing fallback");
            ((fallback)(&input, error), true)
        }
    };

    if latest.publish_if_current(generation, value) {
        config
            .emit(StageEvent::Published { stage, generation, fallback: used_fallback })
            .await;
    } else {
        tracing::debug!(stage, generation, "stale result discarded");
        config.emit(StageEvent::Discarded { stage, generation }).await;
    }
}

/// Derive a value synchronously from every upstream value.
///
/// The first value is computed before this function returns, so [`Stage::current`] is
/// immediately meaningful.
pub fn map_latest<I, O, G>(mut upstream: watch::Receiver<I>, f: G, config: StageConfig) -> Stage<O>
where
    I: Clone + PartialEq + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    G: Fn(&I) -> O + Send + Sync + 'static,
{
    let name = config.name;
    let seed = upstream.borrow_and_update().clone();
    let (tx, rx) = watch::channel(f(&seed));

    let driver = TaskGuard::spawn(async move {
        let mut last = seed;
        let mut generation = 1_u64;
        config.emit(StageEvent::Published { stage: name, generation, fallback: false }).await;

        while upstream.changed().await.is_ok() {
            let input = upstream.borrow_and_update().clone();
            if config.skip_duplicates && input == last {
                continue;
            }
            generation += 1;
            tx.send_replace(f(&input));
            last = input;
            config.emit(StageEvent::Published { stage: name, generation, fallback: false }).await;
        }
    });

    Stage { name, rx, _driver: driver }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use crate::InstantSleeper;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::util::BoxCloneService;

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    /// Service that takes `input` milliseconds and echoes it back, failing on zero.
    fn delayed_echo(completed: Arc<AtomicUsize>) -> BoxCloneService<u64, u64, TestError> {
        BoxCloneService::new(tower::service_fn(move |ms: u64| {
            let completed = completed.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                if ms == 0 {
                    Err(TestError("zero"))
                } else {
                    Ok(ms)
                }
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn newer_value_supersedes_in_flight_work() {
        let completed = Arc::new(AtomicUsize::new(0));
        let sink = MemorySink::new();
        let (tx, rx) = watch::channel(500_u64);
        let stage = switch_latest(
            rx,
            delayed_echo(completed.clone()),
            0,
            |_: &u64, _| u64::MAX,
            StageConfig::new("echo").with_telemetry(Telemetry::new(sink.clone())),
        );
        let mut out = stage.subscribe();

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send_replace(20);

        out.changed().await.unwrap();
        assert_eq!(*out.borrow(), 20);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stage.current(), 20, "slow result must never appear");
        assert_eq!(completed.load(Ordering::SeqCst), 1, "superseded call was cancelled");

        let events = sink.events();
        assert!(events.contains(&PipelineEvent::Stage(StageEvent::Superseded {
            stage: "echo",
            generation: 1
        })));
        assert!(events.contains(&PipelineEvent::Stage(StageEvent::Published {
            stage: "echo",
            generation: 2,
            fallback: false
        })));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_publishes_fallback_once() {
        let sink = MemorySink::new();
        let (_tx, rx) = watch::channel(0_u64);
        let stage = switch_latest(
            rx,
            delayed_echo(Arc::new(AtomicUsize::new(0))),
            1,
            |input: &u64, err: TestError| {
                assert_eq!(err.0, "zero");
                input + 100
            },
            StageConfig::new("fallible").with_telemetry(Telemetry::new(sink.clone())),
        );
        let mut out = stage.subscribe();

        out.changed().await.unwrap();
        assert_eq!(*out.borrow(), 100);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let fallbacks = sink.matching(|e| {
            matches!(e, PipelineEvent::Stage(StageEvent::Published { fallback: true, .. }))
        });
        assert_eq!(fallbacks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_collapses_rapid_changes() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let svc = tower::service_fn(move |s: String| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(s.clone());
                Ok::<_, TestError>(s.len())
            }
        });

        let (tx, rx) = watch::channel(String::from("o"));
        let stage = switch_latest(
            rx,
            svc,
            0,
            |_: &String, _| 0,
            StageConfig::new("typing").debounce(Duration::from_millis(250)),
        );

        for prefix in ["oc", "oct", "octo"] {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send_replace(prefix.to_string());
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(*calls.lock().unwrap(), vec!["octo".to_string()]);
        assert_eq!(stage.current(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_duplicates_ignores_repeated_values() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let svc = tower::service_fn(move |n: u8| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, TestError>(n) }
        });

        let (tx, rx) = watch::channel(1_u8);
        let _stage = switch_latest(
            rx,
            svc,
            0,
            |_: &u8, _| 0,
            StageConfig::new("dedupe").skip_duplicates().with_sleeper(InstantSleeper),
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
        tx.send_replace(1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        tx.send_replace(2);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_upstream_lets_last_task_finish() {
        let completed = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(50_u64);
        let stage = switch_latest(
            rx,
            delayed_echo(completed.clone()),
            0,
            |_: &u64, _| 0,
            StageConfig::new("closing"),
        );
        let mut out = stage.subscribe();
        drop(tx);

        out.changed().await.unwrap();
        assert_eq!(*out.borrow(), 50);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stage_cancels_in_flight_work() {
        let completed = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = watch::channel(100_u64);
        let stage = switch_latest(
            rx,
            delayed_echo(completed.clone()),
            0,
            |_: &u64, _| 0,
            StageConfig::new("dropped"),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(stage);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn map_latest_tracks_every_change() {
        let (tx, rx) = watch::channel(None::<u32>);
        let label = map_latest(
            rx,
            |n: &Option<u32>| n.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            StageConfig::new("label"),
        );
        assert_eq!(label.current(), "unknown");

        let mut out = label.subscribe();
        tx.send_replace(Some(7));
        out.changed().await.unwrap();
        assert_eq!(*out.borrow(), "7");

        tx.send_replace(None);
        out.changed().await.unwrap();
        assert_eq!(*out.borrow(), "unknown");
    }

    #[test]
    fn latest_rejects_stale_generations() {
        let (tx, rx) = watch::channel(0);
        let latest = Latest::new(tx);
        let old = latest.advance();
        let new = latest.advance();

        assert!(!latest.publish_if_current(old, 1));
        assert_eq!(*rx.borrow(), 0);
        assert!(latest.publish_if_current(new, 2));
        assert_eq!(*rx.borrow(), 2);
    }
}
