use super::events::PipelineEvent;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tower::util::BoxCloneService;
use tower::Service;

type SinkFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Telemetry never blocks the pipeline: if a sink is not ready or fails, the event is dropped.
pub async fn emit_best_effort<S>(sink: S, event: PipelineEvent)
where
    S: tower::Service<PipelineEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PipelineEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PipelineEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

/// A telemetry sink that logs events using the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<PipelineEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PipelineEvent) -> Self::Future {
        tracing::info!(event = %event, "pipeline_event");
        Box::pin(async { Ok(()) })
    }
}

/// A telemetry sink that stores events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.guard().clone()
    }

    /// Events matching a predicate, oldest first.
    pub fn matching<F>(&self, mut predicate: F) -> Vec<PipelineEvent>
    where
        F: FnMut(&PipelineEvent) -> bool,
    {
        self.guard().iter().filter(|e| predicate(e)).cloned().collect()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn guard(&self) -> MutexGuard<'_, Vec<PipelineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<PipelineEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PipelineEvent) -> Self::Future {
        let mut guard = self.guard();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

/// Cloneable, shareable handle to a type-erased sink.
///
/// Policies and stages hold a `Telemetry` rather than a generic sink so their own types stay
/// simple. The mutex only guards the clone of the boxed service; emission itself runs outside it.
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<Mutex<BoxCloneService<PipelineEvent, (), Infallible>>>,
}

impl Telemetry {
    pub fn new<S>(sink: S) -> Self
    where
        S: Service<PipelineEvent, Response = (), Error = Infallible> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        Self { sink: Arc::new(Mutex::new(BoxCloneService::new(sink))) }
    }

    /// Telemetry that discards everything.
    pub fn null() -> Self {
        Self::new(NullSink)
    }

    pub async fn emit(&self, event: PipelineEvent) {
        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner).clone();
        emit_best_effort(sink, event).await;
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::null()
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").field("sink", &"<sink>").finish()
    }
}
