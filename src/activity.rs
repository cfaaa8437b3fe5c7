//! Network-activity signal
//!
//! An [`ActivityIndicator`] counts in-flight requests and exposes a `watch::Receiver<bool>`
//! that is `true` while at least one request is running. Wrap any service with
//! [`ActivityLayer`] to have it participate.
//!
//! ```rust
//! use switchyard::ActivityIndicator;
//!
//! let activity = ActivityIndicator::new();
//! let rx = activity.subscribe();
//! {
//!     let _guard = activity.begin();
//!     assert!(*rx.borrow());
//! }
//! assert!(!*rx.borrow());
//! ```

use crate::telemetry::{ActivityEvent, PipelineEvent, Telemetry};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tower_layer::Layer;
use tower_service::Service;

#[derive(Debug, Default)]
struct State {
    in_flight: usize,
    /// Feeds the single task that forwards transitions to telemetry, in order.
    events: Option<mpsc::UnboundedSender<ActivityEvent>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    tx: watch::Sender<bool>,
    telemetry: Telemetry,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-flight counter with an observable busy flag.
#[derive(Debug, Clone)]
pub struct ActivityIndicator {
    shared: Arc<Shared>,
}

impl ActivityIndicator {
    pub fn new() -> Self {
        Self::with_telemetry(Telemetry::null())
    }

    /// Indicator that reports `Busy`/`Idle` transitions to `telemetry`, in the order they
    /// happened.
    pub fn with_telemetry(telemetry: Telemetry) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { shared: Arc::new(Shared { state: Mutex::new(State::default()), tx, telemetry }) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        *self.shared.tx.borrow()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state().in_flight
    }

    /// Mark one request as in flight until the returned guard is dropped.
    pub fn begin(&self) -> ActivityGuard {
        transition(&self.shared, Delta::Up);
        ActivityGuard { shared: self.shared.clone() }
    }
}

impl Default for ActivityIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
enum Delta {
    Up,
    Down,
}

// The count, the flag and the event queue change under the same lock, so the flag always
// matches the count and events are queued in transition order.
fn transition(shared: &Shared, delta: Delta) {
    let mut state = shared.state();
    let event = match delta {
        Delta::Up => {
            state.in_flight += 1;
            (state.in_flight == 1).then_some(ActivityEvent::Busy)
        }
        Delta::Down => {
            state.in_flight = state.in_flight.saturating_sub(1);
            (state.in_flight == 0).then_some(ActivityEvent::Idle)
        }
    };
    let Some(event) = event else {
        return;
    };

    shared.tx.send_replace(event == ActivityEvent::Busy);
    tracing::trace!(?event, "network activity changed");
    enqueue(shared, &mut state, event);
}

fn enqueue(shared: &Shared, state: &mut State, event: ActivityEvent) {
    if let Some(events) = &state.events {
        if events.send(event).is_ok() {
            return;
        }
    }
    // No forwarder yet, or the runtime it ran on is gone. Guards dropped outside any
    // runtime skip telemetry.
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        state.events = None;
        return;
    };
    let (events, mut rx) = mpsc::unbounded_channel();
    let telemetry = shared.telemetry.clone();
    handle.spawn(async move {
        while let Some(event) = rx.recv().await {
            telemetry.emit(PipelineEvent::Activity(event)).await;
        }
    });
    let _ = events.send(event);
    state.events = Some(events);
}

/// Keeps one request counted as in flight. Dropping it (including via task abort) releases it.
#[derive(Debug)]
#[must_use = "activity ends as soon as the guard is dropped"]
pub struct ActivityGuard {
    shared: Arc<Shared>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        transition(&self.shared, Delta::Down);
    }
}

/// Layer marking every call of the wrapped service as network activity.
#[derive(Debug, Clone)]
pub struct ActivityLayer {
    indicator: ActivityIndicator,
}

impl ActivityLayer {
    pub fn new(indicator: ActivityIndicator) -> Self {
        Self { indicator }
    }
}

impl<S> Layer<S> for ActivityLayer {
    type Service = ActivityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ActivityService { inner, indicator: self.indicator.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityService<S> {
    inner: S,
    indicator: ActivityIndicator,
}

impl<S, Request> Service<Request> for ActivityService<S>
where
    S: Service<Request> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let guard = self.indicator.begin();
        let fut = self.inner.call(req);
        Box::pin(async move {
            let _guard = guard;
            fut.await
        })
    }
}
