//! One source value, one primary derivation, two independent downstream derivations
//!
//! ```text
//!              +--> label   = G(U)   (map_latest, total)
//! V --F--> U --+
//!              +--> derived = H(U)   (switch_latest, fallback on failure)
//! ```
//!
//! Every async edge is latest-wins: a new `V` cancels the in-flight `F`, and a new `U`
//! cancels the in-flight `H`. Failures in `F` or `H` publish that stage's fallback and
//! never reach the source or the sibling branch.

use crate::stage::{map_latest, switch_latest, Stage, StageConfig};
use std::fmt;
use tokio::sync::watch;
use tower_service::Service;

/// An async branch: a service with its initial value, fallback, and stage settings.
pub struct Branch<S, F, O> {
    service: S,
    initial: O,
    fallback: F,
    config: StageConfig,
}

impl<S, F, O> Branch<S, F, O> {
    pub fn new(name: &'static str, service: S, initial: O, fallback: F) -> Self {
        Self { service, initial, fallback, config: StageConfig::new(name) }
    }

    /// Replace the stage settings. The branch name comes from `config`.
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    fn spawn<I>(self, upstream: watch::Receiver<I>) -> Stage<O>
    where
        I: Clone + PartialEq + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
        S: Service<I, Response = O> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: fmt::Display + Send + 'static,
        F: Fn(&I, S::Error) -> O + Send + Sync + 'static,
    {
        switch_latest(upstream, self.service, self.initial, self.fallback, self.config)
    }
}

/// A synchronous, total branch.
pub struct LabelBranch<G> {
    derive: G,
    config: StageConfig,
}

impl<G> LabelBranch<G> {
    pub fn new(name: &'static str, derive: G) -> Self {
        Self { derive, config: StageConfig::new(name) }
    }

    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }
}

/// Running cascade. Dropping it tears down every stage.
pub struct Cascade<V, U, L, A> {
    input: watch::Sender<V>,
    primary: Stage<U>,
    label: Stage<L>,
    derived: Stage<A>,
}

impl<V, U, L, A> Cascade<V, U, L, A>
where
    V: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    L: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Wire the stages together and start them. Must be called inside a tokio runtime.
    pub fn spawn<PS, PF, G, DS, DF>(
        initial: V,
        primary: Branch<PS, PF, U>,
        label: LabelBranch<G>,
        derived: Branch<DS, DF, A>,
    ) -> Self
    where
        PS: Service<V, Response = U> + Clone + Send + 'static,
        PS::Future: Send + 'static,
        PS::Error: fmt::Display + Send + 'static,
        PF: Fn(&V, PS::Error) -> U + Send + Sync + 'static,
        G: Fn(&U) -> L + Send + Sync + 'static,
        DS: Service<U, Response = A> + Clone + Send + 'static,
        DS::Future: Send + 'static,
        DS::Error: fmt::Display + Send + 'static,
        DF: Fn(&U, DS::Error) -> A + Send + Sync + 'static,
    {
        let (input, source) = watch::channel(initial);
        let primary = primary.spawn(source);
        let label = map_latest(primary.subscribe(), label.derive, label.config);
        let derived = derived.spawn(primary.subscribe());
        Self { input, primary, label, derived }
    }

    /// Publish a new source value.
    pub fn set_input(&self, value: V) {
        self.input.send_replace(value);
    }

    pub fn input(&self) -> V {
        self.input.borrow().clone()
    }

    pub fn primary(&self) -> U {
        self.primary.current()
    }

    pub fn label(&self) -> L {
        self.label.current()
    }

    pub fn derived(&self) -> A {
        self.derived.current()
    }

    pub fn subscribe_input(&self) -> watch::Receiver<V> {
        self.input.subscribe()
    }

    pub fn subscribe_primary(&self) -> watch::Receiver<U> {
        self.primary.subscribe()
    }

    pub fn subscribe_label(&self) -> watch::Receiver<L> {
        self.label.subscribe()
    }

    pub fn subscribe_derived(&self) -> watch::Receiver<A> {
        self.derived.subscribe()
    }
}

impl<V, U, L, A> fmt::Debug for Cascade<V, U, L, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cascade")
            .field("primary", &self.primary)
            .field("label", &self.label)
            .field("derived", &self.derived)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn primary_failure_yields_sentinel_label() {
        let primary = tower::service_fn(|v: String| async move {
            if v == "bad" {
                Err(Boom)
            } else {
                Ok(Some(v.len()))
            }
        });
        let derived = tower::service_fn(|u: Option<usize>| async move {
            u.map(|n| n * 10).ok_or(Boom)
        });

        let cascade = Cascade::spawn(
            "good".to_string(),
            Branch::new("primary", primary, None, |_: &String, _| None),
            LabelBranch::new("label", |u: &Option<usize>| {
                u.map_or_else(|| "unknown".to_string(), |n| n.to_string())
            }),
            Branch::new("derived", derived, 0, |_: &Option<usize>, _| usize::MAX),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cascade.primary(), Some(4));
        assert_eq!(cascade.label(), "4");
        assert_eq!(cascade.derived(), 40);

        cascade.set_input("bad".to_string());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cascade.input(), "bad");
        assert_eq!(cascade.primary(), None);
        assert_eq!(cascade.label(), "unknown");
        assert_eq!(cascade.derived(), usize::MAX, "derived branch published its own fallback");
    }
}
