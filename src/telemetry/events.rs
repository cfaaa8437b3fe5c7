use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Structured events emitted by retry policies, pipeline stages, and the activity signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Retry policy events
    Retry(RetryEvent),
    /// Supersession stage events
    Stage(StageEvent),
    /// Network activity transitions
    Activity(ActivityEvent),
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// An attempt is about to start after waiting `delay`.
    Attempt {
        /// The attempt number (1-indexed)
        attempt: usize,
        /// Jittered delay awaited before this attempt
        delay: Duration,
    },
    /// The operation succeeded.
    Succeeded {
        /// Attempts consumed, including the successful one
        attempts: usize,
    },
    /// All attempts failed.
    Exhausted {
        /// Total number of attempts made
        total_attempts: usize,
        /// Total time spent, including delays
        total_duration: Duration,
    },
}

/// Events emitted by `switch_latest` / `map_latest` stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// Derived work started for a new upstream value.
    Started { stage: &'static str, generation: u64 },
    /// In-flight work was cancelled because a newer upstream value arrived.
    Superseded { stage: &'static str, generation: u64 },
    /// A value became observable downstream.
    Published {
        stage: &'static str,
        generation: u64,
        /// `true` when the value came from the stage's fallback after a failure
        fallback: bool,
    },
    /// A finished result was dropped because it was no longer the latest.
    Discarded { stage: &'static str, generation: u64 },
}

/// Network activity transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    /// First request went in flight.
    Busy,
    /// Last in-flight request finished or was cancelled.
    Idle,
}

impl PipelineEvent {
    /// Convert into a JSON value for log shipping.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PipelineEvent::Retry(r) => match r {
                RetryEvent::Attempt { attempt, delay } => json!({
                    "kind": "retry_attempt",
                    "attempt": *attempt,
                    "delay_ms": clamp_u64(delay.as_millis()),
                }),
                RetryEvent::Succeeded { attempts } => json!({
                    "kind": "retry_succeeded",
                    "attempts": *attempts,
                }),
                RetryEvent::Exhausted { total_attempts, total_duration } => json!({
                    "kind": "retry_exhausted",
                    "attempts": *total_attempts,
                    "duration_ms": clamp_u64(total_duration.as_millis()),
                }),
            },
            PipelineEvent::Stage(s) => match s {
                StageEvent::Started { stage, generation } => json!({
                    "kind": "stage_started", "stage": stage, "generation": generation,
                }),
                StageEvent::Superseded { stage, generation } => json!({
                    "kind": "stage_superseded", "stage": stage, "generation": generation,
                }),
                StageEvent::Published { stage, generation, fallback } => json!({
                    "kind": "stage_published",
                    "stage": stage,
                    "generation": generation,
                    "fallback": fallback,
                }),
                StageEvent::Discarded { stage, generation } => json!({
                    "kind": "stage_discarded", "stage": stage, "generation": generation,
                }),
            },
            PipelineEvent::Activity(a) => match a {
                ActivityEvent::Busy => json!({ "kind": "activity_busy" }),
                ActivityEvent::Idle => json!({ "kind": "activity_idle" }),
            },
        }
    }

    /// Stage name, for stage events.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            PipelineEvent::Stage(
                StageEvent::Started { stage, .. }
                | StageEvent::Superseded { stage, .. }
                | StageEvent::Published { stage, .. }
                | StageEvent::Discarded { stage, .. },
            ) => Some(*stage),
            _ => None,
        }
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::Retry(event) => write!(f, "Retry::{}", event),
            PipelineEvent::Stage(event) => write!(f, "Stage::{}", event),
            PipelineEvent::Activity(event) => write!(f, "Activity::{:?}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Succeeded { attempts } => write!(f, "Succeeded(attempts={})", attempts),
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
        }
    }
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageEvent::Started { stage, generation } => {
                write!(f, "Started({}#{})", stage, generation)
            }
            StageEvent::Superseded { stage, generation } => {
                write!(f, "Superseded({}#{})", stage, generation)
            }
            StageEvent::Published { stage, generation, fallback } => {
                write!(f, "Published({}#{}, fallback={})", stage, generation, fallback)
            }
            StageEvent::Discarded { stage, generation } => {
                write!(f, "Discarded({}#{})", stage, generation)
            }
        }
    }
}
