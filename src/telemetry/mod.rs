//! Telemetry and observability for retry policies and pipeline stages.
//!
//! Policies and stages emit structured [`PipelineEvent`]s into a [`Telemetry`] handle.
//! Sinks are plain `tower::Service<PipelineEvent>` implementations, so they compose with
//! ordinary tower combinators.
//!
//! - **Retry**: `Attempt`, `Succeeded`, `Exhausted`
//! - **Stage**: `Started`, `Superseded`, `Published`, `Discarded`
//! - **Activity**: `Busy`, `Idle`
//!
//! ```rust
//! use switchyard::telemetry::{MemorySink, PipelineEvent, Telemetry};
//!
//! let sink = MemorySink::new();
//! let telemetry = Telemetry::new(sink.clone());
//! // hand `telemetry` to a RetryPolicy or StageConfig, then inspect `sink.events()`
//! # let _ = telemetry;
//! ```

pub mod events;
pub mod sinks;

pub use events::{ActivityEvent, PipelineEvent, RetryEvent, StageEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, Telemetry};
