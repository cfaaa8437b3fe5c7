#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # switchyard
//!
//! Retry-with-delay requests and latest-wins cascading pipelines for async Rust.
//!
//! ## Features
//!
//! - **Bounded retry** with a jittered delay before every attempt and a retryability predicate
//! - **Latest-wins stages**: async derivations that cancel superseded work and never publish
//!   stale results
//! - **Cascades**: one source, one primary derivation, two isolated downstream branches
//! - **Network-activity signal** shared by every wrapped request
//! - **GitHub user lookup** wired from the pieces above
//!
//! Every fetch is a `tower::Service`; retry and activity signalling are `Layer`s.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use switchyard::{Jitter, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = RetryPolicy::<std::io::Error>::builder()
//!         .max_retries(3)
//!         .with_jitter(Jitter::uniform(Duration::from_millis(1), Duration::from_millis(5)).unwrap())
//!         .build()
//!         .unwrap();
//!
//!     let result = policy.execute(|| async { Ok::<_, std::io::Error>("done") }).await;
//!     assert_eq!(result.unwrap(), "done");
//! }
//! ```

pub mod activity;
pub mod cascade;
pub mod config;
pub mod error;
pub mod github;
pub mod jitter;
pub mod prelude;
pub mod retry;
pub mod sleeper;
pub mod stage;
pub mod telemetry;

// Re-exports
pub use activity::{ActivityGuard, ActivityIndicator, ActivityLayer, ActivityService};
pub use cascade::{Branch, Cascade, LabelBranch};
pub use config::{CascadeConfig, ConfigError, GithubConfig, PipelineConfig, RetryConfig};
pub use error::{RetryError, MAX_RETRY_FAILURES};
pub use jitter::{Jitter, JitterError, JitterRange};
pub use retry::{BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stage::{map_latest, switch_latest, Stage, StageConfig};
pub use telemetry::Telemetry;
