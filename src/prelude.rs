//! Convenient re-exports for common switchyard types.
pub use crate::{
    activity::{ActivityIndicator, ActivityLayer},
    cascade::{Branch, Cascade, LabelBranch},
    config::PipelineConfig,
    github::{Avatar, FetchError, GithubClient, GithubUser, PipelineContext, UserCascade},
    jitter::Jitter,
    retry::{BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder, MAX_RETRY_BOUND},
    stage::{map_latest, switch_latest, StageConfig},
    telemetry::{MemorySink, PipelineEvent, Telemetry},
    RetryError,
};
