//! GitHub user lookup built on the retry and cascade primitives
//!
//! - [`GithubClient`] talks to the REST API through `reqwest` and exposes its two calls as
//!   tower services.
//! - [`UserCascade`] wires those services into a username → user → (repository count,
//!   avatar) cascade.
//! - [`fetch_user_with_retry`] is the standalone retry-with-delay lookup.

mod client;
mod error;
mod model;
mod pipeline;

pub use client::{decode_avatar, decode_user, GithubClient};
pub use error::FetchError;
pub use model::{repository_count_label, Avatar, GithubUser, ImageFormat, UNKNOWN_REPOSITORY_COUNT};
pub use pipeline::{fetch_user_with_retry, PipelineContext, UserCascade};
