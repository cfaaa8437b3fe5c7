//! Standalone retry-with-delay lookup against the GitHub API.
//!
//! ```text
//! RUST_LOG=switchyard=debug cargo run --example retry_request -- octocat
//! ```
use switchyard::github::{fetch_user_with_retry, FetchError, GithubClient};
use switchyard::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let username = std::env::args().nth(1).unwrap_or_else(|| "octocat".to_string());
    let config = PipelineConfig::default().with_env_overrides()?;
    let client = GithubClient::new(&config.github)?;

    let policy = config
        .retry
        .policy_builder::<FetchError>()?
        .should_retry(FetchError::is_transient)
        .build()?;

    match fetch_user_with_retry(&client, &username, &policy).await {
        Ok(user) => {
            println!("{} has {} public repositories", user.display_name(), user.public_repos);
            println!("avatar: {}", user.avatar_url);
        }
        Err(RetryError::Inner(err)) => println!("lookup failed: {err}"),
        Err(err) => println!("gave up: {err}"),
    }
    Ok(())
}
