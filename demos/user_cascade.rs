//! Drives the username → user → (repository count, avatar) cascade with simulated typing.
//!
//! ```text
//! RUST_LOG=switchyard=debug cargo run --example user_cascade -- octocat torvalds
//! ```
use std::time::Duration;
use switchyard::prelude::*;
use switchyard::telemetry::LogSink;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        names = vec!["octocat".into(), "torvalds".into()];
    }

    let config = PipelineConfig::default().with_env_overrides()?;
    let client = GithubClient::new(&config.github)?;
    let ctx = PipelineContext::new().with_telemetry(Telemetry::new(LogSink));
    let pipeline = UserCascade::from_client(&client, &config, ctx)?;

    let mut counts = pipeline.subscribe_repository_count();
    let mut avatars = pipeline.subscribe_avatar();
    let mut loading = pipeline.subscribe_loading();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok(()) = counts.changed() => println!("repositories: {}", *counts.borrow_and_update()),
                Ok(()) = avatars.changed() => println!("avatar: {}", *avatars.borrow_and_update()),
                Ok(()) = loading.changed() => println!("loading: {}", *loading.borrow_and_update()),
                else => break,
            }
        }
    });

    for name in &names {
        // Type the name one character at a time; only the settled name is looked up.
        for end in 1..=name.len() {
            if name.is_char_boundary(end) {
                pipeline.set_username(&name[..end]);
                tokio::time::sleep(Duration::from_millis(80)).await;
            }
        }
        tokio::time::sleep(Duration::from_secs(8)).await;
    }

    drop(pipeline);
    let _ = printer.await;
    Ok(())
}
