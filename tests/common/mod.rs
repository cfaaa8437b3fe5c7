#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::github::{Avatar, FetchError, GithubUser, ImageFormat};
use tower::util::BoxCloneService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError(pub String);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

pub fn user(login: &str, repos: u32) -> GithubUser {
    GithubUser {
        login: login.to_string(),
        name: None,
        public_repos: repos,
        avatar_url: format!("https://avatars.example/{login}.png"),
    }
}

pub fn image(url: &str) -> Avatar {
    Avatar::Image {
        url: url.to_string(),
        format: ImageFormat::Png,
        bytes: Arc::from(&b"\x89PNG\r\n\x1a\n"[..]),
    }
}

/// Scripted user lookups: per-username latency and a queue of outcomes. The last outcome
/// repeats once the queue is down to one entry.
#[derive(Clone, Default)]
pub struct MockUsers {
    script: Arc<Mutex<HashMap<String, (Duration, Vec<Result<GithubUser, FetchError>>)>>>,
    calls: Arc<Mutex<Vec<String>>>,
    completed: Arc<AtomicUsize>,
}

impl MockUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(
        self,
        username: &str,
        latency: Duration,
        outcomes: Vec<Result<GithubUser, FetchError>>,
    ) -> Self {
        self.script.lock().unwrap().insert(username.to_string(), (latency, outcomes));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, username: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == username).count()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Every username that reaches the service is recorded as a call.
    pub fn service(&self) -> BoxCloneService<String, Option<GithubUser>, FetchError> {
        let mock = self.clone();
        BoxCloneService::new(tower::service_fn(move |username: String| {
            let mock = mock.clone();
            async move {
                mock.calls.lock().unwrap().push(username.clone());
                let (latency, outcome) = {
                    let mut script = mock.script.lock().unwrap();
                    match script.get_mut(&username) {
                        Some((latency, outcomes)) => {
                            let outcome = if outcomes.len() > 1 {
                                outcomes.remove(0)
                            } else {
                                outcomes[0].clone()
                            };
                            (*latency, outcome)
                        }
                        None => (Duration::ZERO, Err(FetchError::Status(404))),
                    }
                };
                tokio::time::sleep(latency).await;
                mock.completed.fetch_add(1, Ordering::SeqCst);
                outcome.map(Some)
            }
        }))
    }
}

/// Avatar fetches keyed by URL; unknown URLs fail with 404.
#[derive(Clone, Default)]
pub struct MockAvatars {
    latency: Duration,
    failing: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockAvatars {
    pub fn new(latency: Duration) -> Self {
        Self { latency, ..Default::default() }
    }

    pub fn fail_for(self, login: &str) -> Self {
        self.failing.lock().unwrap().push(format!("https://avatars.example/{login}.png"));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn service(&self) -> BoxCloneService<Option<GithubUser>, Avatar, FetchError> {
        let mock = self.clone();
        BoxCloneService::new(tower::service_fn(move |user: Option<GithubUser>| {
            let mock = mock.clone();
            async move {
                let Some(user) = user else {
                    return Ok(Avatar::Placeholder);
                };
                mock.calls.lock().unwrap().push(user.avatar_url.clone());
                tokio::time::sleep(mock.latency).await;
                if mock.failing.lock().unwrap().contains(&user.avatar_url) {
                    Err(FetchError::Status(404))
                } else {
                    Ok(image(&user.avatar_url))
                }
            }
        }))
    }
}
