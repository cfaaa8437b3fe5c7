use super::client::GithubClient;
use super::error::FetchError;
use super::model::{repository_count_label, Avatar, GithubUser};
use crate::cascade::{Branch, Cascade, LabelBranch};
use crate::config::{ConfigError, PipelineConfig};
use crate::telemetry::Telemetry;
use crate::{
    ActivityIndicator, ActivityLayer, RetryError, RetryLayer, RetryPolicy, Sleeper, StageConfig,
    TokioSleeper,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower::util::BoxCloneService;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Shared runtime collaborators for a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    activity: ActivityIndicator,
    telemetry: Telemetry,
    sleeper: Arc<dyn Sleeper>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            activity: ActivityIndicator::new(),
            telemetry: Telemetry::null(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_activity(mut self, activity: ActivityIndicator) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Sleeper used for retry jitter and input debouncing.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn activity(&self) -> &ActivityIndicator {
        &self.activity
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch one user with the retry-with-delay policy: jittered wait, attempt, repeat on
/// transient failure until the bound is spent.
pub async fn fetch_user_with_retry(
    client: &GithubClient,
    username: &str,
    policy: &RetryPolicy<FetchError>,
) -> Result<GithubUser, RetryError<FetchError>> {
    policy.execute(|| client.fetch_user(username)).await
}

type Inner = Cascade<String, Option<GithubUser>, String, Avatar>;

/// Whether `username` is long enough to be worth a request. Callers pass it trimmed.
fn is_lookup_candidate(username: &str, min_len: usize) -> bool {
    !username.is_empty() && username.chars().count() >= min_len
}

/// Username → user → (repository count label, avatar), with latest-wins semantics on every
/// edge and a shared network-activity flag.
pub struct UserCascade {
    cascade: Inner,
    activity: ActivityIndicator,
}

impl UserCascade {
    /// Start the pipeline with an empty username. Must be called inside a tokio runtime.
    ///
    /// User lookups are retried on transient failures per `config.retry`; a lookup that
    /// still fails shows as "no user". Avatar failures show the placeholder.
    ///
    /// Usernames shorter than `config.github.min_username_len` resolve to "no user", and
    /// "no user" resolves to the placeholder, without calling either service. The activity
    /// flag covers each service call, not the jitter waits between retries.
    pub fn spawn<US, AS>(
        user_service: US,
        avatar_service: AS,
        config: &PipelineConfig,
        ctx: PipelineContext,
    ) -> Result<Self, ConfigError>
    where
        US: Service<String, Response = Option<GithubUser>, Error = FetchError>
            + Clone
            + Send
            + 'static,
        US::Future: Send + 'static,
        AS: Service<Option<GithubUser>, Response = Avatar, Error = FetchError>
            + Clone
            + Send
            + 'static,
        AS::Future: Send + 'static,
    {
        config.validate()?;

        let policy = config
            .retry
            .policy_builder::<FetchError>()?
            .should_retry(FetchError::is_transient)
            .with_sleeper(ctx.sleeper.clone())
            .with_telemetry(ctx.telemetry.clone())
            .build()?;

        let activity = ActivityLayer::new(ctx.activity.clone());
        let min_len = config.github.min_username_len;

        let user_requests = RetryLayer::new(policy).layer(activity.layer(user_service));
        let user = BoxCloneService::new(tower::service_fn(move |username: String| {
            let requests = user_requests.clone();
            async move {
                if !is_lookup_candidate(&username, min_len) {
                    return Ok(None);
                }
                requests.oneshot(username).await
            }
        }));

        let avatar_requests = activity.layer(avatar_service);
        let avatar = BoxCloneService::new(tower::service_fn(move |user: Option<GithubUser>| {
            let requests = avatar_requests.clone();
            async move {
                match user {
                    None => Ok(Avatar::Placeholder),
                    user => requests.oneshot(user).await,
                }
            }
        }));

        let stage = |name| {
            StageConfig::new(name)
                .with_sleeper(ctx.sleeper.clone())
                .with_telemetry(ctx.telemetry.clone())
        };
        let mut user_stage = stage("user").skip_duplicates();
        if let Some(window) = config.cascade.debounce() {
            user_stage = user_stage.debounce(window);
        }

        let cascade = Cascade::spawn(
            String::new(),
            Branch::new("user", user, None, |_: &String, _: RetryError<FetchError>| None)
                .with_config(user_stage),
            LabelBranch::new("repository_count", repository_count_label)
                .with_config(stage("repository_count")),
            Branch::new("avatar", avatar, Avatar::Placeholder, |_: &Option<GithubUser>, _| {
                Avatar::Placeholder
            })
            .with_config(stage("avatar").skip_duplicates()),
        );

        Ok(Self { cascade, activity: ctx.activity })
    }

    /// [`spawn`](Self::spawn) backed by a live [`GithubClient`].
    pub fn from_client(
        client: &GithubClient,
        config: &PipelineConfig,
        ctx: PipelineContext,
    ) -> Result<Self, ConfigError> {
        Self::spawn(client.user_service(), client.avatar_service(), config, ctx)
    }

    /// Publish a new username. Surrounding whitespace is dropped, so `"octocat "` counts as
    /// a duplicate of `"octocat"`.
    pub fn set_username(&self, username: impl Into<String>) {
        let username = username.into();
        let trimmed = username.trim();
        if trimmed.len() == username.len() {
            self.cascade.set_input(username);
        } else {
            self.cascade.set_input(trimmed.to_string());
        }
    }

    pub fn username(&self) -> String {
        self.cascade.input()
    }

    pub fn user(&self) -> Option<GithubUser> {
        self.cascade.primary()
    }

    pub fn repository_count(&self) -> String {
        self.cascade.label()
    }

    pub fn avatar(&self) -> Avatar {
        self.cascade.derived()
    }

    pub fn is_loading(&self) -> bool {
        self.activity.is_active()
    }

    pub fn subscribe_user(&self) -> watch::Receiver<Option<GithubUser>> {
        self.cascade.subscribe_primary()
    }

    pub fn subscribe_repository_count(&self) -> watch::Receiver<String> {
        self.cascade.subscribe_label()
    }

    pub fn subscribe_avatar(&self) -> watch::Receiver<Avatar> {
        self.cascade.subscribe_derived()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.activity.subscribe()
    }
}

impl std::fmt::Debug for UserCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCascade")
            .field("cascade", &self.cascade)
            .field("activity", &self.activity)
            .finish()
    }
}
