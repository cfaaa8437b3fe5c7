use super::error::FetchError;
use super::model::{Avatar, GithubUser, ImageFormat};
use crate::config::GithubConfig;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Url};
use std::sync::Arc;
use tower::util::BoxCloneService;

/// Check the status and decode a `/users/{username}` response body.
pub fn decode_user(status: u16, body: &[u8]) -> Result<GithubUser, FetchError> {
    if status != 200 {
        return Err(FetchError::Status(status));
    }
    serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))
}

/// Check the status and recognise the image format of an avatar response body.
pub fn decode_avatar(url: &str, status: u16, body: &[u8]) -> Result<Avatar, FetchError> {
    if status != 200 {
        return Err(FetchError::Status(status));
    }
    if body.is_empty() {
        return Err(FetchError::EmptyBody);
    }
    let format = ImageFormat::sniff(body)
        .ok_or_else(|| FetchError::Decode("unrecognised image format".to_string()))?;
    Ok(Avatar::Image { url: url.to_string(), format, bytes: Arc::from(body) })
}

/// Thin GitHub REST client. Cloning is cheap and shares the connection pool.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_base: Url,
    min_username_len: usize,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self, FetchError> {
        let api_base = Url::parse(&config.api_base)
            .map_err(|e| FetchError::InvalidRequest(format!("api_base: {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(FetchError::InvalidRequest(format!(
                "api_base {} cannot carry a path",
                config.api_base
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = config.token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| FetchError::InvalidRequest("token is not a valid header".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { http, api_base, min_username_len: config.min_username_len })
    }

    pub fn user_url(&self, username: &str) -> Result<Url, FetchError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidRequest("api_base cannot carry a path".into()))?
            .pop_if_empty()
            .push("users")
            .push(username);
        Ok(url)
    }

    pub async fn fetch_user(&self, username: &str) -> Result<GithubUser, FetchError> {
        let url = self.user_url(username)?;
        tracing::debug!(%url, "fetching user");
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        decode_user(status, &body)
    }

    pub async fn fetch_avatar(&self, url: &str) -> Result<Avatar, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        tracing::debug!(%parsed, "fetching avatar");
        let response = self.http.get(parsed).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        decode_avatar(url, status, &body)
    }

    /// Resolve a username typed by a user. Too-short input means "no user" and issues no
    /// request.
    pub async fn lookup(&self, username: &str) -> Result<Option<GithubUser>, FetchError> {
        let username = username.trim();
        if username.chars().count() < self.min_username_len {
            return Ok(None);
        }
        self.fetch_user(username).await.map(Some)
    }

    /// Avatar for the given user, or the placeholder when there is none.
    pub async fn avatar_for(&self, user: Option<&GithubUser>) -> Result<Avatar, FetchError> {
        match user {
            Some(user) => self.fetch_avatar(&user.avatar_url).await,
            None => Ok(Avatar::Placeholder),
        }
    }

    /// [`lookup`](Self::lookup) as a tower service.
    pub fn user_service(&self) -> BoxCloneService<String, Option<GithubUser>, FetchError> {
        let client = self.clone();
        BoxCloneService::new(tower::service_fn(move |username: String| {
            let client = client.clone();
            async move { client.lookup(&username).await }
        }))
    }

    /// [`avatar_for`](Self::avatar_for) as a tower service.
    pub fn avatar_service(&self) -> BoxCloneService<Option<GithubUser>, Avatar, FetchError> {
        let client = self.clone();
        BoxCloneService::new(tower::service_fn(move |user: Option<GithubUser>| {
            let client = client.clone();
            async move { client.avatar_for(user.as_ref()).await }
        }))
    }
}
