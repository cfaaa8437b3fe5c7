use thiserror::Error;

/// Failure of a single GitHub request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection, TLS, or protocol failure below HTTP.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    /// The server answered with something other than 200 OK.
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("response body was empty")]
    EmptyBody,
    /// The request could not be built (bad base URL, invalid header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether repeating the same request might succeed: transport failures, timeouts,
    /// rate limiting (429) and server errors (5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout => true,
            FetchError::Status(code) => *code == 429 || (500..=599).contains(code),
            FetchError::Decode(_) | FetchError::EmptyBody | FetchError::InvalidRequest(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if err.is_builder() {
            FetchError::InvalidRequest(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}
