use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Label shown when no user is loaded.
pub const UNKNOWN_REPOSITORY_COUNT: &str = "unknown";

/// A GitHub user profile from the `/users/{username}` API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GithubUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    pub public_repos: u32,
    pub avatar_url: String,
}

impl GithubUser {
    /// Display name, falling back to the login.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.login)
    }
}

/// Image container formats recognised by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
}

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::WebP)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Avatar image, or the placeholder shown when there is none.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Avatar {
    #[default]
    Placeholder,
    Image {
        url: String,
        format: ImageFormat,
        bytes: Arc<[u8]>,
    },
}

impl Avatar {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Avatar::Placeholder)
    }
}

impl fmt::Display for Avatar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Avatar::Placeholder => f.write_str("placeholder"),
            Avatar::Image { url, format, bytes } => {
                write!(f, "{} ({}, {} bytes)", url, format, bytes.len())
            }
        }
    }
}

/// Public repository count as text, or `"unknown"` when no user is loaded.
pub fn repository_count_label(user: &Option<GithubUser>) -> String {
    match user {
        Some(user) => user.public_repos.to_string(),
        None => UNKNOWN_REPOSITORY_COUNT.to_string(),
    }
}
