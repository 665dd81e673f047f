// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpotifyError>;

#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("invalid spotify url: {0}")]
    InvalidUrl(String),

    #[error("operation not supported for {0} links")]
    UnsupportedObjectType(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("invalid response from Spotify API: {0}")]
    InvalidResponse(String),
}

impl SpotifyError {
    /// The link itself is at fault; asking again will not help.
    pub fn is_invalid_reference(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_) | Self::UnsupportedObjectType(_) | Self::NotFound(_)
        )
    }
}
