// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{Result, SpotifyError};
use crate::models::TokenResponse;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, error};

/// Tokens are renewed this long before Spotify would reject them.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Client-credentials token cache. A token is fetched lazily on first use and
/// renewed once it is about to expire or after the API rejected it.
#[derive(Debug)]
pub(crate) struct TokenProvider {
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub(crate) fn new(token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            token_url,
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }
    }

    pub(crate) async fn access_token(&self, client: &Client) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.request_token(client).await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next call fetches a fresh one.
    pub(crate) async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn request_token(&self, client: &Client) -> Result<CachedToken> {
        debug!(target: "spotify", token_url = %self.token_url, "requesting access token");

        let response = client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(target: "spotify", status = status.as_u16(), "failed to refresh token");
            return Err(SpotifyError::Authentication(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                message
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SpotifyError::InvalidResponse(format!("token response: {}", e)))?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}
