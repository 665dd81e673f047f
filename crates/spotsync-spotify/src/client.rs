// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{Result, SpotifyError};
use crate::models::{NamedObject, Paging, PlaylistItem, SimplifiedTrack, TrackListing};
use crate::reference::{SpotifyObjectType, SpotifyReference};
use crate::token::TokenProvider;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const MAX_PAGE_LIMIT: u32 = 50;
const USER_AGENT: &str = concat!("spotsync/", env!("CARGO_PKG_VERSION"));

/// Spotify Web API client authenticated with client credentials.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    client: Client,
    base_url: String,
    page_limit: u32,
    tokens: Arc<TokenProvider>,
}

impl SpotifyClient {
    /// Create a client builder for custom configuration.
    pub fn builder() -> SpotifyClientBuilder {
        SpotifyClientBuilder::default()
    }

    /// Parse and check a link without touching the network.
    pub fn validate(&self, url: &str) -> Result<SpotifyReference> {
        SpotifyReference::parse(url)
    }

    /// What the link points at.
    pub fn object_type(&self, url: &str) -> Result<SpotifyObjectType> {
        Ok(SpotifyReference::parse(url)?.object_type)
    }

    /// Display name of the linked playlist, album, track or artist.
    pub async fn object_name(&self, url: &str) -> Result<String> {
        let reference = SpotifyReference::parse(url)?;
        let object: NamedObject = self.get(&reference.api_path(), &[]).await?;
        Ok(object.name)
    }

    /// Every track behind the link, all pages drained.
    ///
    /// A track link yields exactly that track. Artist links have no fixed
    /// track list and are refused.
    pub async fn tracks(&self, url: &str) -> Result<Vec<TrackListing>> {
        let reference = SpotifyReference::parse(url)?;
        match reference.object_type {
            SpotifyObjectType::Playlist => self.playlist_tracks(&reference).await,
            SpotifyObjectType::Album => self.album_tracks(&reference).await,
            SpotifyObjectType::Track => {
                let track: SimplifiedTrack = self.get(&reference.api_path(), &[]).await?;
                Ok(vec![track.into_listing()])
            }
            SpotifyObjectType::Artist => Err(SpotifyError::UnsupportedObjectType(
                reference.object_type.to_string(),
            )),
        }
    }

    async fn playlist_tracks(&self, reference: &SpotifyReference) -> Result<Vec<TrackListing>> {
        let path = format!("{}/tracks", reference.api_path());
        let items: Vec<PlaylistItem> = self.get_all_pages(&path).await?;

        let total = items.len();
        let tracks: Vec<TrackListing> = items
            .into_iter()
            .filter_map(|item| item.track)
            .filter(SimplifiedTrack::is_catalog_track)
            .map(SimplifiedTrack::into_listing)
            .collect();

        if tracks.len() < total {
            debug!(
                target: "spotify",
                playlist_id = %reference.id,
                skipped = total - tracks.len(),
                "skipped removed, local and non-track playlist entries"
            );
        }
        Ok(tracks)
    }

    async fn album_tracks(&self, reference: &SpotifyReference) -> Result<Vec<TrackListing>> {
        let path = format!("{}/tracks", reference.api_path());
        let items: Vec<SimplifiedTrack> = self.get_all_pages(&path).await?;
        Ok(items.into_iter().map(SimplifiedTrack::into_listing).collect())
    }

    /// Follow `limit`/`offset` paging until the listing is exhausted.
    async fn get_all_pages<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut offset: u32 = 0;

        loop {
            let query = [
                ("limit", self.page_limit.to_string()),
                ("offset", offset.to_string()),
            ];
            let page: Paging<T> = self.get(path, &query).await?;
            let received = page.items.len() as u32;
            items.extend(page.items);
            offset += received;

            trace!(target: "spotify", path, offset, total = page.total, "fetched page");

            if page.next.is_none() || received == 0 || offset >= page.total {
                break;
            }
        }

        Ok(items)
    }

    /// Authenticated GET. A 401 drops the cached token and retries once.
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut refreshed = false;

        loop {
            let token = self.tokens.access_token(&self.client).await?;
            trace!(target: "spotify", "GET {}", url);

            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            debug!(target: "spotify", "response status: {}", status);

            match status {
                StatusCode::UNAUTHORIZED if !refreshed => {
                    warn!(target: "spotify", "access token rejected, refreshing");
                    self.tokens.invalidate().await;
                    refreshed = true;
                    continue;
                }
                StatusCode::NOT_FOUND => return Err(SpotifyError::NotFound(url)),
                StatusCode::TOO_MANY_REQUESTS => return Err(SpotifyError::RateLimitExceeded),
                _ => {}
            }

            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(SpotifyError::ApiError {
                    status: status.as_u16(),
                    message,
                });
            }

            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| {
                SpotifyError::InvalidResponse(format!("Failed to parse response: {}", e))
            });
        }
    }
}

/// Builder for configuring a Spotify client.
#[derive(Debug)]
pub struct SpotifyClientBuilder {
    base_url: String,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    page_limit: u32,
    timeout: Duration,
}

impl Default for SpotifyClientBuilder {
    fn default() -> Self {
        Self {
            base_url: SPOTIFY_API_BASE.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            client_id: None,
            client_secret: None,
            page_limit: MAX_PAGE_LIMIT,
            timeout: Duration::from_secs(30),
        }
    }
}

impl SpotifyClientBuilder {
    /// Set a custom API base URL (useful for testing with mock servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set a custom token endpoint.
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Items per page when draining listings, clamped to what the API accepts.
    pub fn page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    /// Set request timeout duration.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the Spotify client. Credentials are mandatory.
    pub fn build(self) -> Result<SpotifyClient> {
        let (Some(client_id), Some(client_secret)) = (self.client_id, self.client_secret) else {
            return Err(SpotifyError::Authentication(
                "client id and secret are required".to_string(),
            ));
        };

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(SpotifyClient {
            client,
            base_url: self.base_url,
            page_limit: self.page_limit,
            tokens: Arc::new(TokenProvider::new(self.token_url, client_id, client_secret)),
        })
    }
}
