// SPDX-License-Identifier: GPL-3.0-or-later

//! Port to the external catalog that links point into.

use async_trait::async_trait;
use spotsync_domain::{ObjectType, TrackState};
use spotsync_spotify::{SpotifyClient, SpotifyError, SpotifyObjectType, TrackListing};

use crate::error::{SyncError, SyncResult};

/// One track as listed by the external catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub url: String,
    pub artist: String,
    pub title: String,
}

impl ResolvedTrack {
    pub fn new(
        url: impl Into<String>,
        artist: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            artist: artist.into(),
            title: title.into(),
        }
    }

    /// Fresh, unresolved tracking entry with normalized names.
    pub fn to_track_state(&self) -> TrackState {
        TrackState::new(self.url.clone(), &self.artist, &self.title)
    }
}

impl From<TrackListing> for ResolvedTrack {
    fn from(listing: TrackListing) -> Self {
        Self {
            url: listing.spotify_url,
            artist: listing.artist,
            title: listing.title,
        }
    }
}

/// What the reconciliation core needs from the external catalog. Paging and
/// credentials are the implementor's business.
///
/// Every method rejects a malformed link with
/// [`SyncError::InvalidReference`] before touching the network.
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    /// Check a link offline and return its canonical form. Two links to the
    /// same object canonicalize to the same string.
    fn validate(&self, url: &str) -> SyncResult<String>;

    async fn resolve_type(&self, url: &str) -> SyncResult<ObjectType>;

    /// Every constituent track, all pages drained.
    async fn list_tracks(&self, url: &str) -> SyncResult<Vec<ResolvedTrack>>;

    async fn display_name(&self, url: &str) -> SyncResult<String>;
}

pub(crate) fn object_type_of(object_type: SpotifyObjectType) -> ObjectType {
    match object_type {
        SpotifyObjectType::Track => ObjectType::Track,
        SpotifyObjectType::Album => ObjectType::Album,
        SpotifyObjectType::Playlist => ObjectType::Playlist,
        SpotifyObjectType::Artist => ObjectType::Artist,
    }
}

impl From<SpotifyError> for SyncError {
    fn from(err: SpotifyError) -> Self {
        if err.is_invalid_reference() {
            Self::InvalidReference(err.to_string())
        } else {
            Self::UpstreamUnavailable(err.to_string())
        }
    }
}

#[async_trait]
impl CatalogResolver for SpotifyClient {
    fn validate(&self, url: &str) -> SyncResult<String> {
        Ok(SpotifyClient::validate(self, url)?.url())
    }

    async fn resolve_type(&self, url: &str) -> SyncResult<ObjectType> {
        Ok(object_type_of(self.object_type(url)?))
    }

    async fn list_tracks(&self, url: &str) -> SyncResult<Vec<ResolvedTrack>> {
        let tracks = self.tracks(url).await?;
        Ok(tracks.into_iter().map(ResolvedTrack::from).collect())
    }

    async fn display_name(&self, url: &str) -> SyncResult<String> {
        Ok(self.object_name(url).await?)
    }
}
