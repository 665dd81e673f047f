// SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};

/// Response of the client-credentials token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Paging<T> {
    pub items: Vec<T>,
    pub total: u32,
    pub next: Option<String>,
}

/// Playlist entry. `track` is null for entries removed from the catalog and
/// holds an episode for podcast entries.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistItem {
    pub track: Option<SimplifiedTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimplifiedTrack {
    pub id: Option<String>,
    pub name: String,
    /// `"track"` or `"episode"`. Absent in some embedded objects.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    /// Files the playlist owner added from their own disk.
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

/// Any object that only needs to be asked for its name.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedObject {
    pub name: String,
}

/// Track as handed to callers: where it lives, who made it, what it is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackListing {
    pub spotify_url: String,
    pub artist: String,
    pub title: String,
}

impl SimplifiedTrack {
    /// Whether the entry is a catalog track that can be linked to and
    /// downloaded. Local files and episodes are not.
    pub fn is_catalog_track(&self) -> bool {
        !self.is_local
            && self.id.is_some()
            && self.kind.as_deref().map_or(true, |kind| kind == "track")
    }

    /// The first credited artist stands for the track.
    pub fn into_listing(self) -> TrackListing {
        let spotify_url = self
            .external_urls
            .spotify
            .or_else(|| {
                self.id
                    .as_ref()
                    .map(|id| format!("{}track/{}", crate::SPOTIFY_URL_PREFIX, id))
            })
            .unwrap_or_default();
        let artist = self
            .artists
            .into_iter()
            .next()
            .map(|a| a.name)
            .unwrap_or_default();

        TrackListing {
            spotify_url,
            artist,
            title: self.name,
        }
    }
}
