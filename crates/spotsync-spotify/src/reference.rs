// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{Result, SpotifyError};

/// Every shareable link starts with this prefix.
pub const SPOTIFY_URL_PREFIX: &str = "https://open.spotify.com/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpotifyObjectType {
    Playlist,
    Album,
    Track,
    Artist,
}

impl SpotifyObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Album => "album",
            Self::Track => "track",
            Self::Artist => "artist",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "playlist" => Some(Self::Playlist),
            "album" => Some(Self::Album),
            "track" => Some(Self::Track),
            "artist" => Some(Self::Artist),
            _ => None,
        }
    }

    /// Collection segment used by the Web API (`/playlists/{id}`, ...).
    fn api_collection(&self) -> &'static str {
        match self {
            Self::Playlist => "playlists",
            Self::Album => "albums",
            Self::Track => "tracks",
            Self::Artist => "artists",
        }
    }
}

impl std::fmt::Display for SpotifyObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `open.spotify.com` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyReference {
    pub object_type: SpotifyObjectType,
    pub id: String,
}

impl SpotifyReference {
    /// Parse a shared link such as
    /// `https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc`.
    ///
    /// Query strings and fragments are dropped, as is the optional
    /// `intl-xx` locale segment found in links shared from localized clients.
    /// No network call is made.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix(SPOTIFY_URL_PREFIX)
            .ok_or_else(|| SpotifyError::InvalidUrl(url.to_string()))?;

        let path = rest.split(['?', '#']).next().unwrap_or_default();
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();

        if segments.peek().is_some_and(|s| s.starts_with("intl-")) {
            segments.next();
        }

        let object_type = segments
            .next()
            .and_then(SpotifyObjectType::from_segment)
            .ok_or_else(|| SpotifyError::InvalidUrl(url.to_string()))?;

        let id = segments
            .next()
            .filter(|id| id.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| SpotifyError::InvalidUrl(url.to_string()))?;

        Ok(Self {
            object_type,
            id: id.to_string(),
        })
    }

    /// Path of the object below the API base url.
    pub fn api_path(&self) -> String {
        format!("/{}/{}", self.object_type.api_collection(), self.id)
    }

    /// Canonical shareable link.
    pub fn url(&self) -> String {
        format!("{}{}/{}", SPOTIFY_URL_PREFIX, self.object_type, self.id)
    }
}
