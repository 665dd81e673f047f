// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Number of unsuccessful catalog lookups after which a track is skipped for good.
pub const MAX_FAILED_ATTEMPTS: u32 = 3;

// ============================================================================
// Value Objects & IDs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MusicFileId(pub Uuid);

impl MusicFileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MusicFileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MusicFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Kind of object an external reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Track,
    Album,
    Playlist,
    Artist,
}

impl ObjectType {
    /// Albums and playlists expand into many tracks, tracks into exactly one.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Album | Self::Playlist)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "track" => Some(Self::Track),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            "artist" => Some(Self::Artist),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Track => write!(f, "track"),
            Self::Album => write!(f, "album"),
            Self::Playlist => write!(f, "playlist"),
            Self::Artist => write!(f, "artist"),
        }
    }
}

/// Where a request sits in its lifecycle, derived from its flags and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    Queued,
    InProgress,
    Completed,
    Exhausted,
}

/// Terminal verdict reachable from the state of a request's tracks alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Every expected track exists in the catalog.
    Completed,
    /// Nothing is left to look up and at least one track was skipped.
    Exhausted,
}

// ============================================================================
// Normalization
// ============================================================================

/// Canonical form used on both sides of a catalog match: NFC, lower-cased,
/// runs of whitespace collapsed to a single space, trimmed.
pub fn normalize_name(value: &str) -> String {
    value
        .nfc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Track State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackState {
    pub spotify_url: String,
    pub artist: String,
    pub title: String,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default)]
    pub skipped: bool,
}

impl TrackState {
    pub fn new(
        spotify_url: impl Into<String>,
        artist: impl AsRef<str>,
        title: impl AsRef<str>,
    ) -> Self {
        Self {
            spotify_url: spotify_url.into(),
            artist: normalize_name(artist.as_ref()),
            title: normalize_name(title.as_ref()),
            found: false,
            failed_attempts: 0,
            skipped: false,
        }
    }

    /// Found and skipped tracks are never looked up again.
    pub fn is_resolved(&self) -> bool {
        self.found || self.skipped
    }

    /// Key used to recognise the same track across expansions.
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.spotify_url, &self.artist, &self.title)
    }

    pub fn mark_found(&mut self) {
        if self.is_resolved() {
            return;
        }
        self.found = true;
    }

    /// Count a lookup that came back empty. Returns true when this miss
    /// tripped the breaker.
    pub fn record_miss(&mut self) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.failed_attempts += 1;
        if self.failed_attempts >= MAX_FAILED_ATTEMPTS {
            self.skipped = true;
            return true;
        }
        false
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Counters persisted together by a single progress update. `version` is the
/// version the caller read; the store refuses the write if it moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestProgress {
    pub active: bool,
    pub errored: bool,
    pub sync_count: u32,
    pub retry_count: u32,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: RequestId,
    pub creator_id: i64,
    #[serde(rename = "spotify_url")]
    pub url: String,
    pub object_type: ObjectType,
    pub name: String,
    pub active: bool,
    pub errored: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_count: u32,
    pub retry_count: u32,
    pub expected_track_count: u32,
    pub found_track_count: u32,
    #[serde(default)]
    pub track_metadata: Vec<TrackState>,
    #[serde(default)]
    pub version: i64,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        object_type: ObjectType,
        name: impl Into<String>,
        creator_id: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            creator_id,
            url: url.into(),
            object_type,
            name: name.into(),
            active: true,
            errored: false,
            created_at: now,
            updated_at: now,
            sync_count: 0,
            retry_count: 0,
            expected_track_count: 0,
            found_track_count: 0,
            track_metadata: Vec::new(),
            version: 0,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        match (self.active, self.errored, self.sync_count) {
            (true, _, 0) => RequestPhase::Queued,
            (true, _, _) => RequestPhase::InProgress,
            (false, false, _) => RequestPhase::Completed,
            (false, true, _) => RequestPhase::Exhausted,
        }
    }

    pub fn progress(&self) -> RequestProgress {
        RequestProgress {
            active: self.active,
            errored: self.errored,
            sync_count: self.sync_count,
            retry_count: self.retry_count,
            version: self.version,
        }
    }

    /// Tracks still eligible for a catalog lookup.
    pub fn unresolved_tracks(&self) -> impl Iterator<Item = &TrackState> {
        self.track_metadata.iter().filter(|t| !t.is_resolved())
    }

    /// Append the tracks not represented yet, keeping the existing order.
    /// Returns how many were appended.
    pub fn merge_tracks(&mut self, tracks: impl IntoIterator<Item = TrackState>) -> usize {
        let mut known: HashSet<(String, String, String)> = self
            .track_metadata
            .iter()
            .map(|t| {
                let (url, artist, title) = t.identity();
                (url.to_string(), artist.to_string(), title.to_string())
            })
            .collect();

        let mut appended = 0;
        for track in tracks {
            let (url, artist, title) = track.identity();
            let key = (url.to_string(), artist.to_string(), title.to_string());
            if known.insert(key) {
                self.track_metadata.push(track);
                appended += 1;
            }
        }
        self.recount();
        appended
    }

    /// Re-derive both track counters from the track list.
    pub fn recount(&mut self) {
        self.expected_track_count = self.track_metadata.len() as u32;
        self.found_track_count = self.track_metadata.iter().filter(|t| t.found).count() as u32;
    }

    /// Verdict implied by the tracks, or `None` while lookups remain.
    pub fn track_outcome(&self) -> Option<TrackOutcome> {
        if self.found_track_count == self.expected_track_count {
            return Some(TrackOutcome::Completed);
        }
        let all_resolved = self.track_metadata.iter().all(TrackState::is_resolved);
        let any_skipped = self.track_metadata.iter().any(|t| t.skipped);
        if all_resolved && any_skipped {
            Some(TrackOutcome::Exhausted)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistProgress {
    pub active: bool,
    pub errored: bool,
    pub retry_count: u32,
    pub version: i64,
}

/// A playlist watched for tracks missing from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRequest {
    pub id: RequestId,
    pub creator_id: i64,
    #[serde(rename = "spotify_url")]
    pub url: String,
    pub active: bool,
    pub errored: bool,
    pub retry_count: u32,
    /// Missing tracks are reported but never queued for download.
    #[serde(default)]
    pub no_pull: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl PlaylistRequest {
    pub fn new(url: impl Into<String>, creator_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            creator_id,
            url: url.into(),
            active: true,
            errored: false,
            retry_count: 0,
            no_pull: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn progress(&self) -> PlaylistProgress {
        PlaylistProgress {
            active: self.active,
            errored: self.errored,
            retry_count: self.retry_count,
            version: self.version,
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// An indexed audio file on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicFile {
    pub id: MusicFileId,
    pub creator_id: i64,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub genre: String,
    pub path: String,
    #[serde(default)]
    pub meta_data: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MusicFile {
    pub fn new(
        artist: impl Into<String>,
        title: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MusicFileId::new(),
            creator_id: 0,
            artist: artist.into(),
            album: String::new(),
            title: title.into(),
            genre: String::new(),
            path: path.into(),
            meta_data: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    /// Normalized (artist, title) pair the catalog is matched on.
    pub fn match_key(&self) -> (String, String) {
        (normalize_name(&self.artist), normalize_name(&self.title))
    }
}

/// Freshness marker of the catalog; exactly one exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub last_indexed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl IndexStatus {
    pub fn mark_indexed(&mut self, at: DateTime<Utc>) {
        self.last_indexed = Some(at);
        self.last_updated = Some(at);
    }

    /// Whether an indexing pass finished after `since`. A catalog that was
    /// never indexed has nothing new to offer.
    pub fn indexed_since(&self, since: Option<DateTime<Utc>>) -> bool {
        match (self.last_indexed, since) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(indexed), Some(since)) => indexed > since,
        }
    }
}
