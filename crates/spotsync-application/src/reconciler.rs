// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-track reconciliation of a request against the catalog index.
//!
//! A pass works on an in-memory copy of the request. Nothing here persists;
//! the caller commits the returned request as one snapshot, or drops it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use spotsync_domain::{normalize_name, DownloadRequest, MusicFile, ObjectType, TrackState};
use tracing::{debug, info};

use crate::catalog::CatalogIndex;
use crate::error::{SyncError, SyncResult};
use crate::resolver::CatalogResolver;

pub struct Reconciler {
    resolver: Arc<dyn CatalogResolver>,
    catalog: Arc<CatalogIndex>,
}

impl Reconciler {
    pub fn new(resolver: Arc<dyn CatalogResolver>, catalog: Arc<CatalogIndex>) -> Self {
        Self { resolver, catalog }
    }

    /// The tracks the request is expected to produce.
    ///
    /// A track request yields its own single entry. Albums and playlists are
    /// listed through the resolver, every page of them.
    pub async fn expected_tracks(&self, request: &DownloadRequest) -> SyncResult<Vec<TrackState>> {
        match request.object_type {
            ObjectType::Track => {
                if let Some(track) = request.track_metadata.first() {
                    return Ok(vec![track.clone()]);
                }
                // Requests stored before their track was seeded.
                let listed = self.resolver.list_tracks(&request.url).await?;
                Ok(listed
                    .first()
                    .map(|t| t.to_track_state())
                    .into_iter()
                    .collect())
            }
            ObjectType::Album | ObjectType::Playlist => {
                let listed = self.resolver.list_tracks(&request.url).await?;
                Ok(listed.iter().map(|t| t.to_track_state()).collect())
            }
            ObjectType::Artist => Err(SyncError::InvalidReference(format!(
                "artist links have no fixed track list: {}",
                request.url
            ))),
        }
    }

    /// Merge the expected tracks into the request. Tracks already present
    /// keep their state; only new ones are appended. Returns how many were
    /// appended.
    pub async fn expand(&self, request: &mut DownloadRequest) -> SyncResult<usize> {
        let expected = self.expected_tracks(request).await?;
        let appended = request.merge_tracks(expected);
        debug!(
            target: "reconciler",
            request_id = %request.id,
            appended,
            expected = request.expected_track_count,
            "request expanded"
        );
        Ok(appended)
    }

    /// One bulk lookup of every unresolved track.
    ///
    /// Hits are marked found. Misses count against the track, which is skipped
    /// once it reaches the failure cap and then never looked up again.
    pub async fn reconcile_pass(&self, mut request: DownloadRequest) -> SyncResult<DownloadRequest> {
        let pending: Vec<usize> = request
            .track_metadata
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_resolved())
            .map(|(i, _)| i)
            .collect();

        if !pending.is_empty() {
            let keys: Vec<(String, String)> = pending
                .iter()
                .map(|&i| match_key(&request.track_metadata[i]))
                .collect();
            let present: HashSet<(String, String)> = self
                .catalog
                .bulk_find(&keys)
                .await?
                .iter()
                .map(MusicFile::match_key)
                .collect();

            for (&i, key) in pending.iter().zip(&keys) {
                let track = &mut request.track_metadata[i];
                if present.contains(key) {
                    track.mark_found();
                } else if track.record_miss() {
                    info!(
                        target: "reconciler",
                        request_id = %request.id,
                        url = %track.spotify_url,
                        artist = %track.artist,
                        title = %track.title,
                        "track skipped after repeated misses"
                    );
                }
            }
        }

        request.recount();
        request.sync_count += 1;
        request.updated_at = Utc::now();

        debug!(
            target: "reconciler",
            request_id = %request.id,
            looked_up = pending.len(),
            found = request.found_track_count,
            expected = request.expected_track_count,
            "reconcile pass finished"
        );
        Ok(request)
    }
}

fn match_key(track: &TrackState) -> (String, String) {
    (normalize_name(&track.artist), normalize_name(&track.title))
}
