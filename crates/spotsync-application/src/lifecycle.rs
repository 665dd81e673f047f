// SPDX-License-Identifier: GPL-3.0-or-later

//! Request lifecycle: queueing, progress bookkeeping, retry accounting and
//! termination.
//!
//! ```text
//! Queued (active, sync_count = 0)
//!   -> InProgress (active, sync_count > 0)
//!   -> Completed (inactive, not errored) | Exhausted (inactive, errored)
//! ```
//!
//! A request is exhausted either by its tracks (nothing left to look up and
//! at least one skipped) or by its `retry_count` exceeding the configured
//! ceiling.

use std::sync::Arc;

use spotsync_domain::{
    DownloadRequest, ObjectType, PlaylistProgress, PlaylistRequest, RequestId, RequestPhase,
    RequestProgress, TrackOutcome,
};
use spotsync_infrastructure::repositories::{
    DownloadRequestRepository, PlaylistRequestRepository,
};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::resolver::{CatalogResolver, ResolvedTrack};

pub struct LifecycleController {
    requests: Arc<dyn DownloadRequestRepository>,
    playlists: Arc<dyn PlaylistRequestRepository>,
    resolver: Arc<dyn CatalogResolver>,
    max_retries: u32,
}

impl LifecycleController {
    pub fn new(
        requests: Arc<dyn DownloadRequestRepository>,
        playlists: Arc<dyn PlaylistRequestRepository>,
        resolver: Arc<dyn CatalogResolver>,
        max_retries: u32,
    ) -> Self {
        Self {
            requests,
            playlists,
            resolver,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Queue a download request for `url`.
    ///
    /// The link is validated and canonicalized before anything else happens,
    /// so share parameters and locale segments do not tell requests apart.
    /// An active request for the same link is reused instead of queueing a
    /// second one. Track requests are seeded with their single track.
    pub async fn enqueue(&self, url: &str, creator_id: i64) -> SyncResult<RequestId> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SyncError::InvalidReference("empty reference".to_string()));
        }
        let canonical = self.resolver.validate(url)?;
        let url = canonical.as_str();

        if let Some(existing) = self.requests.find_active_by_url(url).await? {
            debug!(target: "lifecycle", request_id = %existing.id, url, "request already queued");
            return Ok(existing.id);
        }

        let object_type = self.resolver.resolve_type(url).await?;
        if object_type == ObjectType::Artist {
            return Err(SyncError::InvalidReference(format!(
                "artist links have no fixed track list: {}",
                url
            )));
        }
        let name = self.resolver.display_name(url).await?;

        let mut request = DownloadRequest::new(url, object_type, name, creator_id);
        if object_type == ObjectType::Track {
            let tracks = self.resolver.list_tracks(url).await?;
            request.merge_tracks(tracks.first().map(ResolvedTrack::to_track_state));
        }

        self.requests.insert(&request).await?;
        info!(
            target: "lifecycle",
            request_id = %request.id,
            url,
            object_type = %object_type,
            name = %request.name,
            "download request queued"
        );
        Ok(request.id)
    }

    /// Queue a track found missing elsewhere, unless a request for it is
    /// active or already ran to completion. No resolver call is made.
    pub async fn enqueue_track(
        &self,
        track: &ResolvedTrack,
        creator_id: i64,
    ) -> SyncResult<Option<RequestId>> {
        let url = self.resolver.validate(&track.url)?;
        if self.requests.find_active_by_url(&url).await?.is_some()
            || self.requests.is_already_synced(&url).await?
        {
            return Ok(None);
        }

        let track = ResolvedTrack {
            url,
            ..track.clone()
        };
        let mut request =
            DownloadRequest::new(&track.url, ObjectType::Track, &track.title, creator_id);
        request.merge_tracks([track.to_track_state()]);
        self.requests.insert(&request).await?;

        info!(target: "lifecycle", request_id = %request.id, url = %track.url, "track request queued");
        Ok(Some(request.id))
    }

    /// Start monitoring a playlist.
    pub async fn enqueue_playlist(
        &self,
        url: &str,
        creator_id: i64,
        no_pull: bool,
    ) -> SyncResult<RequestId> {
        let canonical = self.resolver.validate(url)?;
        let url = canonical.as_str();
        let object_type = self.resolver.resolve_type(url).await?;
        if object_type != ObjectType::Playlist {
            return Err(SyncError::InvalidReference(format!(
                "expected a playlist link, got {}: {}",
                object_type, url
            )));
        }

        if let Some(existing) = self.playlists.find_active_by_url(url).await? {
            return Ok(existing.id);
        }

        let mut request = PlaylistRequest::new(url, creator_id);
        request.no_pull = no_pull;
        self.playlists.insert(&request).await?;
        info!(target: "lifecycle", request_id = %request.id, url, no_pull, "playlist monitored");
        Ok(request.id)
    }

    /// Snapshot of all active download requests, in no particular order.
    pub async fn list_active(&self) -> SyncResult<Vec<DownloadRequest>> {
        Ok(self.requests.list_active().await?)
    }

    pub async fn list_active_playlists(&self) -> SyncResult<Vec<PlaylistRequest>> {
        Ok(self.playlists.list_active().await?)
    }

    pub async fn get(&self, id: RequestId) -> SyncResult<DownloadRequest> {
        self.requests
            .get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    /// Persist `active`, `errored`, `sync_count` and `retry_count` in one
    /// update. Returns the new version.
    pub async fn record_progress(&self, id: RequestId, progress: RequestProgress) -> SyncResult<i64> {
        Ok(self.requests.record_progress(id, progress).await?)
    }

    /// Set `active = false`. Deactivating an inactive request does nothing.
    pub async fn deactivate(&self, id: RequestId) -> SyncResult<()> {
        if self.requests.deactivate(id).await? {
            info!(target: "lifecycle", request_id = %id, "request deactivated");
        } else {
            debug!(target: "lifecycle", request_id = %id, "request already inactive");
        }
        Ok(())
    }

    /// Apply the verdict implied by the tracks, if any, and report the phase.
    pub fn evaluate(&self, request: &mut DownloadRequest) -> RequestPhase {
        if !request.active {
            return request.phase();
        }
        match request.track_outcome() {
            Some(TrackOutcome::Completed) => {
                request.active = false;
                request.errored = false;
            }
            Some(TrackOutcome::Exhausted) => {
                request.active = false;
                request.errored = true;
            }
            None => {}
        }
        request.phase()
    }

    /// Persist the outcome of a pass as one snapshot.
    pub async fn commit(&self, request: &DownloadRequest) -> SyncResult<i64> {
        let version = self.requests.save_snapshot(request).await?;
        match request.phase() {
            RequestPhase::Completed => info!(
                target: "lifecycle",
                request_id = %request.id,
                found = request.found_track_count,
                "request completed"
            ),
            RequestPhase::Exhausted => warn!(
                target: "lifecycle",
                request_id = %request.id,
                found = request.found_track_count,
                expected = request.expected_track_count,
                "request exhausted"
            ),
            _ => {}
        }
        Ok(version)
    }

    /// Count a failed pass. Once `retry_count` exceeds the ceiling the
    /// request is exhausted.
    pub async fn record_failure(&self, request: &DownloadRequest) -> SyncResult<RequestProgress> {
        let mut progress = request.progress();
        progress.retry_count += 1;
        if progress.retry_count > self.max_retries {
            progress.active = false;
            progress.errored = true;
        }
        progress.version = self.requests.record_progress(request.id, progress).await?;

        if progress.active {
            debug!(
                target: "lifecycle",
                request_id = %request.id,
                retry_count = progress.retry_count,
                max_retries = self.max_retries,
                "retry recorded"
            );
        } else {
            warn!(
                target: "lifecycle",
                request_id = %request.id,
                retry_count = progress.retry_count,
                "retries exhausted"
            );
        }
        Ok(progress)
    }

    /// Terminate a request that can never succeed, such as one whose link
    /// no longer resolves.
    pub async fn exhaust(&self, request: &DownloadRequest) -> SyncResult<RequestProgress> {
        let mut progress = request.progress();
        progress.active = false;
        progress.errored = true;
        progress.version = self.requests.record_progress(request.id, progress).await?;
        warn!(target: "lifecycle", request_id = %request.id, url = %request.url, "request exhausted");
        Ok(progress)
    }

    /// Playlist counterpart of [`record_failure`](Self::record_failure).
    pub async fn record_playlist_failure(
        &self,
        playlist: &PlaylistRequest,
    ) -> SyncResult<PlaylistProgress> {
        let mut progress = playlist.progress();
        progress.retry_count += 1;
        if progress.retry_count > self.max_retries {
            progress.active = false;
            progress.errored = true;
        }
        progress.version = self.playlists.record_progress(playlist.id, progress).await?;
        if !progress.active {
            warn!(target: "lifecycle", request_id = %playlist.id, "playlist monitoring exhausted");
        }
        Ok(progress)
    }

    pub async fn exhaust_playlist(&self, playlist: &PlaylistRequest) -> SyncResult<PlaylistProgress> {
        let mut progress = playlist.progress();
        progress.active = false;
        progress.errored = true;
        progress.version = self.playlists.record_progress(playlist.id, progress).await?;
        warn!(target: "lifecycle", request_id = %playlist.id, url = %playlist.url, "playlist monitoring stopped");
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_db, FakeResolver, PLAYLIST_URL};
    use spotsync_domain::TrackState;
    use spotsync_infrastructure::sqlite_adapters::{
        SqliteDownloadRequestRepository, SqlitePlaylistRequestRepository,
    };

    async fn controller_with(resolver: Arc<FakeResolver>, max_retries: u32) -> LifecycleController {
        let db = memory_db().await;
        LifecycleController::new(
            Arc::new(SqliteDownloadRequestRepository::new(db.clone())),
            Arc::new(SqlitePlaylistRequestRepository::new(db)),
            resolver,
            max_retries,
        )
    }

    async fn controller(max_retries: u32) -> LifecycleController {
        controller_with(Arc::new(FakeResolver::new()), max_retries).await
    }

    #[tokio::test]
    async fn enqueue_creates_active_queued_request() {
        let lifecycle = controller(3).await;
        let id = lifecycle.enqueue(PLAYLIST_URL, 42).await.unwrap();

        let request = lifecycle.get(id).await.unwrap();
        assert!(request.active);
        assert!(!request.errored);
        assert_eq!(request.sync_count, 0);
        assert_eq!(request.retry_count, 0);
        assert_eq!(request.creator_id, 42);
        assert_eq!(request.object_type, ObjectType::Playlist);
        assert_eq!(request.phase(), RequestPhase::Queued);
    }

    #[tokio::test]
    async fn enqueue_generates_distinct_ids() {
        let lifecycle = controller(3).await;
        let a = lifecycle
            .enqueue("https://open.spotify.com/album/a1", 1)
            .await
            .unwrap();
        let b = lifecycle
            .enqueue("https://open.spotify.com/album/a2", 1)
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn enqueue_reuses_active_request_for_same_url() {
        let lifecycle = controller(3).await;
        let first = lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        let second = lifecycle.enqueue(PLAYLIST_URL, 2).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(lifecycle.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn enqueue_treats_shared_link_variants_as_one_request() {
        let lifecycle = controller(3).await;
        let first = lifecycle
            .enqueue("https://open.spotify.com/album/a1?si=xx", 1)
            .await
            .unwrap();
        let second = lifecycle
            .enqueue("https://open.spotify.com/album/a1?si=yy", 1)
            .await
            .unwrap();
        let localized = lifecycle
            .enqueue("https://open.spotify.com/intl-de/album/a1", 1)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first, localized);
        let active = lifecycle.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].url, "https://open.spotify.com/album/a1");
    }

    #[tokio::test]
    async fn enqueue_rejects_invalid_references_without_writing() {
        let resolver = Arc::new(FakeResolver::new());
        let lifecycle = controller_with(resolver.clone(), 3).await;

        for url in ["", "   ", "https://example.com/playlist/p1", "https://open.spotify.com/show/s1"] {
            let err = lifecycle.enqueue(url, 1).await.unwrap_err();
            assert!(matches!(err, SyncError::InvalidReference(_)), "{url}");
        }
        let err = lifecycle
            .enqueue("https://open.spotify.com/artist/a1", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidReference(_)));

        assert!(lifecycle.list_active().await.unwrap().is_empty());
        assert_eq!(resolver.list_calls(), 0);
    }

    #[tokio::test]
    async fn enqueue_propagates_resolver_outage() {
        let resolver = Arc::new(FakeResolver::new());
        resolver.set_outage(true);
        let lifecycle = controller_with(resolver, 3).await;

        let err = lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::UpstreamUnavailable(_)));
        assert!(lifecycle.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn track_requests_are_seeded_with_their_track() {
        let resolver = Arc::new(FakeResolver::new().with_listing(
            "https://open.spotify.com/track/t1",
            vec![ResolvedTrack::new(
                "https://open.spotify.com/track/t1",
                "Aphex Twin",
                "Xtal",
            )],
        ));
        let lifecycle = controller_with(resolver, 3).await;

        let id = lifecycle
            .enqueue("https://open.spotify.com/track/t1", 1)
            .await
            .unwrap();
        let request = lifecycle.get(id).await.unwrap();
        assert_eq!(request.expected_track_count, 1);
        assert_eq!(request.track_metadata[0].artist, "aphex twin");
    }

    #[tokio::test]
    async fn record_progress_on_unknown_request_is_not_found() {
        let lifecycle = controller(3).await;
        let request = DownloadRequest::new(PLAYLIST_URL, ObjectType::Playlist, "x", 1);
        let err = lifecycle
            .record_progress(request.id, request.progress())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn stale_progress_is_a_conflict() {
        let lifecycle = controller(3).await;
        let id = lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        let request = lifecycle.get(id).await.unwrap();

        let mut progress = request.progress();
        progress.sync_count = 1;
        lifecycle.record_progress(id, progress).await.unwrap();

        // Second writer read the same version.
        let mut stale = request.progress();
        stale.retry_count = 1;
        let err = lifecycle.record_progress(id, stale).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));

        let stored = lifecycle.get(id).await.unwrap();
        assert_eq!(stored.sync_count, 1);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let lifecycle = controller(3).await;
        let id = lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();

        lifecycle.deactivate(id).await.unwrap();
        lifecycle.deactivate(id).await.unwrap();
        assert!(!lifecycle.get(id).await.unwrap().active);
        assert!(lifecycle.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_ceiling_exhausts_request() {
        let lifecycle = controller(2).await;
        let id = lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();

        for expected in 1..=2 {
            let request = lifecycle.get(id).await.unwrap();
            let progress = lifecycle.record_failure(&request).await.unwrap();
            assert_eq!(progress.retry_count, expected);
            assert!(progress.active);
        }

        let request = lifecycle.get(id).await.unwrap();
        let progress = lifecycle.record_failure(&request).await.unwrap();
        assert!(!progress.active);
        assert!(progress.errored);
        assert_eq!(lifecycle.get(id).await.unwrap().phase(), RequestPhase::Exhausted);
    }

    #[tokio::test]
    async fn evaluate_applies_track_outcome() {
        let lifecycle = controller(3).await;
        let mut request = DownloadRequest::new(PLAYLIST_URL, ObjectType::Playlist, "x", 1);
        request.merge_tracks([
            TrackState::new("https://open.spotify.com/track/t1", "a", "x"),
            TrackState::new("https://open.spotify.com/track/t2", "b", "y"),
        ]);
        request.sync_count = 1;

        request.track_metadata[0].mark_found();
        request.recount();
        assert_eq!(lifecycle.evaluate(&mut request), RequestPhase::InProgress);

        let mut exhausted = request.clone();
        for _ in 0..spotsync_domain::MAX_FAILED_ATTEMPTS {
            exhausted.track_metadata[1].record_miss();
        }
        exhausted.recount();
        assert_eq!(lifecycle.evaluate(&mut exhausted), RequestPhase::Exhausted);
        assert!(exhausted.errored);

        request.track_metadata[1].mark_found();
        request.recount();
        assert_eq!(lifecycle.evaluate(&mut request), RequestPhase::Completed);
        assert!(!request.active);
        assert!(!request.errored);
    }

    #[tokio::test]
    async fn playlist_enqueue_requires_playlist_links() {
        let lifecycle = controller(3).await;
        let id = lifecycle.enqueue_playlist(PLAYLIST_URL, 1, true).await.unwrap();
        assert_eq!(lifecycle.enqueue_playlist(PLAYLIST_URL, 1, true).await.unwrap(), id);

        let active = lifecycle.list_active_playlists().await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].no_pull);

        let err = lifecycle
            .enqueue_playlist("https://open.spotify.com/album/a1", 1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn enqueue_track_skips_known_urls() {
        let lifecycle = controller(3).await;
        let track = ResolvedTrack::new("https://open.spotify.com/track/t7", "Burial", "Archangel");

        let id = lifecycle.enqueue_track(&track, 1).await.unwrap().expect("queued");
        assert!(lifecycle.enqueue_track(&track, 1).await.unwrap().is_none());

        lifecycle.deactivate(id).await.unwrap();
        assert!(
            lifecycle.enqueue_track(&track, 1).await.unwrap().is_none(),
            "already synced"
        );
    }

    #[tokio::test]
    async fn backfill_recognizes_user_shared_track_link() {
        let lifecycle = controller(3).await;
        let shared = "https://open.spotify.com/intl-en/track/t8?si=abc";
        let id = lifecycle.enqueue(shared, 1).await.unwrap();
        assert_eq!(
            lifecycle.get(id).await.unwrap().url,
            "https://open.spotify.com/track/t8"
        );

        let listed = ResolvedTrack::new("https://open.spotify.com/track/t8", "Burial", "Near Dark");
        assert!(lifecycle.enqueue_track(&listed, 1).await.unwrap().is_none());
        assert_eq!(lifecycle.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn playlist_enqueue_dedupes_shared_link_variants() {
        let lifecycle = controller(3).await;
        let id = lifecycle
            .enqueue_playlist("https://open.spotify.com/playlist/p1?si=1", 1, false)
            .await
            .unwrap();
        let again = lifecycle
            .enqueue_playlist(" https://open.spotify.com/intl-es/playlist/p1 ", 1, false)
            .await
            .unwrap();

        assert_eq!(id, again);
        let active = lifecycle.list_active_playlists().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].url, PLAYLIST_URL);
    }
}
