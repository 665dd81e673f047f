// SPDX-License-Identifier: GPL-3.0-or-later

//! Continuous monitoring of playlists for tracks missing from the catalog.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use spotsync_domain::{normalize_name, MusicFile, PlaylistRequest};
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogIndex;
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::LifecycleController;
use crate::resolver::{CatalogResolver, ResolvedTrack};

/// Result of checking one playlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaylistCheck {
    pub total: usize,
    pub missing: usize,
    pub queued: usize,
    /// Missing entries with no usable link of their own.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaylistSweepReport {
    pub checked: usize,
    pub missing: usize,
    pub queued: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct PlaylistMonitor {
    lifecycle: Arc<LifecycleController>,
    resolver: Arc<dyn CatalogResolver>,
    catalog: Arc<CatalogIndex>,
    check_timeout: Duration,
}

impl PlaylistMonitor {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        resolver: Arc<dyn CatalogResolver>,
        catalog: Arc<CatalogIndex>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            resolver,
            catalog,
            check_timeout,
        }
    }

    /// Compare the playlist against the catalog and, unless `no_pull` is set,
    /// queue a track request for each missing track not already requested.
    ///
    /// A missing entry whose own link is unusable is skipped and counted; the
    /// rest of the playlist is still queued.
    pub async fn check(&self, playlist: &PlaylistRequest) -> SyncResult<PlaylistCheck> {
        let listed = tokio::time::timeout(self.check_timeout, self.missing_tracks(playlist)).await;
        let (total, missing) = match listed {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => return Err(self.handle_failure(playlist, e).await),
            Err(_) => {
                let e = SyncError::Timeout(self.check_timeout);
                return Err(self.handle_failure(playlist, e).await);
            }
        };

        let mut check = PlaylistCheck {
            total,
            missing: missing.len(),
            ..PlaylistCheck::default()
        };

        if playlist.no_pull {
            debug!(target: "playlists", request_id = %playlist.id, missing = check.missing, "pulling disabled");
            return Ok(check);
        }

        for track in &missing {
            match self.lifecycle.enqueue_track(track, playlist.creator_id).await {
                Ok(Some(_)) => check.queued += 1,
                Ok(None) => {}
                Err(SyncError::InvalidReference(reason)) => {
                    warn!(
                        target: "playlists",
                        request_id = %playlist.id,
                        artist = %track.artist,
                        title = %track.title,
                        %reason,
                        "skipping playlist entry without a usable link"
                    );
                    check.skipped += 1;
                }
                Err(e) => return Err(self.handle_failure(playlist, e).await),
            }
        }

        info!(
            target: "playlists",
            request_id = %playlist.id,
            total = check.total,
            missing = check.missing,
            queued = check.queued,
            skipped = check.skipped,
            "playlist checked"
        );
        Ok(check)
    }

    async fn missing_tracks(
        &self,
        playlist: &PlaylistRequest,
    ) -> SyncResult<(usize, Vec<ResolvedTrack>)> {
        let tracks = self.resolver.list_tracks(&playlist.url).await?;
        let keys: Vec<(String, String)> = tracks
            .iter()
            .map(|t| (normalize_name(&t.artist), normalize_name(&t.title)))
            .collect();
        let present: HashSet<(String, String)> = self
            .catalog
            .bulk_find(&keys)
            .await?
            .iter()
            .map(MusicFile::match_key)
            .collect();

        let total = tracks.len();
        let missing = tracks
            .into_iter()
            .zip(keys)
            .filter(|(_, key)| !present.contains(key))
            .map(|(track, _)| track)
            .collect();
        Ok((total, missing))
    }

    async fn handle_failure(&self, playlist: &PlaylistRequest, err: SyncError) -> SyncError {
        warn!(
            target: "playlists",
            request_id = %playlist.id,
            url = %playlist.url,
            error = %err,
            "playlist check failed"
        );
        let bookkeeping = match &err {
            SyncError::InvalidReference(_) => {
                self.lifecycle.exhaust_playlist(playlist).await.map(|_| ())
            }
            e if e.is_upstream() => self
                .lifecycle
                .record_playlist_failure(playlist)
                .await
                .map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = bookkeeping {
            error!(target: "playlists", request_id = %playlist.id, error = %e, "failed to record check failure");
        }
        err
    }

    /// Check every active playlist once.
    pub async fn sweep(&self) -> SyncResult<PlaylistSweepReport> {
        let playlists = self.lifecycle.list_active_playlists().await?;
        let mut report = PlaylistSweepReport::default();

        for playlist in &playlists {
            match self.check(playlist).await {
                Ok(check) => {
                    report.missing += check.missing;
                    report.queued += check.queued;
                    report.skipped += check.skipped;
                }
                Err(_) => report.failed += 1,
            }
            report.checked += 1;
        }

        info!(
            target: "playlists",
            checked = report.checked,
            missing = report.missing,
            queued = report.queued,
            skipped = report.skipped,
            failed = report.failed,
            "playlist sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog_on, memory_db, FakeResolver, PLAYLIST_URL};
    use spotsync_domain::ObjectType;
    use spotsync_infrastructure::sqlite_adapters::{
        SqliteDownloadRequestRepository, SqlitePlaylistRequestRepository,
    };

    fn tracks() -> Vec<ResolvedTrack> {
        vec![
            ResolvedTrack::new("https://open.spotify.com/track/t1", "Bonobo", "Kerala"),
            ResolvedTrack::new("https://open.spotify.com/track/t2", "Four Tet", "Baby"),
        ]
    }

    async fn setup(
        max_retries: u32,
    ) -> (
        PlaylistMonitor,
        Arc<LifecycleController>,
        Arc<CatalogIndex>,
        Arc<FakeResolver>,
    ) {
        let db = memory_db().await;
        let resolver = Arc::new(FakeResolver::new().with_listing(PLAYLIST_URL, tracks()));
        let catalog = Arc::new(catalog_on(&db));
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::new(SqliteDownloadRequestRepository::new(db.clone())),
            Arc::new(SqlitePlaylistRequestRepository::new(db)),
            resolver.clone(),
            max_retries,
        ));
        let monitor = PlaylistMonitor::new(
            lifecycle.clone(),
            resolver.clone(),
            catalog.clone(),
            Duration::from_secs(5),
        );
        (monitor, lifecycle, catalog, resolver)
    }

    async fn active_playlist(lifecycle: &LifecycleController) -> PlaylistRequest {
        lifecycle
            .list_active_playlists()
            .await
            .unwrap()
            .into_iter()
            .next()
            .expect("active playlist")
    }

    #[tokio::test]
    async fn missing_tracks_are_queued_once() {
        let (monitor, lifecycle, catalog, _) = setup(3).await;
        catalog
            .insert(MusicFile::new("Bonobo", "Kerala", "/m/kerala.flac"))
            .await
            .unwrap();
        lifecycle.enqueue_playlist(PLAYLIST_URL, 9, false).await.unwrap();
        let playlist = active_playlist(&lifecycle).await;

        let check = monitor.check(&playlist).await.unwrap();
        assert_eq!(
            check,
            PlaylistCheck { total: 2, missing: 1, queued: 1, skipped: 0 }
        );

        let queued = lifecycle.list_active().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].object_type, ObjectType::Track);
        assert_eq!(queued[0].url, "https://open.spotify.com/track/t2");
        assert_eq!(queued[0].creator_id, 9);
        assert_eq!(queued[0].expected_track_count, 1);

        let again = monitor.check(&playlist).await.unwrap();
        assert_eq!(again.queued, 0);
        assert!(active_playlist(&lifecycle).await.active);
    }

    #[tokio::test]
    async fn entry_without_link_does_not_block_the_rest() {
        let (monitor, lifecycle, _, resolver) = setup(3).await;
        resolver.set_listing(
            PLAYLIST_URL,
            vec![
                ResolvedTrack::new("", "Me", "Home Recording"),
                ResolvedTrack::new("https://open.spotify.com/episode/e1", "Host", "Episode 12"),
                ResolvedTrack::new("https://open.spotify.com/track/t2", "Four Tet", "Baby"),
            ],
        );
        lifecycle.enqueue_playlist(PLAYLIST_URL, 1, false).await.unwrap();
        let playlist = active_playlist(&lifecycle).await;

        let check = monitor.check(&playlist).await.unwrap();
        assert_eq!(
            check,
            PlaylistCheck { total: 3, missing: 3, queued: 1, skipped: 2 }
        );

        let queued = lifecycle.list_active().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].url, "https://open.spotify.com/track/t2");

        let playlist = active_playlist(&lifecycle).await;
        assert_eq!(playlist.retry_count, 0);
        assert!(!playlist.errored);
    }

    #[tokio::test]
    async fn no_pull_only_reports() {
        let (monitor, lifecycle, _, _) = setup(3).await;
        lifecycle.enqueue_playlist(PLAYLIST_URL, 1, true).await.unwrap();
        let playlist = active_playlist(&lifecycle).await;

        let check = monitor.check(&playlist).await.unwrap();
        assert_eq!(check.missing, 2);
        assert_eq!(check.queued, 0);
        assert!(lifecycle.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outages_count_against_playlist_retries() {
        let (monitor, lifecycle, _, resolver) = setup(1).await;
        lifecycle.enqueue_playlist(PLAYLIST_URL, 1, false).await.unwrap();
        resolver.set_outage(true);

        let report = monitor.sweep().await.unwrap();
        assert_eq!(report.failed, 1);
        let playlist = active_playlist(&lifecycle).await;
        assert_eq!(playlist.retry_count, 1);

        monitor.sweep().await.unwrap();
        assert!(lifecycle.list_active_playlists().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_totals_checks() {
        let (monitor, lifecycle, _, _) = setup(3).await;
        lifecycle.enqueue_playlist(PLAYLIST_URL, 1, false).await.unwrap();

        let report = monitor.sweep().await.unwrap();
        assert_eq!(
            report,
            PlaylistSweepReport { checked: 1, missing: 2, queued: 2, skipped: 0, failed: 0 }
        );
    }
}
