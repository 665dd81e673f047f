// SPDX-License-Identifier: GPL-3.0-or-later

//! Processing ticks over download requests.
//!
//! A pass (expand, reconcile, evaluate) runs under a deadline against a copy
//! of the request and is committed as one snapshot. A pass that fails or
//! times out commits nothing; only the retry bookkeeping is written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use spotsync_domain::{DownloadRequest, RequestPhase};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogIndex;
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::LifecycleController;
use crate::reconciler::Reconciler;

/// Totals of one sweep over the active requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub completed: usize,
    pub exhausted: usize,
    pub failed: usize,
    /// The catalog was re-indexed since the previous sweep, so lookups that
    /// missed before had a fresh chance this time. Informational only: the
    /// indexer that fills the catalog runs outside this crate.
    pub catalog_reindexed: bool,
}

pub struct RequestProcessor {
    lifecycle: Arc<LifecycleController>,
    reconciler: Arc<Reconciler>,
    catalog: Arc<CatalogIndex>,
    pass_timeout: Duration,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl RequestProcessor {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        reconciler: Arc<Reconciler>,
        catalog: Arc<CatalogIndex>,
        pass_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            reconciler,
            catalog,
            pass_timeout,
            last_sweep: Mutex::new(None),
        }
    }

    /// Run one pass over `request` and commit it.
    ///
    /// A pass that fails or runs past the deadline writes nothing. The error
    /// is returned after a separate lifecycle write that does the retry
    /// bookkeeping: a reference that no longer resolves exhausts the request,
    /// a resolver failure or timeout counts one retry, anything else leaves
    /// the stored request as it was.
    pub async fn process(&self, request: DownloadRequest) -> SyncResult<RequestPhase> {
        if !request.active {
            return Ok(request.phase());
        }

        let outcome = tokio::time::timeout(self.pass_timeout, self.run_pass(request.clone())).await;
        let updated = match outcome {
            Ok(Ok(updated)) => updated,
            Ok(Err(e)) => return Err(self.handle_failure(&request, e).await),
            Err(_) => {
                let e = SyncError::Timeout(self.pass_timeout);
                return Err(self.handle_failure(&request, e).await);
            }
        };

        self.lifecycle.commit(&updated).await?;
        Ok(updated.phase())
    }

    async fn run_pass(&self, mut request: DownloadRequest) -> SyncResult<DownloadRequest> {
        self.reconciler.expand(&mut request).await?;
        let mut request = self.reconciler.reconcile_pass(request).await?;
        self.lifecycle.evaluate(&mut request);
        Ok(request)
    }

    async fn handle_failure(&self, request: &DownloadRequest, err: SyncError) -> SyncError {
        warn!(
            target: "processor",
            request_id = %request.id,
            url = %request.url,
            error = %err,
            "reconciliation pass failed"
        );

        let bookkeeping = match &err {
            SyncError::InvalidReference(_) => self.lifecycle.exhaust(request).await.map(|_| ()),
            e if e.is_upstream() => self.lifecycle.record_failure(request).await.map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = bookkeeping {
            error!(
                target: "processor",
                request_id = %request.id,
                error = %e,
                "failed to record pass failure"
            );
        }
        err
    }

    /// Process every active request once. One request failing does not stop
    /// the others.
    pub async fn sweep(&self) -> SyncResult<SweepReport> {
        let started = Utc::now();
        let mut last_sweep = self.last_sweep.lock().await;

        let catalog_reindexed = match self.catalog.needs_rescan(*last_sweep).await {
            Ok(true) => {
                info!(target: "processor", "catalog re-indexed since last sweep");
                true
            }
            Ok(false) => {
                debug!(target: "processor", "catalog unchanged since last sweep");
                false
            }
            Err(e) => {
                warn!(target: "processor", error = %e, "could not read index status");
                false
            }
        };

        let requests = self.lifecycle.list_active().await?;
        let mut report = SweepReport {
            catalog_reindexed,
            ..SweepReport::default()
        };

        for request in requests {
            let id = request.id;
            match self.process(request).await {
                Ok(RequestPhase::Completed) => report.completed += 1,
                Ok(RequestPhase::Exhausted) => report.exhausted += 1,
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "processor", request_id = %id, error = %e, "request left for next sweep");
                    report.failed += 1;
                }
            }
            report.processed += 1;
        }

        *last_sweep = Some(started);
        info!(
            target: "processor",
            processed = report.processed,
            completed = report.completed,
            exhausted = report.exhausted,
            failed = report.failed,
            "sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedTrack;
    use crate::testing::{catalog_on, memory_db, FakeResolver, PLAYLIST_URL};
    use spotsync_domain::{MusicFile, MAX_FAILED_ATTEMPTS};
    use spotsync_infrastructure::sqlite_adapters::{
        SqliteDownloadRequestRepository, SqlitePlaylistRequestRepository,
    };

    struct Harness {
        resolver: Arc<FakeResolver>,
        catalog: Arc<CatalogIndex>,
        lifecycle: Arc<LifecycleController>,
        processor: RequestProcessor,
    }

    fn tracks() -> Vec<ResolvedTrack> {
        vec![
            ResolvedTrack::new("https://open.spotify.com/track/t1", "Portishead", "Roads"),
            ResolvedTrack::new("https://open.spotify.com/track/t2", "Tricky", "Overcome"),
            ResolvedTrack::new("https://open.spotify.com/track/t3", "Massive Attack", "Angel"),
        ]
    }

    async fn harness(max_retries: u32, pass_timeout: Duration) -> Harness {
        let db = memory_db().await;
        let resolver = Arc::new(FakeResolver::new().with_listing(PLAYLIST_URL, tracks()));
        let catalog = Arc::new(catalog_on(&db));
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::new(SqliteDownloadRequestRepository::new(db.clone())),
            Arc::new(SqlitePlaylistRequestRepository::new(db)),
            resolver.clone(),
            max_retries,
        ));
        let reconciler = Arc::new(Reconciler::new(resolver.clone(), catalog.clone()));
        let processor =
            RequestProcessor::new(lifecycle.clone(), reconciler, catalog.clone(), pass_timeout);
        Harness {
            resolver,
            catalog,
            lifecycle,
            processor,
        }
    }

    async fn index(catalog: &CatalogIndex, artist: &str, title: &str) {
        catalog
            .insert(MusicFile::new(artist, title, format!("/music/{}.flac", title)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn playlist_with_missing_track_ends_exhausted() {
        let h = harness(5, Duration::from_secs(5)).await;
        index(&h.catalog, "Portishead", "Roads").await;
        index(&h.catalog, "Massive Attack", "Angel").await;

        let id = h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();

        let phase = h.processor.process(h.lifecycle.get(id).await.unwrap()).await.unwrap();
        assert_eq!(phase, RequestPhase::InProgress);
        let request = h.lifecycle.get(id).await.unwrap();
        assert_eq!(request.found_track_count, 2);
        assert_eq!(request.expected_track_count, 3);
        assert_eq!(request.track_metadata[1].failed_attempts, 1);
        assert!(!request.track_metadata[1].skipped);

        for _ in 1..MAX_FAILED_ATTEMPTS {
            h.processor.process(h.lifecycle.get(id).await.unwrap()).await.unwrap();
        }

        let request = h.lifecycle.get(id).await.unwrap();
        let missing = &request.track_metadata[1];
        assert!(missing.skipped);
        assert!(!missing.found);
        assert_eq!(missing.failed_attempts, MAX_FAILED_ATTEMPTS);
        assert_eq!(request.phase(), RequestPhase::Exhausted);
        assert!(request.errored);
        assert!(!request.active);
        assert_eq!(request.found_track_count, 2);
        assert_eq!(request.sync_count, MAX_FAILED_ATTEMPTS);
    }

    #[tokio::test]
    async fn found_tracks_complete_the_request() {
        let h = harness(5, Duration::from_secs(5)).await;
        for t in tracks() {
            index(&h.catalog, &t.artist, &t.title).await;
        }
        let id = h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();

        let phase = h.processor.process(h.lifecycle.get(id).await.unwrap()).await.unwrap();
        assert_eq!(phase, RequestPhase::Completed);
        let request = h.lifecycle.get(id).await.unwrap();
        assert!(!request.active);
        assert!(!request.errored);
        assert_eq!(request.found_track_count, request.expected_track_count);
    }

    #[tokio::test]
    async fn empty_playlist_completes_immediately() {
        let h = harness(5, Duration::from_secs(5)).await;
        let url = "https://open.spotify.com/playlist/empty1";
        h.resolver.set_listing(url, Vec::new());
        let id = h.lifecycle.enqueue(url, 1).await.unwrap();

        let phase = h.processor.process(h.lifecycle.get(id).await.unwrap()).await.unwrap();
        assert_eq!(phase, RequestPhase::Completed);
    }

    #[tokio::test]
    async fn upstream_failure_persists_only_retry_count() {
        let h = harness(5, Duration::from_secs(5)).await;
        let id = h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        h.resolver.set_outage(true);

        let err = h
            .processor
            .process(h.lifecycle.get(id).await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UpstreamUnavailable(_)));

        let request = h.lifecycle.get(id).await.unwrap();
        assert_eq!(request.retry_count, 1);
        assert_eq!(request.sync_count, 0);
        assert!(request.track_metadata.is_empty());
        assert!(request.active);
    }

    #[tokio::test]
    async fn timed_out_pass_commits_nothing() {
        let h = harness(5, Duration::from_millis(50)).await;
        let id = h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        h.resolver.set_delay(Some(Duration::from_millis(500)));

        let err = h
            .processor
            .process(h.lifecycle.get(id).await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));

        let request = h.lifecycle.get(id).await.unwrap();
        assert!(request.track_metadata.is_empty());
        assert_eq!(request.sync_count, 0);
        assert_eq!(request.retry_count, 1);
    }

    #[tokio::test]
    async fn retries_beyond_ceiling_exhaust_request() {
        let h = harness(1, Duration::from_secs(5)).await;
        let id = h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        h.resolver.set_outage(true);

        for _ in 0..2 {
            let request = h.lifecycle.get(id).await.unwrap();
            assert!(h.processor.process(request).await.is_err());
        }

        let request = h.lifecycle.get(id).await.unwrap();
        assert_eq!(request.retry_count, 2);
        assert_eq!(request.phase(), RequestPhase::Exhausted);
    }

    #[tokio::test]
    async fn vanished_reference_exhausts_request() {
        let h = harness(5, Duration::from_secs(5)).await;
        let url = "https://open.spotify.com/album/gone1";
        let id = h.lifecycle.enqueue(url, 1).await.unwrap();

        let err = h
            .processor
            .process(h.lifecycle.get(id).await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidReference(_)));

        let request = h.lifecycle.get(id).await.unwrap();
        assert!(request.errored);
        assert!(!request.active);
    }

    #[tokio::test]
    async fn stale_copy_loses_to_concurrent_pass() {
        let h = harness(5, Duration::from_secs(5)).await;
        let id = h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        let first = h.lifecycle.get(id).await.unwrap();
        let second = first.clone();

        h.processor.process(first).await.unwrap();
        let err = h.processor.process(second).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));

        let request = h.lifecycle.get(id).await.unwrap();
        assert_eq!(request.sync_count, 1);
        assert_eq!(request.retry_count, 0);
    }

    #[tokio::test]
    async fn sweep_isolates_failing_requests() {
        let h = harness(5, Duration::from_secs(5)).await;
        for t in tracks() {
            index(&h.catalog, &t.artist, &t.title).await;
        }
        h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        h.lifecycle
            .enqueue("https://open.spotify.com/album/gone1", 1)
            .await
            .unwrap();
        h.resolver.set_listing("https://open.spotify.com/playlist/p2", tracks()[..1].to_vec());
        h.lifecycle
            .enqueue("https://open.spotify.com/playlist/p2", 1)
            .await
            .unwrap();

        let report = h.processor.sweep().await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert!(h.lifecycle.list_active().await.unwrap().is_empty());

        let report = h.processor.sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn sweep_reports_catalog_reindex_once() {
        let h = harness(5, Duration::from_secs(5)).await;
        assert!(!h.processor.sweep().await.unwrap().catalog_reindexed);

        h.catalog.mark_indexed(Utc::now()).await.unwrap();
        assert!(h.processor.sweep().await.unwrap().catalog_reindexed);
        assert!(!h.processor.sweep().await.unwrap().catalog_reindexed);
    }

    #[tokio::test]
    async fn inactive_requests_are_not_reprocessed() {
        let h = harness(5, Duration::from_secs(5)).await;
        let id = h.lifecycle.enqueue(PLAYLIST_URL, 1).await.unwrap();
        h.lifecycle.deactivate(id).await.unwrap();

        let calls = h.resolver.list_calls();
        let request = h.lifecycle.get(id).await.unwrap();
        h.processor.process(request).await.unwrap();
        assert_eq!(h.resolver.list_calls(), calls);
    }
}
