// SPDX-License-Identifier: GPL-3.0-or-later
use spotsync_domain::{
    DownloadRequest, IndexStatus, MusicFile, PlaylistProgress, PlaylistRequest, RequestId,
    RequestProgress,
};

use crate::error::StoreResult;

// ============================================================================
// Repository Traits
// ============================================================================

/// Durable download requests.
///
/// Writes that change an existing request are compare-and-set on its
/// `version`: they succeed only if the stored version still equals the one
/// the caller read, and return the new version.
#[async_trait::async_trait]
pub trait DownloadRequestRepository: Send + Sync {
    async fn insert(&self, request: &DownloadRequest) -> StoreResult<()>;
    async fn get(&self, id: RequestId) -> StoreResult<Option<DownloadRequest>>;
    /// Every request with `active == true`, in no particular order.
    async fn list_active(&self) -> StoreResult<Vec<DownloadRequest>>;
    async fn find_active_by_url(&self, url: &str) -> StoreResult<Option<DownloadRequest>>;
    /// Whether an inactive request for `url` exists.
    async fn is_already_synced(&self, url: &str) -> StoreResult<bool>;
    /// Persist the lifecycle counters as one statement.
    async fn record_progress(&self, id: RequestId, progress: RequestProgress) -> StoreResult<i64>;
    /// Persist the full request, tracks included, as one statement.
    async fn save_snapshot(&self, request: &DownloadRequest) -> StoreResult<i64>;
    /// Set `active = false`. Returns `false` when it already was.
    async fn deactivate(&self, id: RequestId) -> StoreResult<bool>;
}

/// Durable playlist monitors.
#[async_trait::async_trait]
pub trait PlaylistRequestRepository: Send + Sync {
    async fn insert(&self, request: &PlaylistRequest) -> StoreResult<()>;
    async fn get(&self, id: RequestId) -> StoreResult<Option<PlaylistRequest>>;
    async fn list_active(&self) -> StoreResult<Vec<PlaylistRequest>>;
    async fn find_active_by_url(&self, url: &str) -> StoreResult<Option<PlaylistRequest>>;
    async fn record_progress(&self, id: RequestId, progress: PlaylistProgress)
        -> StoreResult<i64>;
}

/// Indexed audio files.
#[async_trait::async_trait]
pub trait MusicFileRepository: Send + Sync {
    /// Files whose normalized (artist, title) equals any of `keys`, pairwise.
    /// `meta_data` is left empty on the returned files.
    async fn bulk_find(&self, keys: &[(String, String)]) -> StoreResult<Vec<MusicFile>>;
    async fn insert(&self, file: &MusicFile) -> StoreResult<()>;
    async fn delete_all(&self) -> StoreResult<u64>;
    async fn count(&self) -> StoreResult<i64>;
}

/// The process-wide index freshness marker.
#[async_trait::async_trait]
pub trait IndexStatusRepository: Send + Sync {
    async fn get(&self) -> StoreResult<IndexStatus>;
    async fn update(&self, status: &IndexStatus) -> StoreResult<()>;
}
