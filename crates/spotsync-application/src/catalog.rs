// SPDX-License-Identifier: GPL-3.0-or-later

//! Catalog index of locally available audio files.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use spotsync_domain::{normalize_name, IndexStatus, MusicFile, MusicFileId};
use spotsync_infrastructure::repositories::{IndexStatusRepository, MusicFileRepository};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Lookup and ingestion over the indexed files, plus the index freshness
/// marker.
pub struct CatalogIndex {
    files: Arc<dyn MusicFileRepository>,
    status: Arc<dyn IndexStatusRepository>,
}

impl CatalogIndex {
    pub fn new(files: Arc<dyn MusicFileRepository>, status: Arc<dyn IndexStatusRepository>) -> Self {
        Self { files, status }
    }

    /// Every file matching any of `pairs` exactly. The i-th artist only ever
    /// pairs with the i-th title. Free-form metadata is not returned.
    pub async fn bulk_find(&self, pairs: &[(String, String)]) -> SyncResult<Vec<MusicFile>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<(String, String)> = pairs
            .iter()
            .map(|(artist, title)| (normalize_name(artist), normalize_name(title)))
            .collect();

        let found = self.files.bulk_find(&keys).await?;
        debug!(target: "catalog", pairs = keys.len(), matches = found.len(), "bulk find");
        Ok(found)
    }

    /// Index a newly ingested file under a fresh identity and creation time.
    /// Duplicate (artist, title) pairs are accepted.
    pub async fn insert(&self, mut file: MusicFile) -> SyncResult<MusicFile> {
        let now = Utc::now();
        file.id = MusicFileId::new();
        file.created_at = now;
        file.updated_at = now;

        self.files.insert(&file).await?;
        debug!(target: "catalog", file_id = %file.id, artist = %file.artist, title = %file.title, "file indexed");
        Ok(file)
    }

    /// Remove every indexed file. Refused unless `confirmed` is true.
    pub async fn drop_all(&self, confirmed: bool) -> SyncResult<u64> {
        if !confirmed {
            warn!(target: "catalog", "refusing to drop catalog without confirmation");
            return Err(SyncError::ConfirmationRequired);
        }
        let removed = self.files.delete_all().await?;
        info!(target: "catalog", removed, "catalog dropped");
        Ok(removed)
    }

    pub async fn count(&self) -> SyncResult<i64> {
        Ok(self.files.count().await?)
    }

    pub async fn index_status(&self) -> SyncResult<IndexStatus> {
        Ok(self.status.get().await?)
    }

    /// Record a finished indexing pass.
    pub async fn mark_indexed(&self, at: DateTime<Utc>) -> SyncResult<IndexStatus> {
        let mut status = self.status.get().await?;
        status.mark_indexed(at);
        self.status.update(&status).await?;
        info!(target: "catalog", indexed_at = %at, "index status updated");
        Ok(status)
    }

    /// Whether the catalog was re-indexed after `since`, so that lookups which
    /// missed before may now hit.
    pub async fn needs_rescan(&self, since: Option<DateTime<Utc>>) -> SyncResult<bool> {
        Ok(self.status.get().await?.indexed_since(since))
    }
}
