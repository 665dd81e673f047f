// SPDX-License-Identifier: GPL-3.0-or-later
pub mod catalog;
pub mod error;
pub mod lifecycle;
pub mod playlists;
pub mod processor;
pub mod reconciler;
pub mod resolver;
#[cfg(test)]
pub(crate) mod testing;

pub use catalog::CatalogIndex;
pub use error::{SyncError, SyncResult};
pub use lifecycle::LifecycleController;
pub use playlists::{PlaylistCheck, PlaylistMonitor, PlaylistSweepReport};
pub use processor::{RequestProcessor, SweepReport};
pub use reconciler::Reconciler;
pub use resolver::{CatalogResolver, ResolvedTrack};

use std::sync::Arc;
use std::time::Duration;

use spotsync_config::ReconcilerConfig;
use spotsync_infrastructure::sqlite_adapters::{
    SqliteDownloadRequestRepository, SqliteIndexStatusRepository, SqliteMusicFileRepository,
    SqlitePlaylistRequestRepository,
};
use spotsync_infrastructure::Database;
use tracing::info;

/// The reconciliation services wired onto one database and one resolver.
#[derive(Clone)]
pub struct SyncServices {
    pub catalog: Arc<CatalogIndex>,
    pub lifecycle: Arc<LifecycleController>,
    pub reconciler: Arc<Reconciler>,
    pub processor: Arc<RequestProcessor>,
    pub playlists: Arc<PlaylistMonitor>,
}

impl SyncServices {
    pub fn new(db: Database, resolver: Arc<dyn CatalogResolver>, config: &ReconcilerConfig) -> Self {
        let pass_timeout = Duration::from_secs(config.pass_timeout_secs);

        let catalog = Arc::new(CatalogIndex::new(
            Arc::new(SqliteMusicFileRepository::new(db.clone())),
            Arc::new(SqliteIndexStatusRepository::new(db.clone())),
        ));
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::new(SqliteDownloadRequestRepository::new(db.clone())),
            Arc::new(SqlitePlaylistRequestRepository::new(db)),
            resolver.clone(),
            config.max_retries,
        ));
        let reconciler = Arc::new(Reconciler::new(resolver.clone(), catalog.clone()));
        let processor = Arc::new(RequestProcessor::new(
            lifecycle.clone(),
            reconciler.clone(),
            catalog.clone(),
            pass_timeout,
        ));
        let playlists = Arc::new(PlaylistMonitor::new(
            lifecycle.clone(),
            resolver,
            catalog.clone(),
            pass_timeout,
        ));

        info!(
            target: "application",
            max_retries = config.max_retries,
            pass_timeout_secs = config.pass_timeout_secs,
            "sync services initialized"
        );

        Self {
            catalog,
            lifecycle,
            reconciler,
            processor,
            playlists,
        }
    }
}
