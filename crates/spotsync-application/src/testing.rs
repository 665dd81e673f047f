// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spotsync_domain::ObjectType;
use spotsync_infrastructure::sqlite_adapters::{
    SqliteIndexStatusRepository, SqliteMusicFileRepository,
};
use spotsync_infrastructure::{ConnectOptions, Database};
use spotsync_spotify::SpotifyReference;

use crate::catalog::CatalogIndex;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{object_type_of, CatalogResolver, ResolvedTrack};

pub(crate) const PLAYLIST_URL: &str = "https://open.spotify.com/playlist/p1";

pub(crate) async fn memory_db() -> Database {
    Database::connect(ConnectOptions::new("sqlite::memory:"))
        .await
        .expect("connect in-memory sqlite")
}

pub(crate) fn catalog_on(db: &Database) -> CatalogIndex {
    CatalogIndex::new(
        Arc::new(SqliteMusicFileRepository::new(db.clone())),
        Arc::new(SqliteIndexStatusRepository::new(db.clone())),
    )
}

pub(crate) async fn memory_catalog() -> CatalogIndex {
    catalog_on(&memory_db().await)
}

/// Resolver answering from a fixed table of listings.
#[derive(Default)]
pub(crate) struct FakeResolver {
    listings: Mutex<HashMap<String, Vec<ResolvedTrack>>>,
    outage: AtomicBool,
    delay: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
}

impl FakeResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_listing(self, url: &str, tracks: Vec<ResolvedTrack>) -> Self {
        self.set_listing(url, tracks);
        self
    }

    pub(crate) fn set_listing(&self, url: &str, tracks: Vec<ResolvedTrack>) {
        self.listings
            .lock()
            .unwrap()
            .insert(url.to_string(), tracks);
    }

    /// Every network-backed call fails while set.
    pub(crate) fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    async fn network(&self) -> SyncResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.outage.load(Ordering::SeqCst) {
            return Err(SyncError::UpstreamUnavailable("503 Service Unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogResolver for FakeResolver {
    fn validate(&self, url: &str) -> SyncResult<String> {
        Ok(SpotifyReference::parse(url)?.url())
    }

    async fn resolve_type(&self, url: &str) -> SyncResult<ObjectType> {
        Ok(object_type_of(SpotifyReference::parse(url)?.object_type))
    }

    async fn list_tracks(&self, url: &str) -> SyncResult<Vec<ResolvedTrack>> {
        self.validate(url)?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.network().await?;

        if let Some(tracks) = self.listings.lock().unwrap().get(url) {
            return Ok(tracks.clone());
        }
        let reference = SpotifyReference::parse(url)?;
        if reference.object_type == spotsync_spotify::SpotifyObjectType::Track {
            return Ok(vec![ResolvedTrack::new(url, "Unknown Artist", reference.id)]);
        }
        Err(SyncError::InvalidReference(format!("not found: {}", url)))
    }

    async fn display_name(&self, url: &str) -> SyncResult<String> {
        let reference = SpotifyReference::parse(url)?;
        self.network().await?;
        Ok(format!("{} {}", reference.object_type, reference.id))
    }
}
