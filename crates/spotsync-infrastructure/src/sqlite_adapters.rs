// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use spotsync_domain::{
    DownloadRequest, IndexStatus, MusicFile, MusicFileId, ObjectType, PlaylistProgress,
    PlaylistRequest, RequestId, RequestProgress, TrackState,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{StoreError, StoreResult};
use crate::repositories::{
    DownloadRequestRepository, IndexStatusRepository, MusicFileRepository,
    PlaylistRequestRepository,
};

/// Pairs per lookup statement; two bound parameters each.
const BULK_FIND_CHUNK: usize = 400;

const REQUEST_COLUMNS: &str = "id, creator_id, spotify_url, object_type, name, active, errored, \
     created_at, updated_at, sync_count, retry_count, expected_track_count, found_track_count, \
     track_metadata, version";

const PLAYLIST_COLUMNS: &str =
    "id, creator_id, spotify_url, active, errored, retry_count, no_pull, created_at, updated_at, version";

/// `meta_data` is never part of a lookup result.
const MUSIC_FILE_COLUMNS: &str =
    "id, creator_id, artist, album, title, genre, path, created_at, updated_at";

/// SQLx-backed download request repository
pub struct SqliteDownloadRequestRepository {
    db: Database,
}

impl SqliteDownloadRequestRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl DownloadRequestRepository for SqliteDownloadRequestRepository {
    async fn insert(&self, request: &DownloadRequest) -> StoreResult<()> {
        debug!(target: "repository", request_id = %request.id, url = %request.url, "inserting download request");
        let pool = self.db.acquire().await?;
        let q = r#"
            INSERT INTO download_requests (
                id, creator_id, spotify_url, object_type, name, active, errored,
                created_at, updated_at, sync_count, retry_count,
                expected_track_count, found_track_count, track_metadata, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        sqlx::query(q)
            .bind(request.id.to_string())
            .bind(request.creator_id)
            .bind(&request.url)
            .bind(request.object_type.to_string())
            .bind(&request.name)
            .bind(request.active)
            .bind(request.errored)
            .bind(request.created_at.to_rfc3339())
            .bind(request.updated_at.to_rfc3339())
            .bind(i64::from(request.sync_count))
            .bind(i64::from(request.retry_count))
            .bind(i64::from(request.expected_track_count))
            .bind(i64::from(request.found_track_count))
            .bind(serde_json::to_string(&request.track_metadata)?)
            .bind(request.version)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: RequestId) -> StoreResult<Option<DownloadRequest>> {
        debug!(target: "repository", request_id = %id, "fetching download request");
        let pool = self.db.acquire().await?;
        let q = format!("SELECT {} FROM download_requests WHERE id = ? LIMIT 1", REQUEST_COLUMNS);
        let row = sqlx::query(&q)
            .bind(id.to_string())
            .fetch_optional(&pool)
            .await?;
        row.map(|r| row_to_download_request(&r)).transpose()
    }

    async fn list_active(&self) -> StoreResult<Vec<DownloadRequest>> {
        debug!(target: "repository", "listing active download requests");
        let pool = self.db.acquire().await?;
        let q = format!("SELECT {} FROM download_requests WHERE active = 1", REQUEST_COLUMNS);
        let rows = sqlx::query(&q).fetch_all(&pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_download_request(&r)?);
        }
        Ok(out)
    }

    async fn find_active_by_url(&self, url: &str) -> StoreResult<Option<DownloadRequest>> {
        debug!(target: "repository", url, "fetching active download request by url");
        let pool = self.db.acquire().await?;
        let q = format!(
            "SELECT {} FROM download_requests WHERE spotify_url = ? AND active = 1 LIMIT 1",
            REQUEST_COLUMNS
        );
        let row = sqlx::query(&q).bind(url).fetch_optional(&pool).await?;
        row.map(|r| row_to_download_request(&r)).transpose()
    }

    async fn is_already_synced(&self, url: &str) -> StoreResult<bool> {
        let pool = self.db.acquire().await?;
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM download_requests WHERE spotify_url = ? AND active = 0) AS synced",
        )
        .bind(url)
        .fetch_one(&pool)
        .await?;
        Ok(row.try_get("synced")?)
    }

    async fn record_progress(&self, id: RequestId, progress: RequestProgress) -> StoreResult<i64> {
        debug!(
            target: "repository",
            request_id = %id,
            active = progress.active,
            errored = progress.errored,
            sync_count = progress.sync_count,
            retry_count = progress.retry_count,
            "recording progress"
        );
        let pool = self.db.acquire().await?;
        let q = r#"
            UPDATE download_requests SET
                active = ?,
                errored = ?,
                sync_count = ?,
                retry_count = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
        "#;
        let result = sqlx::query(q)
            .bind(progress.active)
            .bind(progress.errored)
            .bind(i64::from(progress.sync_count))
            .bind(i64::from(progress.retry_count))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .bind(progress.version)
            .execute(&pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(stale_write(&pool, "download_requests", id).await);
        }
        Ok(progress.version + 1)
    }

    async fn save_snapshot(&self, request: &DownloadRequest) -> StoreResult<i64> {
        debug!(
            target: "repository",
            request_id = %request.id,
            found = request.found_track_count,
            expected = request.expected_track_count,
            "saving request snapshot"
        );
        let pool = self.db.acquire().await?;
        let q = r#"
            UPDATE download_requests SET
                name = ?,
                active = ?,
                errored = ?,
                updated_at = ?,
                sync_count = ?,
                retry_count = ?,
                expected_track_count = ?,
                found_track_count = ?,
                track_metadata = ?,
                version = version + 1
            WHERE id = ? AND version = ?
        "#;
        let result = sqlx::query(q)
            .bind(&request.name)
            .bind(request.active)
            .bind(request.errored)
            .bind(request.updated_at.to_rfc3339())
            .bind(i64::from(request.sync_count))
            .bind(i64::from(request.retry_count))
            .bind(i64::from(request.expected_track_count))
            .bind(i64::from(request.found_track_count))
            .bind(serde_json::to_string(&request.track_metadata)?)
            .bind(request.id.to_string())
            .bind(request.version)
            .execute(&pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(stale_write(&pool, "download_requests", request.id).await);
        }
        Ok(request.version + 1)
    }

    async fn deactivate(&self, id: RequestId) -> StoreResult<bool> {
        debug!(target: "repository", request_id = %id, "deactivating download request");
        let pool = self.db.acquire().await?;
        let result = sqlx::query(
            "UPDATE download_requests SET active = 0, updated_at = ?, version = version + 1 \
             WHERE id = ? AND active = 1",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match stale_write(&pool, "download_requests", id).await {
            StoreError::Conflict(_) => Ok(false),
            other => Err(other),
        }
    }
}

/// SQLx-backed playlist request repository
pub struct SqlitePlaylistRequestRepository {
    db: Database,
}

impl SqlitePlaylistRequestRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl PlaylistRequestRepository for SqlitePlaylistRequestRepository {
    async fn insert(&self, request: &PlaylistRequest) -> StoreResult<()> {
        debug!(target: "repository", request_id = %request.id, url = %request.url, "inserting playlist request");
        let pool = self.db.acquire().await?;
        let q = r#"
            INSERT INTO playlist_requests (
                id, creator_id, spotify_url, active, errored, retry_count, no_pull,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        sqlx::query(q)
            .bind(request.id.to_string())
            .bind(request.creator_id)
            .bind(&request.url)
            .bind(request.active)
            .bind(request.errored)
            .bind(i64::from(request.retry_count))
            .bind(request.no_pull)
            .bind(request.created_at.to_rfc3339())
            .bind(request.updated_at.to_rfc3339())
            .bind(request.version)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: RequestId) -> StoreResult<Option<PlaylistRequest>> {
        debug!(target: "repository", request_id = %id, "fetching playlist request");
        let pool = self.db.acquire().await?;
        let q = format!("SELECT {} FROM playlist_requests WHERE id = ? LIMIT 1", PLAYLIST_COLUMNS);
        let row = sqlx::query(&q)
            .bind(id.to_string())
            .fetch_optional(&pool)
            .await?;
        row.map(|r| row_to_playlist_request(&r)).transpose()
    }

    async fn list_active(&self) -> StoreResult<Vec<PlaylistRequest>> {
        debug!(target: "repository", "listing active playlist requests");
        let pool = self.db.acquire().await?;
        let q = format!("SELECT {} FROM playlist_requests WHERE active = 1", PLAYLIST_COLUMNS);
        let rows = sqlx::query(&q).fetch_all(&pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_playlist_request(&r)?);
        }
        Ok(out)
    }

    async fn find_active_by_url(&self, url: &str) -> StoreResult<Option<PlaylistRequest>> {
        let pool = self.db.acquire().await?;
        let q = format!(
            "SELECT {} FROM playlist_requests WHERE spotify_url = ? AND active = 1 LIMIT 1",
            PLAYLIST_COLUMNS
        );
        let row = sqlx::query(&q).bind(url).fetch_optional(&pool).await?;
        row.map(|r| row_to_playlist_request(&r)).transpose()
    }

    async fn record_progress(
        &self,
        id: RequestId,
        progress: PlaylistProgress,
    ) -> StoreResult<i64> {
        debug!(
            target: "repository",
            request_id = %id,
            active = progress.active,
            errored = progress.errored,
            retry_count = progress.retry_count,
            "recording playlist progress"
        );
        let pool = self.db.acquire().await?;
        let q = r#"
            UPDATE playlist_requests SET
                active = ?,
                errored = ?,
                retry_count = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
        "#;
        let result = sqlx::query(q)
            .bind(progress.active)
            .bind(progress.errored)
            .bind(i64::from(progress.retry_count))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .bind(progress.version)
            .execute(&pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(stale_write(&pool, "playlist_requests", id).await);
        }
        Ok(progress.version + 1)
    }
}

/// SQLx-backed music file repository
pub struct SqliteMusicFileRepository {
    db: Database,
}

impl SqliteMusicFileRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl MusicFileRepository for SqliteMusicFileRepository {
    async fn bulk_find(&self, keys: &[(String, String)]) -> StoreResult<Vec<MusicFile>> {
        let mut seen = HashSet::with_capacity(keys.len());
        let unique: Vec<&(String, String)> = keys.iter().filter(|k| seen.insert(*k)).collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        debug!(target: "repository", pairs = unique.len(), "bulk finding music files");
        let pool = self.db.acquire().await?;
        let mut out = Vec::new();

        for chunk in unique.chunks(BULK_FIND_CHUNK) {
            let clause = vec!["(artist_key = ? AND title_key = ?)"; chunk.len()].join(" OR ");
            let q = format!("SELECT {} FROM music_files WHERE {}", MUSIC_FILE_COLUMNS, clause);

            let mut query = sqlx::query(&q);
            for (artist, title) in chunk.iter().copied() {
                query = query.bind(artist.as_str()).bind(title.as_str());
            }

            for r in query.fetch_all(&pool).await? {
                out.push(row_to_music_file(&r)?);
            }
        }
        Ok(out)
    }

    async fn insert(&self, file: &MusicFile) -> StoreResult<()> {
        debug!(target: "repository", file_id = %file.id, path = %file.path, "indexing music file");
        let pool = self.db.acquire().await?;
        let (artist_key, title_key) = file.match_key();
        let q = r#"
            INSERT INTO music_files (
                id, creator_id, artist, album, title, genre, path,
                artist_key, title_key, meta_data, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        sqlx::query(q)
            .bind(file.id.to_string())
            .bind(file.creator_id)
            .bind(&file.artist)
            .bind(&file.album)
            .bind(&file.title)
            .bind(&file.genre)
            .bind(&file.path)
            .bind(artist_key)
            .bind(title_key)
            .bind(serde_json::to_string(&file.meta_data)?)
            .bind(file.created_at.to_rfc3339())
            .bind(file.updated_at.to_rfc3339())
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> StoreResult<u64> {
        debug!(target: "repository", "deleting all music files");
        let pool = self.db.acquire().await?;
        let result = sqlx::query("DELETE FROM music_files").execute(&pool).await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> StoreResult<i64> {
        let pool = self.db.acquire().await?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM music_files")
            .fetch_one(&pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

/// SQLx-backed index status singleton
pub struct SqliteIndexStatusRepository {
    db: Database,
}

impl SqliteIndexStatusRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl IndexStatusRepository for SqliteIndexStatusRepository {
    async fn get(&self) -> StoreResult<IndexStatus> {
        let pool = self.db.acquire().await?;
        let row = sqlx::query("SELECT last_indexed, last_updated FROM index_status WHERE id = 1")
            .fetch_optional(&pool)
            .await?;
        let Some(row) = row else {
            return Ok(IndexStatus::default());
        };
        Ok(IndexStatus {
            last_indexed: parse_dt_opt(row.try_get("last_indexed")?)?,
            last_updated: parse_dt_opt(row.try_get("last_updated")?)?,
        })
    }

    async fn update(&self, status: &IndexStatus) -> StoreResult<()> {
        debug!(target: "repository", last_indexed = ?status.last_indexed, "updating index status");
        let pool = self.db.acquire().await?;
        let q = r#"
            INSERT INTO index_status (id, last_indexed, last_updated) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_indexed = excluded.last_indexed,
                last_updated = excluded.last_updated
        "#;
        sqlx::query(q)
            .bind(status.last_indexed.map(|t| t.to_rfc3339()))
            .bind(status.last_updated.map(|t| t.to_rfc3339()))
            .execute(&pool)
            .await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Classify an update that matched no row: the record is gone, or its
/// version (or state) moved on.
async fn stale_write(pool: &SqlitePool, table: &'static str, id: RequestId) -> StoreError {
    let q = format!("SELECT 1 FROM {} WHERE id = ?", table);
    match sqlx::query(&q).bind(id.to_string()).fetch_optional(pool).await {
        Ok(Some(_)) => StoreError::Conflict(id.to_string()),
        Ok(None) => StoreError::NotFound(id.to_string()),
        Err(e) => e.into(),
    }
}

fn parse_dt(s: String) -> StoreResult<DateTime<Utc>> {
    // Try RFC3339 first
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Fallback to SQLite default CURRENT_TIMESTAMP format: "YYYY-MM-DD HH:MM:SS"
    let ndt = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

fn parse_dt_opt(s: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    s.map(parse_dt).transpose()
}

fn parse_request_id(s: &str) -> StoreResult<RequestId> {
    Ok(RequestId::from_uuid(Uuid::parse_str(s)?))
}

fn counter(row: &SqliteRow, column: &str) -> StoreResult<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} out of range: {}", column, value)))
}

fn row_to_download_request(row: &SqliteRow) -> StoreResult<DownloadRequest> {
    let id_str: String = row.try_get("id")?;
    let object_type_str: String = row.try_get("object_type")?;
    let object_type = ObjectType::parse(&object_type_str)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown object type: {}", object_type_str)))?;
    let track_metadata_json: String = row.try_get("track_metadata")?;
    let track_metadata: Vec<TrackState> = serde_json::from_str(&track_metadata_json)?;

    Ok(DownloadRequest {
        id: parse_request_id(&id_str)?,
        creator_id: row.try_get("creator_id")?,
        url: row.try_get("spotify_url")?,
        object_type,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        errored: row.try_get("errored")?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
        sync_count: counter(row, "sync_count")?,
        retry_count: counter(row, "retry_count")?,
        expected_track_count: counter(row, "expected_track_count")?,
        found_track_count: counter(row, "found_track_count")?,
        track_metadata,
        version: row.try_get("version")?,
    })
}

fn row_to_playlist_request(row: &SqliteRow) -> StoreResult<PlaylistRequest> {
    let id_str: String = row.try_get("id")?;
    Ok(PlaylistRequest {
        id: parse_request_id(&id_str)?,
        creator_id: row.try_get("creator_id")?,
        url: row.try_get("spotify_url")?,
        active: row.try_get("active")?,
        errored: row.try_get("errored")?,
        retry_count: counter(row, "retry_count")?,
        no_pull: row.try_get("no_pull")?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
        version: row.try_get("version")?,
    })
}

fn row_to_music_file(row: &SqliteRow) -> StoreResult<MusicFile> {
    let id_str: String = row.try_get("id")?;
    Ok(MusicFile {
        id: MusicFileId::from_uuid(Uuid::parse_str(&id_str)?),
        creator_id: row.try_get("creator_id")?,
        artist: row.try_get("artist")?,
        album: row.try_get("album")?,
        title: row.try_get("title")?,
        genre: row.try_get("genre")?,
        path: row.try_get("path")?,
        meta_data: BTreeMap::new(),
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
    })
}
