// SPDX-License-Identifier: GPL-3.0-or-later
pub mod database;
pub mod error;
pub mod repositories;
pub mod sqlite_adapters;

pub use database::{ConnectOptions, Database};
pub use error::{StoreError, StoreResult};

use anyhow::Result;
use spotsync_config::AppConfig;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub async fn init_database(config: &AppConfig) -> Result<Database> {
    info!(target: "infrastructure", "initializing database");

    let db_url = normalize_sqlite_url(&config.database.url)?;
    let in_memory = db_url.contains(":memory:");

    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    // Every connection to an in-memory database sees its own empty database.
    let max_connections = if in_memory {
        1
    } else {
        config.database.pool_max_size
    };
    let options = ConnectOptions::new(db_url)
        .max_connections(max_connections)
        .connect_timeout(Duration::from_secs(config.database.connect_timeout_secs));

    let db = Database::connect(options).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(db)
}

/// Turn a relative `sqlite://` file URL into an absolute one that SQLite may
/// create, creating the parent directory on the way.
fn normalize_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }

    let db_path = url.trim_start_matches("sqlite://");
    let (db_path, query) = match db_path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (db_path, None),
    };
    let path = Path::new(db_path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            info!(target: "infrastructure", path = %parent.display(), "created database directory");
        }
    }

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    // Forward slashes work for SQLite on all platforms
    let path_str = absolute_path.to_string_lossy().replace('\\', "/");

    Ok(match query {
        Some(query) => format!("sqlite://{}?{}", path_str, query),
        None => format!("sqlite://{}?mode=rwc", path_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_are_left_alone() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:").unwrap(), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite://:memory:").unwrap(),
            "sqlite://:memory:"
        );
    }

    #[test]
    fn file_urls_become_absolute_and_creatable() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("spotsync.db");
        let url = format!("sqlite://{}", db_path.to_string_lossy());

        let normalized = normalize_sqlite_url(&url).unwrap();
        assert!(normalized.ends_with("spotsync.db?mode=rwc"));
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn explicit_query_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/spotsync.db?mode=ro", dir.path().to_string_lossy());
        let normalized = normalize_sqlite_url(&url).unwrap();
        assert!(normalized.ends_with("spotsync.db?mode=ro"));
    }

    #[tokio::test]
    async fn init_database_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.database.url = format!("sqlite://{}/data/spotsync.db", dir.path().to_string_lossy());

        let db = init_database(&config).await.expect("init database");
        let pool = db.acquire().await.unwrap();
        sqlx::query("SELECT COUNT(*) FROM download_requests")
            .fetch_one(&pool)
            .await
            .expect("table exists");
    }
}
