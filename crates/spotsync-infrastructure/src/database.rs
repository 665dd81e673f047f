// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};

/// How to (re)open the connection pool.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Self-healing handle on the SQLite pool.
///
/// Every repository call goes through [`Database::acquire`], which pings the
/// current pool and rebuilds it once when the ping fails. Callers never see a
/// dead pool: they get a working one or [`StoreError::Unavailable`].
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    options: ConnectOptions,
    pool: RwLock<SqlitePool>,
}

impl Database {
    /// Open the pool and apply pending migrations.
    pub async fn connect(options: ConnectOptions) -> StoreResult<Self> {
        let pool = open_pool(&options).await?;
        Ok(Self::with_pool(pool, options))
    }

    /// Wrap an already opened pool. `options` is used for reconnects only.
    pub fn with_pool(pool: SqlitePool, options: ConnectOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                pool: RwLock::new(pool),
            }),
        }
    }

    /// A pool that answered a ping, reconnecting first if needed.
    pub async fn acquire(&self) -> StoreResult<SqlitePool> {
        let pool = self.inner.pool.read().await.clone();
        if ping(&pool).await.is_ok() {
            return Ok(pool);
        }

        let mut guard = self.inner.pool.write().await;
        // Another caller may have rebuilt the pool while we waited for the lock.
        if ping(&guard).await.is_ok() {
            return Ok(guard.clone());
        }

        warn!(target: "store", "database ping failed, reconnecting");
        match open_pool(&self.inner.options).await {
            Ok(fresh) => {
                guard.close().await;
                *guard = fresh.clone();
                info!(target: "store", "database connection re-established");
                Ok(fresh)
            }
            Err(e) => {
                error!(target: "store", error = %e, "database reconnect failed");
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }

    /// Close the current pool. The next `acquire` reconnects.
    pub async fn close(&self) {
        self.inner.pool.read().await.close().await;
    }
}

async fn ping(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

async fn open_pool(options: &ConnectOptions) -> StoreResult<SqlitePool> {
    debug!(target: "store", max_connections = options.max_connections, "opening connection pool");
    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.connect_timeout);
    if options.url.contains(":memory:") {
        // The database lives and dies with its only connection.
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_options
        .connect(&options.url)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {}", e)))?;

    Ok(pool)
}
