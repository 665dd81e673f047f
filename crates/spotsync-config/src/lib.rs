// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://spotsync.db".to_string(),
            pool_max_size: 8,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    /// Seconds between two sweeps over the active download requests.
    pub reconcile_interval_secs: u64,
    /// Seconds between two checks of the monitored playlists.
    pub playlist_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            reconcile_interval_secs: 5 * 60,
            playlist_interval_secs: 60 * 60,
        }
    }
}

/// Knobs for the request lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// A request whose retry count goes above this value is given up on.
    pub max_retries: u32,
    /// Deadline for a single reconciliation pass, resolver calls included.
    pub pass_timeout_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            pass_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base_url: String,
    pub token_url: String,
    pub page_limit: u32,
    pub timeout_secs: u64,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base_url: "https://api.spotify.com/v1".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            page_limit: 50,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
    pub reconciler: ReconcilerConfig,
    pub spotify: SpotifyConfig,
}

impl AppConfig {
    /// Reject values the services cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("database.url cannot be empty");
        }
        if self.database.pool_max_size == 0 {
            bail!("database.pool_max_size must be at least 1");
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            bail!("scheduler.max_concurrent_jobs must be at least 1");
        }
        if self.reconciler.pass_timeout_secs == 0 {
            bail!("reconciler.pass_timeout_secs must be at least 1");
        }
        if !(1..=50).contains(&self.spotify.page_limit) {
            bail!("spotify.page_limit must be between 1 and 50");
        }
        Ok(())
    }
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: SPOTSYNC_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("SPOTSYNC_").split("__"));

    let config: AppConfig = figment.extract()?;
    config.validate()?;
    info!(target: "config", "configuration loaded");
    Ok(config)
}
