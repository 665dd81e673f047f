// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use spotsync_application::SyncServices;
use spotsync_config::{load as load_config, SpotifyConfig};
use spotsync_infrastructure::init_database;
use spotsync_scheduler::Scheduler;
use spotsync_spotify::SpotifyClient;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_ENV: &str = "SPOTSYNC_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path();
    let config = load_config(config_path.as_deref())?;
    init_tracing(&config.telemetry.log_level);

    let db = init_database(&config).await?;
    let spotify = Arc::new(spotify_client(&config.spotify)?);
    let services = SyncServices::new(db.clone(), spotify, &config.reconciler);

    let scheduler = Scheduler::new(config.scheduler.clone(), services);
    scheduler.register_jobs().await;
    let registry = scheduler.registry();
    let _scheduler_handle = scheduler.start();
    info!(target: "cli", "spotsync running");

    shutdown_signal().await?;

    registry.stop().await;
    db.close().await;
    info!(target: "cli", "shutdown complete");
    Ok(())
}

fn init_tracing(default_level: &str) {
    let fmt_layer = fmt::layer().with_target(true).with_thread_names(true).with_level(true);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn spotify_client(config: &SpotifyConfig) -> Result<SpotifyClient> {
    let (Some(client_id), Some(client_secret)) = (&config.client_id, &config.client_secret) else {
        anyhow::bail!(
            "spotify credentials missing: set SPOTSYNC_SPOTIFY__CLIENT_ID and SPOTSYNC_SPOTIFY__CLIENT_SECRET"
        );
    };

    SpotifyClient::builder()
        .base_url(&config.api_base_url)
        .token_url(&config.token_url)
        .credentials(client_id, client_secret)
        .page_limit(config.page_limit)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build spotify client")
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
        let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;

        tokio::select! {
            _ = interrupt.recv() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("ctrl_c handler")?;

    info!(target: "cli", "shutdown signal received");
    Ok(())
}
