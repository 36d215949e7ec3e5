mod config;
mod db;
mod sim;
mod ticker;

use anyhow::{Context, Result};
use irrigation_core::{Clock, Irrigator, SimClock, SystemClock};
use std::{env, sync::Arc, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let db_url = env::var("DB_URL")
        .unwrap_or_else(|_| "sqlite:irrigation.db?mode=rwc".to_string());
    let tick_secs: u64 = env::var("TICK_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&s| s > 0)
        .unwrap_or(60);
    let clock: Box<dyn Clock> = match env::var("CLOCK").as_deref() {
        Ok("sim") => Box::new(SimClock::default()),
        Ok("system") | Err(_) => Box::new(SystemClock),
        Ok(other) => {
            warn!(clock = other, "unknown CLOCK, using system clock");
            Box::new(SystemClock)
        }
    };

    // ── Config file ─────────────────────────────────────────────────
    let cfg = config::load(&config_path)?;

    // ── Store ───────────────────────────────────────────────────────
    let store = SqliteStore::connect(&db_url).await?;
    store.migrate().await?;

    // ── Irrigator ───────────────────────────────────────────────────
    let irrigator = Arc::new(
        Irrigator::open(store, clock)
            .await
            .context("failed to load irrigator settings")?,
    );
    config::apply(&cfg, &irrigator).await?;

    let (mode, allocation) = (irrigator.mode().await, irrigator.allocation().await);
    let (time, days) = (irrigator.irrigation_time().await, irrigator.irrigation_days().await);
    info!(%mode, allocation, %time, %days, tick_secs, "irrigator ready");

    // ── Clock ticks until shutdown ──────────────────────────────────
    let ticker = tokio::spawn(ticker::run(
        Arc::clone(&irrigator),
        Duration::from_secs(tick_secs),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    ticker.abort();
    // Fail-safe: leave every valve closed.
    irrigator.shutdown().await;

    let failures = irrigator.failure_report().await;
    if !failures.is_empty() {
        warn!(
            report = %serde_json::to_string(&failures)?,
            "devices awaiting repair"
        );
    }
    if irrigator.has_store_failure().await {
        warn!("some settings could not be persisted this run");
    }

    Ok(())
}
