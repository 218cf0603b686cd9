//! Fetcher entry point.
//!
//! Loads configuration and the vessels file, makes sure the store schema
//! exists, then runs every selected vessel once and prints a run summary.
//! Exits non-zero if any vessel failed.
//!
//! # Environment Variables
//! - `ACCUBASE_PATH` (**required**) – measurement store SQLite file
//! - `VESSELS_CONFIG` (optional) – vessels JSON file (default: `config/vessels.json`)
//! - `FETCH_DAYS_BACK` / `FETCH_VESSEL` (optional) – window and vessel filter
//! - `ACCUPORT_LOG_LEVEL` / `ACCUPORT_SPAN_EVENTS` (optional) – tracing
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dotenvy::dotenv;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use accuport::config::{self, load_vessels, select_vessels};
use accuport::pipeline::{self, FetchWindow};
use accuport::source::LabcomClient;
use accuport::{schema, store, telemetry};

// ---

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ---
    dotenv().ok();
    telemetry::init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let vessels = load_vessels(&cfg.vessels_config)?;
    let vessels = select_vessels(vessels, cfg.fetch_vessel.as_deref())?;
    if vessels.is_empty() {
        tracing::warn!("No vessels with an auth token configured, nothing to do");
        return Ok(ExitCode::SUCCESS);
    }

    let pool = store::open_writer_pool(&cfg.accubase_path, cfg.db_pool_max)
        .await
        .with_context(|| format!("Failed to open store '{}'", cfg.accubase_path.display()))?;
    schema::create_schema(&pool).await?;

    let client = LabcomClient::new(&cfg.api_url, Duration::from_secs(u64::from(cfg.http_timeout_secs)))?;
    let window = FetchWindow::last_days(cfg.fetch_days_back, Utc::now());

    let run_id = Uuid::new_v4();
    let summary = pipeline::run(&client, &pool, &vessels, window, cfg.sync_sampling_points)
        .instrument(info_span!("fetch_run", %run_id))
        .await;

    println!("{summary}");
    pool.close().await;

    if summary.has_failures() {
        info!(%run_id, "Fetch run finished with failures");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
