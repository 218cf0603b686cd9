//! Application entry point for the Accuport dashboard API.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the measurement store read-only
//! - Opening the users database and creating its schema if missing
//! - Mounting all API routes via the `routes` gateway
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `ACCUBASE_PATH` (**required**) – measurement store written by `accuport-fetch`
//! - `USERS_DB_PATH` (optional) – users SQLite file (default: `users.sqlite`)
//! - `DASHBOARD_PORT` (optional) – listen port (default: 8080)
//! - `DB_POOL_MAX` (optional) – maximum connections per pool (default: 5)
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use accuport::routes::{self, AppState};
use accuport::{config, schema, store, telemetry};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    telemetry::init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let accubase = store::open_reader_pool(&cfg.accubase_path, cfg.db_pool_max)
        .await
        .with_context(|| format!("Failed to open store '{}'", cfg.accubase_path.display()))?;

    let users_options = SqliteConnectOptions::new()
        .filename(&cfg.users_db_path)
        .create_if_missing(true)
        .foreign_keys(true);
    let users = SqlitePoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect_with(users_options)
        .await
        .with_context(|| format!("Failed to open users database '{}'", cfg.users_db_path.display()))?;
    schema::create_users_schema(&users).await?;

    tracing::info!("Connected to store and users database");

    // Build app from routes gateway
    let app: Router = routes::router(AppState { accubase, users });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.dashboard_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
