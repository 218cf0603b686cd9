//! SQLite access for the measurement store.
//!
//! The fetcher is the only writer. It owns reference data sync (vessels,
//! sampling points, parameters) here, measurement ingestion in [`writer`],
//! and the audit trail in [`fetch_log`]. The dashboard only uses [`queries`]
//! over a read-only pool.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::VesselConfig;
use crate::models::SourceParameter;

pub mod fetch_log;
pub mod queries;
pub mod writer;

// ---

/// Open the store for writing, creating the file if needed.
pub async fn open_writer_pool(path: &Path, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    // ---
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    info!(path = %path.display(), "Store opened for writing");
    Ok(pool)
}

/// Open the store read-only. The writer may be mid-update; readers get no
/// snapshot guarantees beyond SQLite's own.
pub async fn open_reader_pool(path: &Path, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    // ---
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    info!(path = %path.display(), "Store opened read-only");
    Ok(pool)
}

/// Open a private in-memory store. Used by tests.
pub async fn open_in_memory() -> Result<SqlitePool, sqlx::Error> {
    // ---
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    // one connection: every connection to :memory: is a separate database
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Primary SQLite result codes for a database that can no longer be written:
/// READONLY, IOERR, CORRUPT, FULL, CANTOPEN, NOTADB.
const STORE_UNUSABLE_CODES: &[i32] = &[8, 10, 11, 13, 14, 26];

/// Errors that mean the store itself is unusable, as opposed to one
/// statement being rejected.
pub fn is_connection_error(e: &sqlx::Error) -> bool {
    // ---
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| STORE_UNUSABLE_CODES.contains(&(code & 0xff))),
        _ => false,
    }
}

/// Create or update a vessel from its configuration, returning its internal id.
///
/// A stored source account id is kept when none is supplied.
pub async fn upsert_vessel(
    pool: &SqlitePool,
    vessel: &VesselConfig,
    labcom_account_id: Option<i64>,
) -> Result<i64, sqlx::Error> {
    // ---
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO vessels (vessel_id, vessel_name, email, auth_token, labcom_account_id)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (vessel_id) DO UPDATE SET
            vessel_name       = excluded.vessel_name,
            email             = excluded.email,
            auth_token        = excluded.auth_token,
            labcom_account_id = COALESCE(excluded.labcom_account_id, vessels.labcom_account_id),
            updated_at        = CURRENT_TIMESTAMP
        RETURNING id
        "#,
    )
    .bind(&vessel.vessel_id)
    .bind(&vessel.vessel_name)
    .bind(&vessel.email)
    .bind(&vessel.auth_token)
    .bind(labcom_account_id)
    .fetch_one(pool)
    .await?;

    debug!(vessel_id = %vessel.vessel_id, id, "Vessel upserted");
    Ok(id)
}

/// Record the source's cloud account id on a vessel.
pub async fn set_vessel_account(pool: &SqlitePool, vessel_id: i64, labcom_account_id: i64) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query(
        "UPDATE vessels SET labcom_account_id = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(labcom_account_id)
    .bind(vessel_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Sampling point to create or refresh during sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingPointSpec {
    pub code: String,
    pub name: String,
    pub system_type: Option<String>,
    pub account_id: i64,
}

/// Create or update a sampling point keyed by (vessel, source account).
///
/// Existing points get their name and system type refreshed and are marked
/// active again; the code assigned on creation is kept.
pub async fn upsert_sampling_point(
    pool: &SqlitePool,
    vessel_id: i64,
    spec: &SamplingPointSpec,
) -> Result<i64, sqlx::Error> {
    // ---
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO sampling_points (vessel_id, code, name, system_type, labcom_account_id, is_active)
        VALUES (?, ?, ?, ?, ?, 1)
        ON CONFLICT (vessel_id, labcom_account_id) DO UPDATE SET
            name        = excluded.name,
            system_type = COALESCE(excluded.system_type, sampling_points.system_type),
            is_active   = 1,
            updated_at  = CURRENT_TIMESTAMP
        RETURNING id
        "#,
    )
    .bind(vessel_id)
    .bind(&spec.code)
    .bind(&spec.name)
    .bind(&spec.system_type)
    .bind(spec.account_id)
    .fetch_one(pool)
    .await
}

/// Mark sampling points inactive when the source no longer reports their
/// account. Points are never deleted. Returns how many were deactivated.
pub async fn deactivate_missing_sampling_points(
    pool: &SqlitePool,
    vessel_id: i64,
    reported_accounts: &HashSet<i64>,
) -> Result<u64, sqlx::Error> {
    // ---
    let active: Vec<(i64, Option<i64>)> = sqlx::query_as(
        "SELECT id, labcom_account_id FROM sampling_points WHERE vessel_id = ? AND is_active = 1",
    )
    .bind(vessel_id)
    .fetch_all(pool)
    .await?;

    let mut deactivated = 0;
    for (id, account) in active {
        if account.is_some_and(|a| reported_accounts.contains(&a)) {
            continue;
        }
        deactivated += sqlx::query(
            "UPDATE sampling_points SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    }
    Ok(deactivated)
}

/// Source account ids of a vessel's active sampling points.
pub async fn active_sampling_point_accounts(pool: &SqlitePool, vessel_id: i64) -> Result<Vec<i64>, sqlx::Error> {
    // ---
    sqlx::query_scalar(
        r#"
        SELECT labcom_account_id FROM sampling_points
        WHERE vessel_id = ? AND is_active = 1 AND labcom_account_id IS NOT NULL
        ORDER BY code
        "#,
    )
    .bind(vessel_id)
    .fetch_all(pool)
    .await
}

/// Create or refresh a parameter keyed by its source id.
///
/// The source limits seed the default ideal range on first sight only; a
/// range already set is never overwritten.
pub async fn upsert_parameter(pool: &SqlitePool, param: &SourceParameter) -> Result<i64, sqlx::Error> {
    // ---
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO parameters (labcom_parameter_id, name, symbol, unit, ideal_low, ideal_high, description)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (labcom_parameter_id) DO UPDATE SET
            name        = excluded.name,
            symbol      = excluded.symbol,
            unit        = excluded.unit,
            description = excluded.description,
            ideal_low   = COALESCE(parameters.ideal_low, excluded.ideal_low),
            ideal_high  = COALESCE(parameters.ideal_high, excluded.ideal_high),
            updated_at  = CURRENT_TIMESTAMP
        RETURNING id
        "#,
    )
    .bind(param.id)
    .bind(&param.name)
    .bind(&param.symbol)
    .bind(&param.unit)
    .bind(param.limit_min)
    .bind(param.limit_max)
    .bind(&param.description)
    .fetch_one(pool)
    .await
}
