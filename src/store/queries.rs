//! Read queries backing the dashboard API.
//!
//! Every query is scoped by an internal vessel id that the caller has
//! already checked against the user's access set. Timestamps are stored as
//! text, so range comparisons go through `datetime()` to normalize offsets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

// ---

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VesselRow {
    pub id: i64,
    pub vessel_id: String,
    pub vessel_name: String,
    pub email: Option<String>,
    pub labcom_account_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SamplingPointRow {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub system_type: Option<String>,
    pub labcom_account_id: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MeasurementRow {
    pub id: i64,
    pub labcom_measurement_id: i64,
    pub sampling_point_id: Option<i64>,
    pub sampling_point_code: Option<String>,
    pub parameter_id: i64,
    pub parameter_name: String,
    pub symbol: Option<String>,
    pub value: String,
    pub value_numeric: Option<f64>,
    pub unit: Option<String>,
    pub ideal_low: Option<f64>,
    pub ideal_high: Option<f64>,
    pub ideal_status: Option<String>,
    pub measurement_date: DateTime<Utc>,
    pub operator_name: Option<String>,
    pub device_serial: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub measurement_id: i64,
    pub sampling_point_code: Option<String>,
    pub parameter_name: String,
    pub alert_type: String,
    pub alert_reason: Option<String>,
    pub measured_value: Option<f64>,
    pub expected_low: Option<f64>,
    pub expected_high: Option<f64>,
    pub alert_date: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    /// Written by operator tooling, passed through as stored.
    pub acknowledged_at: Option<String>,
    pub resolved_at: Option<String>,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FetchLogRow {
    pub id: i64,
    pub vessel_id: Option<i64>,
    pub fetch_start: DateTime<Utc>,
    pub fetch_end: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub measurements_fetched: i64,
    pub measurements_new: i64,
    pub measurements_duplicate: i64,
    pub date_range_from: Option<DateTime<Utc>>,
    pub date_range_to: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Measurement listing filter. Both window ends are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementFilter {
    pub sampling_point_id: Option<i64>,
    /// Internal parameter ids; empty means every parameter.
    pub parameter_ids: Vec<i64>,
    /// Matched against the sampling point's system type, ignoring case.
    pub system_type: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

pub async fn all_vessel_ids(pool: &SqlitePool) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM vessels ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Vessels among `ids`, ordered by name.
pub async fn vessels_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<VesselRow>, sqlx::Error> {
    // ---
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, vessel_id, vessel_name, email, labcom_account_id FROM vessels WHERE id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY vessel_name");

    qb.build_query_as::<VesselRow>().fetch_all(pool).await
}

pub async fn sampling_points(pool: &SqlitePool, vessel_id: i64) -> Result<Vec<SamplingPointRow>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, SamplingPointRow>(
        r#"
        SELECT id, code, name, system_type, labcom_account_id, is_active
        FROM sampling_points
        WHERE vessel_id = ? AND is_active = 1
        ORDER BY code
        "#,
    )
    .bind(vessel_id)
    .fetch_all(pool)
    .await
}

/// Valid measurements for a vessel within the filter window, newest first.
pub async fn measurements(
    pool: &SqlitePool,
    vessel_id: i64,
    filter: &MeasurementFilter,
) -> Result<Vec<MeasurementRow>, sqlx::Error> {
    // ---
    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT m.id, m.labcom_measurement_id, m.sampling_point_id,
               sp.code AS sampling_point_code,
               m.parameter_id, p.name AS parameter_name, p.symbol,
               m.value, m.value_numeric, m.unit, m.ideal_low, m.ideal_high, m.ideal_status,
               m.measurement_date, m.operator_name, m.device_serial, m.comment
        FROM measurements m
        JOIN parameters p ON p.id = m.parameter_id
        LEFT JOIN sampling_points sp ON sp.id = m.sampling_point_id
        WHERE m.is_valid = 1 AND m.vessel_id = "#,
    );
    qb.push_bind(vessel_id);
    qb.push(" AND datetime(m.measurement_date) >= datetime(")
        .push_bind(filter.from.naive_utc())
        .push(") AND datetime(m.measurement_date) <= datetime(")
        .push_bind(filter.to.naive_utc())
        .push(")");

    if let Some(sampling_point_id) = filter.sampling_point_id {
        qb.push(" AND m.sampling_point_id = ").push_bind(sampling_point_id);
    }
    if let Some(system_type) = &filter.system_type {
        qb.push(" AND sp.system_type = ")
            .push_bind(system_type.clone())
            .push(" COLLATE NOCASE");
    }
    if !filter.parameter_ids.is_empty() {
        qb.push(" AND m.parameter_id IN (");
        let mut separated = qb.separated(", ");
        for id in &filter.parameter_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }

    qb.push(" ORDER BY datetime(m.measurement_date) DESC, m.id DESC");
    qb.build_query_as::<MeasurementRow>().fetch_all(pool).await
}

/// Most recent valid measurement per (sampling point, parameter).
pub async fn latest_measurements(pool: &SqlitePool, vessel_id: i64) -> Result<Vec<MeasurementRow>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, MeasurementRow>(
        r#"
        WITH ranked AS (
            SELECT m.*,
                   ROW_NUMBER() OVER (
                       PARTITION BY m.sampling_point_id, m.parameter_id
                       ORDER BY datetime(m.measurement_date) DESC, m.id DESC
                   ) AS rn
            FROM measurements m
            WHERE m.vessel_id = ? AND m.is_valid = 1
        )
        SELECT r.id, r.labcom_measurement_id, r.sampling_point_id,
               sp.code AS sampling_point_code,
               r.parameter_id, p.name AS parameter_name, p.symbol,
               r.value, r.value_numeric, r.unit, r.ideal_low, r.ideal_high, r.ideal_status,
               r.measurement_date, r.operator_name, r.device_serial, r.comment
        FROM ranked r
        JOIN parameters p ON p.id = r.parameter_id
        LEFT JOIN sampling_points sp ON sp.id = r.sampling_point_id
        WHERE r.rn = 1
        ORDER BY sp.code, p.name
        "#,
    )
    .bind(vessel_id)
    .fetch_all(pool)
    .await
}

pub async fn alerts(pool: &SqlitePool, vessel_id: i64, unresolved_only: bool) -> Result<Vec<AlertRow>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, AlertRow>(
        r#"
        SELECT a.id, a.measurement_id, sp.code AS sampling_point_code,
               p.name AS parameter_name, a.alert_type, a.alert_reason,
               a.measured_value, a.expected_low, a.expected_high, a.alert_date,
               a.acknowledged_by, a.acknowledged_at, a.resolved_at, a.resolution_notes
        FROM alerts a
        JOIN parameters p ON p.id = a.parameter_id
        LEFT JOIN sampling_points sp ON sp.id = a.sampling_point_id
        WHERE a.vessel_id = ?
          AND (? = 0 OR a.resolved_at IS NULL)
        ORDER BY datetime(a.alert_date) DESC, a.id DESC
        "#,
    )
    .bind(vessel_id)
    .bind(unresolved_only)
    .fetch_all(pool)
    .await
}

/// Most recent fetch runs for a vessel.
pub async fn fetch_logs(pool: &SqlitePool, vessel_id: i64, limit: u32) -> Result<Vec<FetchLogRow>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, FetchLogRow>(
        r#"
        SELECT id, vessel_id, fetch_start, fetch_end, status,
               measurements_fetched, measurements_new, measurements_duplicate,
               date_range_from, date_range_to, error_message
        FROM fetch_logs
        WHERE vessel_id = ?
        ORDER BY datetime(fetch_start) DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(vessel_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await
}
