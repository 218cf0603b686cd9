//! Deduplicating store writer.
//!
//! One pass over a vessel's batch, folding every input into exactly one
//! [`RecordOutcome`]. Writes are insert-only: a measurement already stored
//! under the same (vessel, external id) is left untouched and no alert is
//! raised for it again. Per-record failures become `Rejected` outcomes; only
//! a connection-level failure stops the batch, and what was inserted before
//! that point stays.
//!
//! Times are written as naive UTC text (`YYYY-MM-DD HH:MM:SS`), the form
//! other readers of the store compare as plain strings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify::{classify, derive_alert, resolve_range};
use crate::errors::{ParseError, RejectReason};
use crate::models::{AlertDraft, IdealRange, IdealStatus, NormalizedReading, ParameterLimit};
use crate::normalize::parse_stored_time;
use crate::store::is_connection_error;

// ---

/// What happened to one input record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Inserted {
        measurement_id: i64,
        status: Option<IdealStatus>,
        alert_created: bool,
    },
    DuplicateSkipped,
    Rejected(RejectReason),
}

/// Aggregate counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub fetched: usize,
    pub new: usize,
    pub duplicate: usize,
    pub rejected: usize,
    pub alerts_created: usize,
}

impl BatchCounts {
    /// Derive counts from outcomes; `fetched` is the number of outcomes.
    pub fn from_outcomes(outcomes: &[RecordOutcome]) -> Self {
        // ---
        outcomes.iter().fold(
            BatchCounts {
                fetched: outcomes.len(),
                ..BatchCounts::default()
            },
            |mut counts, outcome| {
                match outcome {
                    RecordOutcome::Inserted { alert_created, .. } => {
                        counts.new += 1;
                        counts.alerts_created += usize::from(*alert_created);
                    }
                    RecordOutcome::DuplicateSkipped => counts.duplicate += 1,
                    RecordOutcome::Rejected(_) => counts.rejected += 1,
                }
                counts
            },
        )
    }
}

/// Result of a completed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<RecordOutcome>,
    pub counts: BatchCounts,
}

/// The store became unusable part way through a batch.
#[derive(Debug, Error)]
#[error("store batch aborted after {} new measurements: {source}", .counts.new)]
pub struct BatchAborted {
    /// Counts over the records processed before the failure.
    pub counts: BatchCounts,
    pub source: sqlx::Error,
}

#[derive(Debug, Clone, Copy)]
struct ParameterRef {
    id: i64,
    default_range: IdealRange,
}

/// Reference data for one vessel, loaded once per batch.
#[derive(Debug, Default)]
pub struct References {
    /// Keyed by source parameter id.
    parameters: HashMap<i64, ParameterRef>,
    /// Source account id to sampling point id.
    sampling_points: HashMap<i64, i64>,
    /// Keyed by (sampling point id, parameter id).
    limits: HashMap<(i64, i64), Vec<ParameterLimit>>,
}

impl References {
    pub async fn load(pool: &SqlitePool, vessel_id: i64) -> Result<Self, sqlx::Error> {
        // ---
        let parameters = sqlx::query_as::<_, (i64, i64, Option<f64>, Option<f64>)>(
            r#"
            SELECT labcom_parameter_id, id, ideal_low, ideal_high
            FROM parameters
            WHERE labcom_parameter_id IS NOT NULL
            "#,
        )
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(source_id, id, low, high)| {
            let default_range = IdealRange::new(low, high);
            (source_id, ParameterRef { id, default_range })
        })
        .collect();

        let sampling_points = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT labcom_account_id, id
            FROM sampling_points
            WHERE vessel_id = ? AND labcom_account_id IS NOT NULL
            "#,
        )
        .bind(vessel_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect();

        let rows = sqlx::query_as::<_, LimitRow>(
            r#"
            SELECT l.id, l.sampling_point_id, l.parameter_id,
                   l.ideal_low, l.ideal_high, l.critical_low, l.critical_high,
                   l.effective_from, l.effective_to
            FROM parameter_limits l
            JOIN sampling_points sp ON sp.id = l.sampling_point_id
            WHERE sp.vessel_id = ?
            "#,
        )
        .bind(vessel_id)
        .fetch_all(pool)
        .await?;

        let mut limits: HashMap<(i64, i64), Vec<ParameterLimit>> = HashMap::new();
        for row in rows {
            let (Some(effective_from), Some(effective_to)) =
                (parse_bound(row.effective_from.as_deref()), parse_bound(row.effective_to.as_deref()))
            else {
                warn!(
                    limit_id = row.id,
                    effective_from = row.effective_from.as_deref(),
                    effective_to = row.effective_to.as_deref(),
                    "Ignoring parameter limit with unreadable effective dates"
                );
                continue;
            };
            limits
                .entry((row.sampling_point_id, row.parameter_id))
                .or_default()
                .push(ParameterLimit {
                    range: IdealRange::new(row.ideal_low, row.ideal_high)
                        .with_critical(row.critical_low, row.critical_high),
                    effective_from,
                    effective_to,
                });
        }

        Ok(Self {
            parameters,
            sampling_points,
            limits,
        })
    }
}

/// Effective bounds are read as text so a hand-entered date does not fail
/// the whole load.
#[derive(Debug, sqlx::FromRow)]
struct LimitRow {
    id: i64,
    sampling_point_id: i64,
    parameter_id: i64,
    ideal_low: Option<f64>,
    ideal_high: Option<f64>,
    critical_low: Option<f64>,
    critical_high: Option<f64>,
    effective_from: Option<String>,
    effective_to: Option<String>,
}

/// `Some(None)` for an open bound, `None` when the text is unreadable.
fn parse_bound(text: Option<&str>) -> Option<Option<DateTime<Utc>>> {
    match text.map(str::trim) {
        None | Some("") => Some(None),
        Some(text) => parse_stored_time(text).map(Some),
    }
}

/// A record ready to insert, with its classification resolved.
struct Prepared<'a> {
    reading: &'a NormalizedReading,
    parameter_id: i64,
    sampling_point_id: i64,
    range: IdealRange,
    status: Option<IdealStatus>,
    alert: Option<AlertDraft>,
}

/// Store one vessel's batch.
///
/// Records that failed normalization come in as `Err` and are tallied as
/// rejected alongside write failures.
pub async fn store_batch(
    pool: &SqlitePool,
    vessel_id: i64,
    records: &[Result<NormalizedReading, ParseError>],
) -> Result<BatchReport, BatchAborted> {
    // ---
    let refs = References::load(pool, vessel_id)
        .await
        .map_err(|source| BatchAborted {
            counts: BatchCounts::default(),
            source,
        })?;

    let mut outcomes = Vec::with_capacity(records.len());
    for record in records {
        let outcome = match record {
            Err(e) => {
                warn!(vessel_id, "Skipping reading: {}", e);
                RecordOutcome::Rejected(e.clone().into())
            }
            Ok(reading) => match store_record(pool, vessel_id, &refs, reading).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    let counts = BatchCounts::from_outcomes(&outcomes);
                    return Err(BatchAborted { counts, source });
                }
            },
        };
        outcomes.push(outcome);
    }

    let counts = BatchCounts::from_outcomes(&outcomes);
    info!(
        vessel_id,
        new = counts.new,
        duplicate = counts.duplicate,
        rejected = counts.rejected,
        alerts = counts.alerts_created,
        "Stored measurement batch"
    );
    Ok(BatchReport { outcomes, counts })
}

/// Process one record. `Err` only for connection-level failures.
async fn store_record(
    pool: &SqlitePool,
    vessel_id: i64,
    refs: &References,
    reading: &NormalizedReading,
) -> Result<RecordOutcome, sqlx::Error> {
    // ---
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM measurements WHERE vessel_id = ? AND labcom_measurement_id = ?",
    )
    .bind(vessel_id)
    .bind(reading.external_id)
    .fetch_optional(pool)
    .await;

    match existing {
        Ok(Some(_)) => return Ok(RecordOutcome::DuplicateSkipped),
        Ok(None) => {}
        Err(e) => return reject_or_abort(e, reading),
    }

    let prepared = match prepare(refs, reading) {
        Ok(prepared) => prepared,
        Err(reason) => {
            warn!(vessel_id, external_id = reading.external_id, "Skipping reading: {}", reason);
            return Ok(RecordOutcome::Rejected(reason));
        }
    };

    match insert(pool, vessel_id, &prepared).await {
        Ok(measurement_id) => {
            debug!(
                vessel_id,
                external_id = reading.external_id,
                measurement_id,
                status = prepared.status.map(|s| s.as_str()),
                "Inserted measurement"
            );
            Ok(RecordOutcome::Inserted {
                measurement_id,
                status: prepared.status,
                alert_created: prepared.alert.is_some(),
            })
        }
        Err(e) if is_unique_violation(&e) => Ok(RecordOutcome::DuplicateSkipped),
        Err(e) => reject_or_abort(e, reading),
    }
}

/// Resolve references and classify. Pure over the loaded references.
fn prepare<'a>(refs: &References, reading: &'a NormalizedReading) -> Result<Prepared<'a>, RejectReason> {
    // ---
    let parameter = refs
        .parameters
        .get(&reading.external_parameter_id)
        .ok_or(RejectReason::UnknownParameter(reading.external_parameter_id))?;
    let sampling_point_id = *refs
        .sampling_points
        .get(&reading.external_account_id)
        .ok_or(RejectReason::UnknownSamplingPoint(reading.external_account_id))?;

    let limits = refs
        .limits
        .get(&(sampling_point_id, parameter.id))
        .map(Vec::as_slice)
        .unwrap_or_default();
    let range = resolve_range(limits, &parameter.default_range, reading.measured_at);

    let value = reading.value.numeric();
    let status = classify(value, &range);
    let alert = status.and_then(|s| derive_alert(s, value, &range));

    Ok(Prepared {
        reading,
        parameter_id: parameter.id,
        sampling_point_id,
        range,
        status,
        alert,
    })
}

/// Insert the measurement and its alert atomically.
async fn insert(pool: &SqlitePool, vessel_id: i64, p: &Prepared<'_>) -> Result<i64, sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;
    let r = p.reading;

    let measurement_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO measurements (
            labcom_measurement_id, vessel_id, sampling_point_id, parameter_id,
            value, value_numeric, unit, ideal_low, ideal_high, ideal_status,
            measurement_date, operator_name, device_serial, comment,
            is_valid, sync_status, fetched_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'synced', ?)
        RETURNING id
        "#,
    )
    .bind(r.external_id)
    .bind(vessel_id)
    .bind(p.sampling_point_id)
    .bind(p.parameter_id)
    .bind(&r.raw_value)
    .bind(r.value.numeric())
    .bind(&r.unit)
    .bind(p.range.low)
    .bind(p.range.high)
    .bind(p.status.map(|s| s.as_str()))
    .bind(r.measured_at.naive_utc())
    .bind(&r.operator_name)
    .bind(&r.device_serial)
    .bind(&r.comment)
    .bind(r.is_valid)
    .bind(Utc::now().naive_utc())
    .fetch_one(&mut *tx)
    .await?;

    if let Some(alert) = &p.alert {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                measurement_id, vessel_id, sampling_point_id, parameter_id,
                alert_type, alert_reason, measured_value, expected_low, expected_high,
                alert_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(measurement_id)
        .bind(vessel_id)
        .bind(p.sampling_point_id)
        .bind(p.parameter_id)
        .bind(alert.severity.as_str())
        .bind(alert.reason.as_str())
        .bind(alert.measured_value)
        .bind(alert.expected_low)
        .bind(alert.expected_high)
        .bind(r.measured_at.naive_utc())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(measurement_id)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|db| db.is_unique_violation())
}

fn reject_or_abort(e: sqlx::Error, reading: &NormalizedReading) -> Result<RecordOutcome, sqlx::Error> {
    // ---
    if is_connection_error(&e) {
        return Err(e);
    }
    warn!(external_id = reading.external_id, "Insert failed, skipping reading: {}", e);
    Ok(RecordOutcome::Rejected(RejectReason::Write(e.to_string())))
}
