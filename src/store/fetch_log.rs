//! Append-only audit trail of fetch runs.

use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::store::writer::BatchCounts;

// ---

/// Terminal status of one vessel's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Storing finished, whatever the per-record outcomes.
    Success,
    /// Aborted before anything was stored.
    Failed,
    /// Aborted while storing, after at least one insert.
    Partial,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Failed => "failed",
            FetchStatus::Partial => "partial",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, FetchStatus::Success)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchLogEntry {
    /// `None` only when the vessel row itself could not be written.
    pub vessel_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: FetchStatus,
    pub counts: BatchCounts,
    pub range_from: DateTime<Utc>,
    pub range_to: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Append one fetch log row and return its id.
pub async fn record(pool: &SqlitePool, entry: &FetchLogEntry) -> Result<i64, sqlx::Error> {
    // ---
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO fetch_logs (
            vessel_id, fetch_start, fetch_end, status,
            measurements_fetched, measurements_new, measurements_duplicate,
            date_range_from, date_range_to, error_message
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(entry.vessel_id)
    .bind(entry.started_at.naive_utc())
    .bind(entry.finished_at.naive_utc())
    .bind(entry.status.as_str())
    .bind(entry.counts.fetched as i64)
    .bind(entry.counts.new as i64)
    .bind(entry.counts.duplicate as i64)
    .bind(entry.range_from.naive_utc())
    .bind(entry.range_to.naive_utc())
    .bind(&entry.error_message)
    .fetch_one(pool)
    .await?;

    debug!(id, vessel_id = entry.vessel_id, status = %entry.status, "Fetch log recorded");
    Ok(id)
}
