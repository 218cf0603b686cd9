//! Fetch runner.
//!
//! Drives each configured vessel through
//! `PENDING -> FETCHING -> NORMALIZING -> STORING -> SUCCESS | FAILURE`,
//! one vessel after another. A failing vessel never stops its siblings, and
//! every vessel gets exactly one fetch log row whatever happened.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{known_sampling_point, SamplingPointConfig, VesselConfig};
use crate::errors::RunError;
use crate::models::SourceAccount;
use crate::normalize::normalize;
use crate::source::MeasurementSource;
use crate::store::fetch_log::{self, FetchLogEntry, FetchStatus};
use crate::store::writer::{store_batch, BatchCounts};
use crate::store::{self, SamplingPointSpec};

// ---

/// Time window requested from the source. Both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl FetchWindow {
    /// The `days` days ending at `now`.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            from: now - Duration::days(i64::from(days)),
            to: now,
        }
    }
}

/// How far a vessel's run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunStage {
    Pending,
    Fetching,
    Normalizing,
    Storing,
    Done,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Pending => "PENDING",
            RunStage::Fetching => "FETCHING",
            RunStage::Normalizing => "NORMALIZING",
            RunStage::Storing => "STORING",
            RunStage::Done => "DONE",
        }
    }
}

/// Outcome of one vessel's run.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselRun {
    pub vessel_id: String,
    pub vessel_name: String,
    pub status: FetchStatus,
    /// Last stage entered; the failing stage when the run did not finish.
    pub stage: RunStage,
    pub counts: BatchCounts,
    pub error: Option<String>,
    /// Whether the fetch log row was written.
    pub logged: bool,
}

impl VesselRun {
    pub fn is_failure(&self) -> bool {
        self.status.is_failure() || !self.logged
    }
}

/// Result of a whole invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub vessels: Vec<VesselRun>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.vessels.iter().any(VesselRun::is_failure)
    }

    pub fn failed_count(&self) -> usize {
        self.vessels.iter().filter(|v| v.is_failure()).count()
    }

    pub fn totals(&self) -> BatchCounts {
        // ---
        self.vessels.iter().fold(BatchCounts::default(), |mut acc, v| {
            acc.fetched += v.counts.fetched;
            acc.new += v.counts.new;
            acc.duplicate += v.counts.duplicate;
            acc.rejected += v.counts.rejected;
            acc.alerts_created += v.counts.alerts_created;
            acc
        })
    }
}

fn write_counts(f: &mut fmt::Formatter<'_>, c: &BatchCounts) -> fmt::Result {
    write!(
        f,
        "fetched={} new={} duplicate={} rejected={} alerts={}",
        c.fetched, c.new, c.duplicate, c.rejected, c.alerts_created
    )
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        writeln!(f, "Fetch run summary")?;
        for v in &self.vessels {
            write!(f, "  {:<20} {:<8} ", v.vessel_id, v.status.as_str())?;
            write_counts(f, &v.counts)?;
            writeln!(f)?;
            if let Some(e) = &v.error {
                writeln!(f, "      error at {}: {}", v.stage.as_str(), e)?;
            }
            if !v.logged {
                writeln!(f, "      fetch log could not be written")?;
            }
        }
        write!(f, "  {:<29} ", "total")?;
        write_counts(f, &self.totals())?;
        writeln!(f)?;
        write!(
            f,
            "  {} of {} vessels failed",
            self.failed_count(),
            self.vessels.len()
        )
    }
}

/// Decide which sampling points to create or refresh from the source's accounts.
///
/// Configured points are kept when the source reports their account. With
/// nothing configured, every reported account becomes `LAB{id}`.
pub fn plan_sampling_points(configured: &[SamplingPointConfig], accounts: &[SourceAccount]) -> Vec<SamplingPointSpec> {
    // ---
    if configured.is_empty() {
        return accounts
            .iter()
            .map(|account| SamplingPointSpec {
                code: format!("LAB{}", account.id),
                name: account.display_name(),
                system_type: None,
                account_id: account.id,
            })
            .collect();
    }

    configured
        .iter()
        .filter_map(|cfg| {
            let Some(account) = accounts.iter().find(|a| a.id == cfg.account_id) else {
                warn!(code = %cfg.code, account_id = cfg.account_id, "Configured sampling point not reported by source");
                return None;
            };
            let known = known_sampling_point(&cfg.code);
            let name = cfg
                .name
                .clone()
                .or_else(|| known.map(|(name, _)| name.to_string()))
                .unwrap_or_else(|| account.display_name());
            Some(SamplingPointSpec {
                code: cfg.code.clone(),
                name,
                system_type: known.map(|(_, system)| system.to_string()),
                account_id: account.id,
            })
        })
        .collect()
}

/// Run every vessel in order and summarize.
pub async fn run<S: MeasurementSource>(
    source: &S,
    pool: &SqlitePool,
    vessels: &[VesselConfig],
    window: FetchWindow,
    sync_sampling_points: bool,
) -> RunSummary {
    // ---
    info!(
        vessels = vessels.len(),
        from = %window.from,
        to = %window.to,
        "Starting fetch run"
    );

    let mut summary = RunSummary::default();
    for vessel in vessels {
        let span = info_span!("vessel", vessel_id = %vessel.vessel_id);
        let run = run_vessel(source, pool, vessel, window, sync_sampling_points)
            .instrument(span)
            .await;
        summary.vessels.push(run);
    }

    let totals = summary.totals();
    info!(
        new = totals.new,
        duplicate = totals.duplicate,
        rejected = totals.rejected,
        failed = summary.failed_count(),
        "Fetch run complete"
    );
    summary
}

/// Mutable run state kept outside the fallible part so failures can be logged.
#[derive(Debug)]
struct Progress {
    stage: RunStage,
    vessel_db_id: Option<i64>,
    counts: BatchCounts,
}

async fn run_vessel<S: MeasurementSource>(
    source: &S,
    pool: &SqlitePool,
    vessel: &VesselConfig,
    window: FetchWindow,
    sync_sampling_points: bool,
) -> VesselRun {
    // ---
    let started_at = Utc::now();
    let mut progress = Progress {
        stage: RunStage::Pending,
        vessel_db_id: None,
        counts: BatchCounts::default(),
    };

    let result = execute(source, pool, vessel, window, sync_sampling_points, &mut progress).await;

    let (status, error) = match result {
        Ok(()) => (FetchStatus::Success, None),
        Err(e) => {
            let status = match &e {
                RunError::Aborted(aborted) if aborted.counts.new > 0 => FetchStatus::Partial,
                _ => FetchStatus::Failed,
            };
            error!(stage = progress.stage.as_str(), "Vessel run failed: {}", e);
            (status, Some(e.to_string()))
        }
    };

    let entry = FetchLogEntry {
        vessel_id: progress.vessel_db_id,
        started_at,
        finished_at: Utc::now(),
        status,
        counts: progress.counts,
        range_from: window.from,
        range_to: window.to,
        error_message: error.clone(),
    };
    let logged = match fetch_log::record(pool, &entry).await {
        Ok(_) => true,
        Err(e) => {
            error!("Failed to record fetch log: {}", e);
            false
        }
    };

    VesselRun {
        vessel_id: vessel.vessel_id.clone(),
        vessel_name: vessel.vessel_name.clone(),
        status,
        stage: progress.stage,
        counts: progress.counts,
        error,
        logged,
    }
}

async fn execute<S: MeasurementSource>(
    source: &S,
    pool: &SqlitePool,
    vessel: &VesselConfig,
    window: FetchWindow,
    sync_sampling_points: bool,
    progress: &mut Progress,
) -> Result<(), RunError> {
    // ---
    let token = vessel.auth_token.as_str();

    // vessel row first so the fetch log can reference it even if the source is down
    let vessel_db_id = store::upsert_vessel(pool, vessel, None).await?;
    progress.vessel_db_id = Some(vessel_db_id);

    progress.stage = RunStage::Fetching;
    let account = source.cloud_account(token).await?;
    info!(account_id = account.id, name = ?account.name, "Connected to source");
    store::set_vessel_account(pool, vessel_db_id, account.id).await?;

    let parameters = source.parameters(token).await?;
    for param in &parameters {
        store::upsert_parameter(pool, param).await?;
    }
    info!(count = parameters.len(), "Synced parameters");

    if sync_sampling_points {
        let accounts = source.accounts(token).await?;
        let plan = plan_sampling_points(&vessel.sampling_points, &accounts);
        for spec in &plan {
            store::upsert_sampling_point(pool, vessel_db_id, spec).await?;
        }
        let reported: HashSet<i64> = plan.iter().map(|spec| spec.account_id).collect();
        let deactivated = store::deactivate_missing_sampling_points(pool, vessel_db_id, &reported).await?;
        info!(synced = plan.len(), deactivated, "Synced sampling points");
    }

    let account_ids = store::active_sampling_point_accounts(pool, vessel_db_id).await?;
    if account_ids.is_empty() {
        warn!("No active sampling points, nothing to fetch");
    }

    let mut raw = Vec::new();
    for account_id in account_ids {
        let batch = source.measurements(token, account_id, window.from, window.to).await?;
        raw.extend(batch);
    }
    progress.counts.fetched = raw.len();
    info!(count = raw.len(), "Fetched measurements");

    progress.stage = RunStage::Normalizing;
    let records: Vec<_> = raw.iter().map(normalize).collect();

    progress.stage = RunStage::Storing;
    match store_batch(pool, vessel_db_id, &records).await {
        Ok(report) => {
            progress.counts = report.counts;
            progress.stage = RunStage::Done;
            Ok(())
        }
        Err(aborted) => {
            progress.counts = BatchCounts {
                fetched: records.len(),
                ..aborted.counts
            };
            Err(aborted.into())
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn account(id: i64, forename: &str) -> SourceAccount {
        SourceAccount {
            id,
            forename: Some(forename.to_string()),
            surname: None,
            pooltext: None,
        }
    }

    fn configured(code: &str, account_id: i64, name: Option<&str>) -> SamplingPointConfig {
        SamplingPointConfig {
            code: code.to_string(),
            account_id,
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_window_ends_now() {
        // ---
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap();
        let window = FetchWindow::last_days(30, now);

        assert_eq!(window.to, now);
        assert_eq!(window.from, Utc.with_ymd_and_hms(2025, 5, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_plan_without_configuration_uses_lab_codes() {
        // ---
        let accounts = [account(4521, "Boiler"), account(4522, "Engine")];
        let plan = plan_sampling_points(&[], &accounts);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].code, "LAB4521");
        assert_eq!(plan[0].name, "Boiler");
        assert_eq!(plan[0].system_type, None);
        assert_eq!(plan[1].account_id, 4522);
    }

    #[test]
    fn test_plan_with_configuration() {
        // ---
        let accounts = [account(4521, "Boiler"), account(4522, "Engine"), account(4523, "Other")];
        let cfg = [
            configured("AB1", 4521, None),
            configured("ME", 4522, Some("Main Engine")),
            configured("XX", 9999, None),
        ];
        let plan = plan_sampling_points(&cfg, &accounts);

        assert_eq!(plan.len(), 2, "unreported and unconfigured accounts are left out");
        assert_eq!(plan[0].code, "AB1");
        assert_eq!(plan[0].name, "Auxiliary boiler 1");
        assert_eq!(plan[0].system_type.as_deref(), Some("Boiler Water"));
        assert_eq!(plan[1].name, "Main Engine");
        assert_eq!(plan[1].system_type.as_deref(), Some("Main Engine"));
    }

    #[test]
    fn test_summary_totals_and_failures() {
        // ---
        let run = |id: &str, status, new| VesselRun {
            vessel_id: id.to_string(),
            vessel_name: id.to_string(),
            status,
            stage: RunStage::Done,
            counts: BatchCounts {
                fetched: new,
                new,
                ..BatchCounts::default()
            },
            error: None,
            logged: true,
        };
        let summary = RunSummary {
            vessels: vec![run("a", FetchStatus::Failed, 0), run("b", FetchStatus::Success, 5)],
        };

        assert!(summary.has_failures());
        assert_eq!(summary.failed_count(), 1);
        assert_eq!(summary.totals().new, 5);

        let text = summary.to_string();
        assert!(text.contains("1 of 2 vessels failed"));
        assert!(text.contains("new=5"));
    }
}
