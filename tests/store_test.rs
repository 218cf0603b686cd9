use anyhow::Result;
use serde_json::json;
use sqlx::SqlitePool;
use tokio_test::assert_ok;

use accuport::config::VesselConfig;
use accuport::errors::{ParseError, RejectReason};
use accuport::models::{IdealStatus, NormalizedReading, RawReading, SourceParameter};
use accuport::normalize::normalize;
use accuport::schema::create_schema;
use accuport::store::writer::{store_batch, RecordOutcome};
use accuport::store::{self, SamplingPointSpec};

const ACCOUNT: i64 = 4521;
const CHLORIDE: i64 = 12;

struct Fixture {
    pool: SqlitePool,
    vessel: i64,
    sampling_point: i64,
}

async fn setup() -> Result<Fixture> {
    // ---
    let pool = store::open_in_memory().await?;
    create_schema(&pool).await?;

    let vessel_cfg = VesselConfig {
        vessel_id: "mv_racer".into(),
        vessel_name: "M.V Racer".into(),
        email: None,
        auth_token: "token".into(),
        sampling_points: vec![],
    };
    let vessel = store::upsert_vessel(&pool, &vessel_cfg, Some(77)).await?;

    let spec = SamplingPointSpec {
        code: "AB1".into(),
        name: "Auxiliary boiler 1".into(),
        system_type: Some("Boiler Water".into()),
        account_id: ACCOUNT,
    };
    let sampling_point = store::upsert_sampling_point(&pool, vessel, &spec).await?;

    store::upsert_parameter(&pool, &parameter(CHLORIDE, "Chloride", Some(0.0), Some(100.0))).await?;

    Ok(Fixture {
        pool,
        vessel,
        sampling_point,
    })
}

fn parameter(id: i64, name: &str, min: Option<f64>, max: Option<f64>) -> SourceParameter {
    SourceParameter {
        id,
        name: name.into(),
        symbol: name.into(),
        description: None,
        unit: Some("ppm".into()),
        limit_min: min,
        limit_max: max,
    }
}

fn reading(id: i64, parameter_id: i64, value: &str) -> Result<NormalizedReading, ParseError> {
    let raw: RawReading = serde_json::from_value(json!({
        "id": id,
        "account_id": ACCOUNT,
        "parameter_id": parameter_id,
        "value": value,
        "unit": "ppm",
        "timestamp": 1730700000 + id,
        "operator_name": "Chief Engineer",
    }))
    .unwrap();
    normalize(&raw)
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn chloride_batch_classifies_and_alerts() -> Result<()> {
    // ---
    let fx = setup().await?;
    let batch = vec![
        reading(1, CHLORIDE, "150"),
        reading(2, CHLORIDE, "50"),
        reading(3, CHLORIDE, "unparsable"),
    ];

    let report = assert_ok!(store_batch(&fx.pool, fx.vessel, &batch).await);
    assert_eq!(report.counts.new, 3);
    assert_eq!(report.counts.alerts_created, 1);

    let statuses: Vec<Option<IdealStatus>> = report
        .outcomes
        .iter()
        .map(|o| match o {
            RecordOutcome::Inserted { status, .. } => *status,
            other => panic!("expected insert, got {other:?}"),
        })
        .collect();
    assert_eq!(statuses, vec![Some(IdealStatus::TooHigh), Some(IdealStatus::Okay), None]);

    let stored: Vec<(i64, Option<String>, Option<f64>, String)> = sqlx::query_as(
        "SELECT labcom_measurement_id, ideal_status, value_numeric, value FROM measurements ORDER BY labcom_measurement_id",
    )
    .fetch_all(&fx.pool)
    .await?;
    assert_eq!(stored[0].1.as_deref(), Some("TOO HIGH"));
    assert_eq!(stored[1].1.as_deref(), Some("OKAY"));
    assert_eq!(stored[2].1, None);
    assert_eq!(stored[2].2, None, "unparsed values are never coerced to zero");
    assert_eq!(stored[2].3, "unparsable");

    let (alert_type, reason, expected_high): (String, String, Option<f64>) =
        sqlx::query_as("SELECT alert_type, alert_reason, expected_high FROM alerts")
            .fetch_one(&fx.pool)
            .await?;
    assert_eq!(alert_type, "warning");
    assert_eq!(reason, "TOO_HIGH");
    assert_eq!(expected_high, Some(100.0));
    Ok(())
}

#[tokio::test]
async fn second_store_is_idempotent() -> Result<()> {
    // ---
    let fx = setup().await?;
    let batch: Vec<_> = (1..=10).map(|i| reading(i, CHLORIDE, &format!("{}", i * 20))).collect();

    let first = store_batch(&fx.pool, fx.vessel, &batch).await?;
    let measurements = count(&fx.pool, "measurements").await;
    let alerts = count(&fx.pool, "alerts").await;

    let second = store_batch(&fx.pool, fx.vessel, &batch).await?;
    assert_eq!(first.counts.new, 10);
    assert_eq!(second.counts.new, 0);
    assert_eq!(second.counts.duplicate, 10);
    assert_eq!(second.counts.alerts_created, 0);

    assert_eq!(count(&fx.pool, "measurements").await, measurements);
    assert_eq!(count(&fx.pool, "alerts").await, alerts);
    Ok(())
}

#[tokio::test]
async fn repeated_id_within_batch_is_stored_once() -> Result<()> {
    // ---
    let fx = setup().await?;
    let batch = vec![reading(5, CHLORIDE, "150"), reading(5, CHLORIDE, "10")];

    let report = store_batch(&fx.pool, fx.vessel, &batch).await?;
    assert!(matches!(report.outcomes[0], RecordOutcome::Inserted { .. }));
    assert_eq!(report.outcomes[1], RecordOutcome::DuplicateSkipped);

    let value: String = sqlx::query_scalar("SELECT value FROM measurements WHERE labcom_measurement_id = 5")
        .fetch_one(&fx.pool)
        .await?;
    assert_eq!(value, "150", "first write wins");
    Ok(())
}

#[tokio::test]
async fn point_limit_overrides_parameter_default() -> Result<()> {
    // ---
    let fx = setup().await?;
    let param_id = store::upsert_parameter(&fx.pool, &parameter(13, "Alkalinity", Some(0.0), Some(500.0))).await?;

    sqlx::query(
        r#"
        INSERT INTO parameter_limits (sampling_point_id, parameter_id, ideal_low, ideal_high, effective_from)
        VALUES (?, ?, 25.0, 300.0, '2024-01-01 00:00:00')
        "#,
    )
    .bind(fx.sampling_point)
    .bind(param_id)
    .execute(&fx.pool)
    .await?;

    let report = store_batch(&fx.pool, fx.vessel, &[reading(1, 13, "10")]).await?;
    assert!(matches!(
        report.outcomes[0],
        RecordOutcome::Inserted {
            status: Some(IdealStatus::TooLow),
            alert_created: true,
            ..
        }
    ));

    let (low, high): (Option<f64>, Option<f64>) =
        sqlx::query_as("SELECT ideal_low, ideal_high FROM measurements WHERE labcom_measurement_id = 1")
            .fetch_one(&fx.pool)
            .await?;
    assert_eq!((low, high), (Some(25.0), Some(300.0)));
    Ok(())
}

#[tokio::test]
async fn critical_limit_raises_critical_alert() -> Result<()> {
    // ---
    let fx = setup().await?;
    let param_id: i64 = sqlx::query_scalar("SELECT id FROM parameters WHERE labcom_parameter_id = ?")
        .bind(CHLORIDE)
        .fetch_one(&fx.pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO parameter_limits (sampling_point_id, parameter_id, ideal_low, ideal_high, critical_high, effective_from)
        VALUES (?, ?, 0.0, 100.0, 200.0, NULL)
        "#,
    )
    .bind(fx.sampling_point)
    .bind(param_id)
    .execute(&fx.pool)
    .await?;

    let report = store_batch(&fx.pool, fx.vessel, &[reading(1, CHLORIDE, "150"), reading(2, CHLORIDE, "250")]).await?;
    assert_eq!(report.counts.alerts_created, 2);

    let alerts: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT a.alert_type, m.ideal_status
        FROM alerts a JOIN measurements m ON m.id = a.measurement_id
        ORDER BY m.labcom_measurement_id
        "#,
    )
    .fetch_all(&fx.pool)
    .await?;
    assert_eq!(alerts[0], ("warning".to_string(), "TOO HIGH".to_string()));
    assert_eq!(alerts[1], ("critical".to_string(), "CRITICAL".to_string()));
    Ok(())
}

#[tokio::test]
async fn unknown_references_and_bad_timestamps_are_rejected() -> Result<()> {
    // ---
    let fx = setup().await?;
    let bad_timestamp = normalize(
        &serde_json::from_value::<RawReading>(json!({
            "id": 9, "account_id": ACCOUNT, "parameter_id": CHLORIDE,
            "value": "1", "timestamp": "yesterday"
        }))
        .unwrap(),
    );
    let batch = vec![reading(1, 999, "5"), bad_timestamp, reading(2, CHLORIDE, "5")];

    let report = store_batch(&fx.pool, fx.vessel, &batch).await?;
    assert_eq!(report.outcomes[0], RecordOutcome::Rejected(RejectReason::UnknownParameter(999)));
    assert!(matches!(report.outcomes[1], RecordOutcome::Rejected(RejectReason::Parse(_))));
    assert_eq!(report.counts.fetched, 3);
    assert_eq!(report.counts.rejected, 2);
    assert_eq!(report.counts.new, 1);
    assert_eq!(report.counts.duplicate, 0);

    assert_eq!(count(&fx.pool, "measurements").await, 1);
    Ok(())
}

#[tokio::test]
async fn one_alert_per_out_of_range_measurement() -> Result<()> {
    // ---
    let fx = setup().await?;
    let values = ["-5", "0", "42", "100", "100.5", "7 ppm", "<0.1", "999"];
    let batch: Vec<_> = values
        .iter()
        .enumerate()
        .map(|(i, v)| reading(i as i64 + 1, CHLORIDE, v))
        .collect();

    store_batch(&fx.pool, fx.vessel, &batch).await?;

    let flagged: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM measurements WHERE ideal_status IS NOT NULL AND ideal_status != 'OKAY'",
    )
    .fetch_one(&fx.pool)
    .await?;
    let orphaned: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM measurements m
        LEFT JOIN alerts a ON a.measurement_id = m.id
        WHERE (m.ideal_status = 'OKAY' OR m.ideal_status IS NULL) AND a.id IS NOT NULL
        "#,
    )
    .fetch_one(&fx.pool)
    .await?;

    assert_eq!(flagged, 3);
    assert_eq!(count(&fx.pool, "alerts").await, flagged);
    assert_eq!(orphaned, 0);
    Ok(())
}

#[tokio::test]
async fn store_rejects_duplicate_external_id_at_schema_level() -> Result<()> {
    // ---
    let fx = setup().await?;
    store_batch(&fx.pool, fx.vessel, &[reading(1, CHLORIDE, "5")]).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO measurements (labcom_measurement_id, vessel_id, parameter_id, value, measurement_date)
        SELECT labcom_measurement_id, vessel_id, parameter_id, value, measurement_date FROM measurements
        "#,
    )
    .execute(&fx.pool)
    .await;

    let err = result.expect_err("duplicate (vessel, external id) must be refused");
    assert!(err.as_database_error().is_some_and(|e| e.is_unique_violation()));
    Ok(())
}

#[tokio::test]
async fn parameter_resync_keeps_refined_range() -> Result<()> {
    // ---
    let fx = setup().await?;
    sqlx::query("UPDATE parameters SET ideal_high = 80.0 WHERE labcom_parameter_id = ?")
        .bind(CHLORIDE)
        .execute(&fx.pool)
        .await?;

    store::upsert_parameter(&fx.pool, &parameter(CHLORIDE, "Chloride (Cl)", Some(0.0), Some(100.0))).await?;

    let (name, high): (String, Option<f64>) =
        sqlx::query_as("SELECT name, ideal_high FROM parameters WHERE labcom_parameter_id = ?")
            .bind(CHLORIDE)
            .fetch_one(&fx.pool)
            .await?;
    assert_eq!(name, "Chloride (Cl)");
    assert_eq!(high, Some(80.0));
    Ok(())
}

#[tokio::test]
async fn times_are_stored_as_naive_utc_text() -> Result<()> {
    // ---
    let fx = setup().await?;
    let raw: RawReading = serde_json::from_value(json!({
        "id": 1, "account_id": ACCOUNT, "parameter_id": CHLORIDE,
        "value": "150", "timestamp": "2025-06-10 08:00:00"
    }))?;
    store_batch(&fx.pool, fx.vessel, &[normalize(&raw)]).await?;

    let (measured, fetched): (String, String) =
        sqlx::query_as("SELECT measurement_date, fetched_at FROM measurements")
            .fetch_one(&fx.pool)
            .await?;
    assert_eq!(measured, "2025-06-10 08:00:00");
    assert!(!fetched.contains('T'), "fetched_at stored as {fetched}");

    let alert_date: String = sqlx::query_scalar("SELECT alert_date FROM alerts")
        .fetch_one(&fx.pool)
        .await?;
    assert_eq!(alert_date, "2025-06-10 08:00:00");

    // plain text comparison, as readers without date functions filter
    let in_range: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM measurements WHERE measurement_date BETWEEN '2025-06-09 00:00:00' AND '2025-06-10 12:00:00'",
    )
    .fetch_one(&fx.pool)
    .await?;
    assert_eq!(in_range, 1);
    Ok(())
}

#[tokio::test]
async fn date_only_limit_applies_and_unreadable_limit_is_skipped() -> Result<()> {
    // ---
    let fx = setup().await?;
    let alkalinity = store::upsert_parameter(&fx.pool, &parameter(13, "Alkalinity", Some(0.0), Some(500.0))).await?;
    let phosphate = store::upsert_parameter(&fx.pool, &parameter(14, "Phosphate", Some(0.0), Some(500.0))).await?;

    sqlx::query(
        r#"
        INSERT INTO parameter_limits (sampling_point_id, parameter_id, ideal_low, ideal_high, effective_from)
        VALUES (?, ?, 25.0, 300.0, '2024-01-01'),
               (?, ?, 25.0, 300.0, 'next refit')
        "#,
    )
    .bind(fx.sampling_point)
    .bind(alkalinity)
    .bind(fx.sampling_point)
    .bind(phosphate)
    .execute(&fx.pool)
    .await?;

    let report = store_batch(&fx.pool, fx.vessel, &[reading(1, 13, "10"), reading(2, 14, "10")]).await?;
    assert_eq!(report.counts.new, 2);

    let statuses: Vec<(i64, Option<String>, Option<f64>)> = sqlx::query_as(
        "SELECT labcom_measurement_id, ideal_status, ideal_low FROM measurements ORDER BY labcom_measurement_id",
    )
    .fetch_all(&fx.pool)
    .await?;
    assert_eq!(statuses[0], (1, Some("TOO LOW".to_string()), Some(25.0)));
    // the unreadable limit is ignored, the parameter default applies
    assert_eq!(statuses[1], (2, Some("OKAY".to_string()), Some(0.0)));
    Ok(())
}

#[tokio::test]
async fn store_failure_mid_batch_keeps_inserted_rows() -> Result<()> {
    // ---
    let fx = setup().await?;
    let comment = "sample drawn after blowdown ".repeat(60);
    let batch: Vec<_> = (1..=100)
        .map(|id| {
            let raw: RawReading = serde_json::from_value(json!({
                "id": id, "account_id": ACCOUNT, "parameter_id": CHLORIDE,
                "value": "50", "timestamp": 1730700000 + id, "comment": comment,
            }))
            .unwrap();
            normalize(&raw)
        })
        .collect();

    // leave room for a handful of rows only
    let pages: i64 = sqlx::query_scalar("PRAGMA page_count").fetch_one(&fx.pool).await?;
    sqlx::query(&format!("PRAGMA max_page_count = {}", pages + 4))
        .execute(&fx.pool)
        .await?;

    let aborted = store_batch(&fx.pool, fx.vessel, &batch)
        .await
        .expect_err("a full store must stop the batch");
    assert!(aborted.counts.new > 0);
    assert!(aborted.counts.new < 100);
    assert_eq!(aborted.counts.rejected, 0);
    assert_eq!(count(&fx.pool, "measurements").await, aborted.counts.new as i64);
    Ok(())
}
