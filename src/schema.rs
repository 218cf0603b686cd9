//! Database schema management for the Accuport store.
//!
//! Table and column names are shared with the read-only dashboard, so keys
//! and fields here must stay stable. Applied once on fetcher startup; the
//! users schema is applied by the dashboard on its own database.

use sqlx::SqlitePool;

// ---

const ACCUBASE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS vessels (
        id                 INTEGER PRIMARY KEY,
        vessel_id          VARCHAR(50)  NOT NULL UNIQUE,
        vessel_name        VARCHAR(100) NOT NULL,
        email              VARCHAR(100),
        labcom_account_id  INTEGER,
        auth_token         VARCHAR(255),
        created_at         DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at         DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sampling_points (
        id                    INTEGER PRIMARY KEY,
        vessel_id             INTEGER NOT NULL REFERENCES vessels (id),
        code                  VARCHAR(10)  NOT NULL,
        name                  VARCHAR(100) NOT NULL,
        system_type           VARCHAR(50),
        description           TEXT,
        labcom_account_id     INTEGER,
        is_active             INTEGER NOT NULL DEFAULT 1,
        location_description  TEXT,
        created_at            DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at            DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CONSTRAINT unique_vessel_sampling_point UNIQUE (vessel_id, code),
        CONSTRAINT unique_vessel_labcom_account UNIQUE (vessel_id, labcom_account_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parameters (
        id                   INTEGER PRIMARY KEY,
        labcom_parameter_id  INTEGER UNIQUE,
        name                 VARCHAR(100) NOT NULL,
        symbol               VARCHAR(20),
        unit                 VARCHAR(50),
        ideal_low            REAL,
        ideal_high           REAL,
        category             VARCHAR(50),
        criticality          VARCHAR(20),
        description          TEXT,
        created_at           DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at           DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parameter_limits (
        id                 INTEGER PRIMARY KEY,
        sampling_point_id  INTEGER NOT NULL REFERENCES sampling_points (id),
        parameter_id       INTEGER NOT NULL REFERENCES parameters (id),
        ideal_low          REAL,
        ideal_high         REAL,
        warning_low        REAL,
        warning_high       REAL,
        critical_low       REAL,
        critical_high      REAL,
        effective_from     DATETIME DEFAULT CURRENT_TIMESTAMP,
        effective_to       DATETIME,
        created_at         DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at         DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CONSTRAINT unique_limit_per_period UNIQUE (sampling_point_id, parameter_id, effective_from)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS measurements (
        id                     INTEGER PRIMARY KEY,
        labcom_measurement_id  INTEGER NOT NULL,
        vessel_id              INTEGER NOT NULL REFERENCES vessels (id),
        sampling_point_id      INTEGER REFERENCES sampling_points (id),
        parameter_id           INTEGER NOT NULL REFERENCES parameters (id),
        value                  VARCHAR(50) NOT NULL,
        value_numeric          REAL,
        unit                   VARCHAR(50),
        ideal_low              REAL,
        ideal_high             REAL,
        ideal_status           VARCHAR(20),
        measurement_date       DATETIME NOT NULL,
        operator_name          VARCHAR(100),
        device_serial          VARCHAR(100),
        comment                TEXT,
        is_valid               INTEGER NOT NULL DEFAULT 1,
        sync_status            VARCHAR(20) DEFAULT 'synced',
        fetched_at             DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        created_at             DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CONSTRAINT unique_vessel_labcom_measurement UNIQUE (vessel_id, labcom_measurement_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id                 INTEGER PRIMARY KEY,
        measurement_id     INTEGER NOT NULL UNIQUE REFERENCES measurements (id),
        vessel_id          INTEGER NOT NULL REFERENCES vessels (id),
        sampling_point_id  INTEGER REFERENCES sampling_points (id),
        parameter_id       INTEGER NOT NULL REFERENCES parameters (id),
        alert_type         VARCHAR(20) NOT NULL,
        alert_reason       VARCHAR(50),
        measured_value     REAL,
        expected_low       REAL,
        expected_high      REAL,
        alert_date         DATETIME NOT NULL,
        acknowledged_by    VARCHAR(100),
        acknowledged_at    DATETIME,
        resolved_at        DATETIME,
        resolution_notes   TEXT,
        created_at         DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fetch_logs (
        id                      INTEGER PRIMARY KEY,
        vessel_id               INTEGER REFERENCES vessels (id),
        fetch_start             DATETIME NOT NULL,
        fetch_end               DATETIME,
        status                  VARCHAR(20),
        measurements_fetched    INTEGER NOT NULL DEFAULT 0,
        measurements_new        INTEGER NOT NULL DEFAULT 0,
        measurements_duplicate  INTEGER NOT NULL DEFAULT 0,
        date_range_from         DATETIME,
        date_range_to           DATETIME,
        error_message           TEXT,
        created_at              DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

const ACCUBASE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_sampling_points_account ON sampling_points (labcom_account_id)",
    "CREATE INDEX IF NOT EXISTS idx_measurements_vessel ON measurements (vessel_id)",
    "CREATE INDEX IF NOT EXISTS idx_measurements_sampling_point ON measurements (sampling_point_id)",
    "CREATE INDEX IF NOT EXISTS idx_measurements_parameter ON measurements (parameter_id)",
    "CREATE INDEX IF NOT EXISTS idx_measurements_date ON measurements (measurement_date)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_vessel ON alerts (vessel_id)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_date ON alerts (alert_date)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_resolved ON alerts (resolved_at)",
    "CREATE INDEX IF NOT EXISTS idx_fetch_logs_vessel ON fetch_logs (vessel_id)",
];

const USERS_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id             INTEGER PRIMARY KEY,
        username       VARCHAR(50) NOT NULL UNIQUE,
        password_hash  TEXT,
        full_name      VARCHAR(100),
        email          VARCHAR(100),
        role           VARCHAR(20) NOT NULL,
        is_active      INTEGER NOT NULL DEFAULT 1,
        created_at     DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vessel_assignments (
        user_id    INTEGER NOT NULL REFERENCES users (id),
        vessel_id  INTEGER NOT NULL,
        PRIMARY KEY (user_id, vessel_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS manager_hierarchy (
        fleet_manager_id   INTEGER NOT NULL REFERENCES users (id),
        vessel_manager_id  INTEGER NOT NULL REFERENCES users (id),
        PRIMARY KEY (fleet_manager_id, vessel_manager_id)
    )
    "#,
];

/// Create or update the measurement store schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    for statement in ACCUBASE_TABLES.iter().chain(ACCUBASE_INDEXES) {
        sqlx::query(*statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Create the dashboard users schema (idempotent).
pub async fn create_users_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    for statement in USERS_TABLES {
        sqlx::query(*statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}
