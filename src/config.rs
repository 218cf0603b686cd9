//! Configuration loader for the Accuport fetcher and dashboard.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller), plus the per-vessel fetch settings which live in a
//! JSON file because they carry auth tokens and sampling point lists.
//!
use std::{env, fs, path::Path, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional boolean environment variable with a default value.
macro_rules! parse_env_bool {
    ($var_name:expr, $default:expr) => {
        match env::var($var_name).ok().as_deref() {
            None => $default,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => bail!("Invalid {}: expected true/false, got '{}'", $var_name, other),
        }
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

pub const DEFAULT_API_URL: &str = "https://backend.labcom.cloud/graphql";

/// Well-known sampling point codes with their display name and system type.
const KNOWN_SAMPLING_POINTS: &[(&str, &str, &str)] = &[
    ("AB1", "Auxiliary boiler 1", "Boiler Water"),
    ("AB2", "Auxiliary boiler 2", "Boiler Water"),
    ("CB", "Composite Boiler", "Boiler Water"),
    ("HW", "Hotwell", "Boiler Water"),
    ("AE1", "Auxiliary engine 1", "Auxiliary Engine"),
    ("AE2", "Auxiliary engine 2", "Auxiliary Engine"),
    ("AE3", "Auxiliary engine 3", "Auxiliary Engine"),
    ("ME", "Main Engine 1", "Main Engine"),
    ("PW1", "Potable water Galley", "Potable Water"),
    ("PW2", "Potable Water acc", "Potable Water"),
    ("GW", "Treated Sewage", "Treated Sewage Water"),
    ("SD1", "Main engine Unit 1 Scavenge Drain", "Scavenge Drain"),
    ("SD2", "Main engine Unit 2 Scavenge Drain", "Scavenge Drain"),
    ("SD3", "Main engine Unit 3 Scavenge Drain", "Scavenge Drain"),
    ("SD4", "Main engine Unit 4 Scavenge Drain", "Scavenge Drain"),
    ("SD5", "Main engine Unit 5 Scavenge Drain", "Scavenge Drain"),
    ("SD6", "Main engine Unit 6 Scavenge Drain", "Scavenge Drain"),
];

/// Look up the display name and system type of a well-known sampling point code.
pub fn known_sampling_point(code: &str) -> Option<(&'static str, &'static str)> {
    KNOWN_SAMPLING_POINTS
        .iter()
        .find(|(known, _, _)| known.eq_ignore_ascii_case(code))
        .map(|(_, name, system)| (*name, *system))
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite file holding vessels, measurements, alerts and fetch logs.
    pub accubase_path: PathBuf,

    /// SQLite file holding dashboard users and vessel assignments.
    pub users_db_path: PathBuf,

    /// Labcom GraphQL endpoint.
    pub api_url: String,

    /// JSON file listing the vessels to fetch.
    pub vessels_config: PathBuf,

    /// Size of the fetch window, ending now.
    pub fetch_days_back: u32,

    /// Restrict a fetch run to one vessel id.
    pub fetch_vessel: Option<String>,

    /// Sync sampling points from the source before fetching.
    pub sync_sampling_points: bool,

    /// Per-request timeout for source calls.
    pub http_timeout_secs: u32,

    /// Maximum number of database connections in each pool.
    pub db_pool_max: u32,

    /// Port the dashboard listens on.
    pub dashboard_port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `ACCUBASE_PATH` – measurement store SQLite file
///
/// Optional:
/// - `USERS_DB_PATH` – dashboard users SQLite file (default: `users.sqlite`)
/// - `LABCOM_API_URL` – GraphQL endpoint (default: Labcom production)
/// - `VESSELS_CONFIG` – vessels JSON file (default: `config/vessels.json`)
/// - `FETCH_DAYS_BACK` – fetch window in days (default: 30)
/// - `FETCH_VESSEL` – only fetch this vessel id
/// - `SYNC_SAMPLING_POINTS` – sync sampling points first (default: true)
/// - `HTTP_TIMEOUT_SECS` – source request timeout (default: 30)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `DASHBOARD_PORT` – dashboard listen port (default: 8080)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let accubase_path = PathBuf::from(require_env!("ACCUBASE_PATH"));
    let users_db_path = PathBuf::from(env::var("USERS_DB_PATH").unwrap_or_else(|_| "users.sqlite".into()));
    let api_url = env::var("LABCOM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
    let vessels_config =
        PathBuf::from(env::var("VESSELS_CONFIG").unwrap_or_else(|_| "config/vessels.json".into()));
    let fetch_days_back = parse_env_u32!("FETCH_DAYS_BACK", 30);
    let fetch_vessel = env::var("FETCH_VESSEL").ok().filter(|v| !v.trim().is_empty());
    let sync_sampling_points = parse_env_bool!("SYNC_SAMPLING_POINTS", true);
    let http_timeout_secs = parse_env_u32!("HTTP_TIMEOUT_SECS", 30);
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let dashboard_port = u16::try_from(parse_env_u32!("DASHBOARD_PORT", 8080))
        .map_err(|e| anyhow!("Invalid DASHBOARD_PORT: {}", e))?;

    if fetch_days_back == 0 {
        bail!("Invalid FETCH_DAYS_BACK: must be greater than zero");
    }

    Ok(Config {
        accubase_path,
        users_db_path,
        api_url,
        vessels_config,
        fetch_days_back,
        fetch_vessel,
        sync_sampling_points,
        http_timeout_secs,
        db_pool_max,
        dashboard_port,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  ACCUBASE_PATH        : {}", self.accubase_path.display());
        tracing::info!("  USERS_DB_PATH        : {}", self.users_db_path.display());
        tracing::info!("  LABCOM_API_URL       : {}", self.api_url);
        tracing::info!("  VESSELS_CONFIG       : {}", self.vessels_config.display());
        tracing::info!("  FETCH_DAYS_BACK      : {}", self.fetch_days_back);
        tracing::info!(
            "  FETCH_VESSEL         : {}",
            self.fetch_vessel.as_deref().unwrap_or("(all)")
        );
        tracing::info!("  SYNC_SAMPLING_POINTS : {}", self.sync_sampling_points);
        tracing::info!("  HTTP_TIMEOUT_SECS    : {}", self.http_timeout_secs);
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  DASHBOARD_PORT       : {}", self.dashboard_port);
    }
}

/// Fetch settings for one vessel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VesselConfig {
    // ---
    pub vessel_id: String,
    pub vessel_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub auth_token: String,
    /// Sampling points to sync; empty means every account the source reports.
    #[serde(default)]
    pub sampling_points: Vec<SamplingPointConfig>,
}

/// Maps a source account onto a named sampling point code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplingPointConfig {
    pub code: String,
    pub account_id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

impl VesselConfig {
    /// Auth token with all but the first four characters masked.
    pub fn masked_token(&self) -> String {
        // ---
        let visible: String = self.auth_token.chars().take(4).collect();
        format!("{visible}****")
    }
}

/// Read the vessels file.
pub fn load_vessels(path: &Path) -> Result<Vec<VesselConfig>> {
    // ---
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read vessels config '{}'", path.display()))?;
    let vessels: Vec<VesselConfig> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid vessels config '{}'", path.display()))?;

    for vessel in &vessels {
        tracing::debug!(
            vessel_id = %vessel.vessel_id,
            token = %vessel.masked_token(),
            sampling_points = vessel.sampling_points.len(),
            "Loaded vessel configuration"
        );
    }
    Ok(vessels)
}

/// Pick the vessels for this run, in file order.
///
/// Vessels without an auth token are skipped; naming an unknown vessel in
/// `only` is an error.
pub fn select_vessels(vessels: Vec<VesselConfig>, only: Option<&str>) -> Result<Vec<VesselConfig>> {
    // ---
    let (usable, missing_token): (Vec<_>, Vec<_>) = vessels
        .into_iter()
        .partition(|v| !v.auth_token.trim().is_empty());

    for vessel in &missing_token {
        tracing::warn!(vessel_id = %vessel.vessel_id, "Skipping vessel without auth token");
    }

    match only {
        None => Ok(usable),
        Some(id) => {
            let selected: Vec<_> = usable.into_iter().filter(|v| v.vessel_id == id).collect();
            if selected.is_empty() {
                bail!("Vessel '{}' not found in configuration", id);
            }
            Ok(selected)
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::io::Write;

    const VESSELS_JSON: &str = r#"[
        {
            "vessel_id": "mv_racer",
            "vessel_name": "M.V Racer",
            "email": "racer@example.com",
            "auth_token": "77e32d13a13d3f0d",
            "sampling_points": [
                { "code": "AB1", "account_id": 4521 },
                { "code": "ME", "account_id": 4522, "name": "Main Engine" }
            ]
        },
        { "vessel_id": "mv_october", "vessel_name": "M.V October", "auth_token": "abcd1234" },
        { "vessel_id": "mv_idle", "vessel_name": "M.V Idle", "auth_token": "  " }
    ]"#;

    fn vessels_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VESSELS_JSON.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_vessels() {
        // ---
        let file = vessels_file();
        let vessels = load_vessels(file.path()).unwrap();

        assert_eq!(vessels.len(), 3);
        assert_eq!(vessels[0].sampling_points.len(), 2);
        assert_eq!(vessels[0].sampling_points[1].name.as_deref(), Some("Main Engine"));
        assert!(vessels[1].sampling_points.is_empty());
        assert_eq!(vessels[1].email, None);
    }

    #[test]
    fn test_select_skips_vessels_without_token() {
        // ---
        let vessels = load_vessels(vessels_file().path()).unwrap();
        let selected = select_vessels(vessels, None).unwrap();

        let ids: Vec<_> = selected.iter().map(|v| v.vessel_id.as_str()).collect();
        assert_eq!(ids, ["mv_racer", "mv_october"]);
    }

    #[test]
    fn test_select_single_vessel() {
        // ---
        let vessels = load_vessels(vessels_file().path()).unwrap();

        let selected = select_vessels(vessels.clone(), Some("mv_october")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].vessel_name, "M.V October");

        assert!(select_vessels(vessels, Some("mv_missing")).is_err());
    }

    #[test]
    fn test_masked_token() {
        // ---
        let vessels = load_vessels(vessels_file().path()).unwrap();
        assert_eq!(vessels[0].masked_token(), "77e3****");
    }

    #[test]
    fn test_known_sampling_points() {
        // ---
        assert_eq!(known_sampling_point("AB1"), Some(("Auxiliary boiler 1", "Boiler Water")));
        assert_eq!(known_sampling_point("me"), Some(("Main Engine 1", "Main Engine")));
        assert_eq!(known_sampling_point("LAB4521"), None);
    }

    /// The only test that touches the process environment. Variables are
    /// put back before asserting so a failure cannot leak them.
    #[test]
    fn test_load_from_env() {
        // ---
        let vars = [
            ("ACCUBASE_PATH", "/tmp/accubase.sqlite"),
            ("FETCH_DAYS_BACK", "7"),
            ("SYNC_SAMPLING_POINTS", "false"),
            ("DASHBOARD_PORT", "9090"),
        ];
        let saved: Vec<(&str, Option<String>)> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();
        for (key, value) in vars {
            env::set_var(key, value);
        }

        let loaded = load_from_env();

        for (key, previous) in saved {
            match previous {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }

        let cfg = loaded.unwrap();
        assert_eq!(cfg.accubase_path, PathBuf::from("/tmp/accubase.sqlite"));
        assert_eq!(cfg.fetch_days_back, 7);
        assert!(!cfg.sync_sampling_points);
        assert_eq!(cfg.dashboard_port, 9090);
        assert_eq!(cfg.api_url, env::var("LABCOM_API_URL").unwrap_or(DEFAULT_API_URL.into()));
    }
}
