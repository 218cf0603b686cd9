//! Vessel-scoped read endpoints.
//!
//! Every handler takes a [`Caller`], resolved from the identity header set
//! by the fronting auth proxy, and checks the requested vessel against the
//! caller's access set before touching the store.

use std::collections::BTreeSet;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiError, AppState};
use crate::access::{self, DashboardUser};
use crate::store::queries::{self, AlertRow, FetchLogRow, MeasurementFilter, MeasurementRow, SamplingPointRow, VesselRow};

// ---

/// Header carrying the authenticated username.
pub const USER_HEADER: &str = "x-accuport-user";

const DEFAULT_WINDOW_DAYS: i64 = 30;
const DEFAULT_FETCH_LOG_LIMIT: u32 = 20;
const MAX_FETCH_LOG_LIMIT: u32 = 200;

/// The authenticated user and the vessels they may see.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: DashboardUser,
    pub vessels: BTreeSet<i64>,
}

impl Caller {
    fn authorize(&self, vessel_id: i64) -> Result<(), ApiError> {
        // ---
        if self.vessels.contains(&vessel_id) {
            return Ok(());
        }
        debug!(username = %self.user.username, vessel_id, "Vessel access denied");
        Err(ApiError::Forbidden(vessel_id))
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // ---
        let username = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let user = access::find_user(&state.users, username)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        let vessels = access::accessible_vessels(&state.users, &state.accubase, &user).await?;

        Ok(Caller { user, vessels })
    }
}

#[derive(Debug, Serialize)]
struct VesselsResponse {
    user: DashboardUser,
    vessels: Vec<VesselRow>,
}

async fn list_vessels(caller: Caller, State(state): State<AppState>) -> Result<Json<VesselsResponse>, ApiError> {
    // ---
    let ids: Vec<i64> = caller.vessels.iter().copied().collect();
    let vessels = queries::vessels_by_ids(&state.accubase, &ids).await?;
    Ok(Json(VesselsResponse {
        user: caller.user,
        vessels,
    }))
}

async fn sampling_points(
    caller: Caller,
    State(state): State<AppState>,
    Path(vessel_id): Path<i64>,
) -> Result<Json<Vec<SamplingPointRow>>, ApiError> {
    caller.authorize(vessel_id)?;
    Ok(Json(queries::sampling_points(&state.accubase, vessel_id).await?))
}

/// Query parameters for `/measurements`. Times are RFC 3339;
/// `parameter_id` takes one id or a comma-separated list.
#[derive(Debug, Default, Deserialize)]
struct MeasurementsQuery {
    sampling_point_id: Option<i64>,
    parameter_id: Option<String>,
    system_type: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl MeasurementsQuery {
    /// Fill in the default window: the 30 days ending at `to`, or now.
    fn into_filter(self, now: DateTime<Utc>) -> Result<MeasurementFilter, ApiError> {
        // ---
        let to = self.to.unwrap_or(now);
        let from = self.from.unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));
        if from > to {
            return Err(ApiError::BadRequest("`from` must not be after `to`".into()));
        }
        let parameter_ids = self
            .parameter_id
            .as_deref()
            .map(parse_id_list)
            .transpose()?
            .unwrap_or_default();
        let system_type = self
            .system_type
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(MeasurementFilter {
            sampling_point_id: self.sampling_point_id,
            parameter_ids,
            system_type,
            from,
            to,
        })
    }
}

fn parse_id_list(list: &str) -> Result<Vec<i64>, ApiError> {
    // ---
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("invalid parameter_id `{id}`")))
        })
        .collect()
}

async fn measurements(
    caller: Caller,
    State(state): State<AppState>,
    Path(vessel_id): Path<i64>,
    Query(params): Query<MeasurementsQuery>,
) -> Result<Json<Vec<MeasurementRow>>, ApiError> {
    // ---
    caller.authorize(vessel_id)?;
    let filter = params.into_filter(Utc::now())?;
    Ok(Json(queries::measurements(&state.accubase, vessel_id, &filter).await?))
}

async fn latest(
    caller: Caller,
    State(state): State<AppState>,
    Path(vessel_id): Path<i64>,
) -> Result<Json<Vec<MeasurementRow>>, ApiError> {
    caller.authorize(vessel_id)?;
    Ok(Json(queries::latest_measurements(&state.accubase, vessel_id).await?))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    unresolved_only: Option<bool>,
}

async fn alerts(
    caller: Caller,
    State(state): State<AppState>,
    Path(vessel_id): Path<i64>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<Vec<AlertRow>>, ApiError> {
    // ---
    caller.authorize(vessel_id)?;
    let unresolved_only = params.unresolved_only.unwrap_or(true);
    Ok(Json(queries::alerts(&state.accubase, vessel_id, unresolved_only).await?))
}

#[derive(Debug, Deserialize)]
struct FetchLogsQuery {
    limit: Option<u32>,
}

async fn fetch_logs(
    caller: Caller,
    State(state): State<AppState>,
    Path(vessel_id): Path<i64>,
    Query(params): Query<FetchLogsQuery>,
) -> Result<Json<Vec<FetchLogRow>>, ApiError> {
    // ---
    caller.authorize(vessel_id)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_FETCH_LOG_LIMIT)
        .clamp(1, MAX_FETCH_LOG_LIMIT);
    Ok(Json(queries::fetch_logs(&state.accubase, vessel_id, limit).await?))
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/vessels", get(list_vessels))
        .route("/api/vessels/{vessel_id}/sampling-points", get(sampling_points))
        .route("/api/vessels/{vessel_id}/measurements", get(measurements))
        .route("/api/vessels/{vessel_id}/latest", get(latest))
        .route("/api/vessels/{vessel_id}/alerts", get(alerts))
        .route("/api/vessels/{vessel_id}/fetch-logs", get(fetch_logs))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_measurement_window_defaults() {
        // ---
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let query = MeasurementsQuery::default();
        let filter = query.into_filter(now).unwrap();

        assert_eq!(filter.to, now);
        assert_eq!(filter.from, Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_measurement_window_rejects_inverted_range() {
        // ---
        let now = Utc::now();
        let query = MeasurementsQuery {
            sampling_point_id: Some(1),
            from: Some(now),
            to: Some(now - Duration::days(1)),
            ..Default::default()
        };
        assert!(matches!(query.into_filter(now), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_measurement_parameter_and_system_filters() {
        // ---
        let query = MeasurementsQuery {
            parameter_id: Some("3, 7,".to_string()),
            system_type: Some("  ".to_string()),
            ..Default::default()
        };
        let filter = query.into_filter(Utc::now()).unwrap();
        assert_eq!(filter.parameter_ids, vec![3, 7]);
        assert_eq!(filter.system_type, None);

        let query = MeasurementsQuery {
            parameter_id: Some("3,chloride".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.into_filter(Utc::now()), Err(ApiError::BadRequest(_))));
    }
}
