//! Role-based vessel visibility for dashboard users.
//!
//! Users live in a separate database from the measurement store. A user's
//! access set is a list of internal vessel ids:
//! - admin: every vessel in the store
//! - fleet manager: vessels assigned to their subordinate vessel managers,
//!   plus any assigned to them directly
//! - vessel manager / vessel user: direct assignments only

use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::store::queries;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    FleetManager,
    VesselManager,
    VesselUser,
}

impl Role {
    pub fn from_db(role: &str) -> Option<Self> {
        match role {
            "admin" => Some(Role::Admin),
            "fleet_manager" => Some(Role::FleetManager),
            "vessel_manager" => Some(Role::VesselManager),
            "vessel_user" => Some(Role::VesselUser),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardUser {
    pub id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub role: Role,
}

/// Look up an active user by username.
///
/// Users with a role this service does not know are treated as absent.
pub async fn find_user(users: &SqlitePool, username: &str) -> Result<Option<DashboardUser>, sqlx::Error> {
    // ---
    let row: Option<(i64, String, Option<String>, String)> = sqlx::query_as(
        "SELECT id, username, full_name, role FROM users WHERE username = ? AND is_active = 1",
    )
    .bind(username)
    .fetch_optional(users)
    .await?;

    Ok(row.and_then(|(id, username, full_name, role)| match Role::from_db(&role) {
        Some(role) => Some(DashboardUser {
            id,
            username,
            full_name,
            role,
        }),
        None => {
            warn!(%username, %role, "Ignoring user with unknown role");
            None
        }
    }))
}

/// Internal vessel ids the user may see.
pub async fn accessible_vessels(
    users: &SqlitePool,
    accubase: &SqlitePool,
    user: &DashboardUser,
) -> Result<BTreeSet<i64>, sqlx::Error> {
    // ---
    let ids: Vec<i64> = match user.role {
        Role::Admin => queries::all_vessel_ids(accubase).await?,
        Role::FleetManager => {
            sqlx::query_scalar(
                r#"
                SELECT va.vessel_id
                FROM manager_hierarchy mh
                JOIN vessel_assignments va ON va.user_id = mh.vessel_manager_id
                WHERE mh.fleet_manager_id = ?
                UNION
                SELECT vessel_id FROM vessel_assignments WHERE user_id = ?
                "#,
            )
            .bind(user.id)
            .bind(user.id)
            .fetch_all(users)
            .await?
        }
        Role::VesselManager | Role::VesselUser => {
            sqlx::query_scalar("SELECT vessel_id FROM vessel_assignments WHERE user_id = ?")
                .bind(user.id)
                .fetch_all(users)
                .await?
        }
    };
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_role_from_db() {
        // ---
        assert_eq!(Role::from_db("admin"), Some(Role::Admin));
        assert_eq!(Role::from_db("fleet_manager"), Some(Role::FleetManager));
        assert_eq!(Role::from_db("vessel_manager"), Some(Role::VesselManager));
        assert_eq!(Role::from_db("vessel_user"), Some(Role::VesselUser));
        assert_eq!(Role::from_db("Admin"), None);
        assert_eq!(Role::from_db(""), None);
    }

    #[test]
    fn test_role_serializes_snake_case() {
        // ---
        let json = serde_json::to_string(&Role::FleetManager).unwrap();
        assert_eq!(json, "\"fleet_manager\"");
    }
}
