//! Route gateway for the dashboard API.
//!
//! Each sibling module exports a subrouter over [`AppState`]; this module
//! merges them and attaches the state, so `main.rs` never sees individual
//! endpoints.

use axum::Router;
use sqlx::SqlitePool;

mod error;
mod health;
mod vessels;

pub use error::ApiError;
pub use vessels::USER_HEADER;

// ---

/// Shared state for every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Measurement store, opened read-only.
    pub accubase: SqlitePool,
    /// Dashboard users and vessel assignments.
    pub users: SqlitePool,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(vessels::router())
        .merge(health::router())
        .with_state(state)
}
