//! Accuport measurement pipeline.
//!
//! Two binaries share this library:
//! - `accuport-fetch` pulls Labcom measurements into the SQLite store,
//!   classifying each against its ideal range and raising alerts
//! - `accuport-dashboard` serves the store read-only over HTTP, filtered by
//!   the caller's vessel access

pub mod access;
pub mod classify;
pub mod config;
pub mod errors;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod routes;
pub mod schema;
pub mod source;
pub mod store;
pub mod telemetry;

pub use config::Config;
