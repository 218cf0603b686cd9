//! Error taxonomy for the fetch pipeline.
//!
//! Errors are scoped by how far they propagate:
//! - [`ParseError`] and [`RejectReason`] affect a single reading; the batch continues.
//! - [`SourceError`] and [`RunError`] abort one vessel's run; sibling vessels continue.
//!
//! Binaries wrap everything in `anyhow` at the top level.

use thiserror::Error;

use crate::store::writer::BatchAborted;

/// Failure talking to the remote measurement source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to measurement source failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("measurement source rejected the query: {0}")]
    GraphQl(String),

    #[error("measurement source response is missing `{0}`")]
    MissingField(&'static str),

    #[error("failed to decode measurement source payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A single reading could not be normalized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unparseable timestamp `{0}`")]
    Timestamp(String),
}

/// Why a single reading was not stored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no parameter with source id {0}")]
    UnknownParameter(i64),

    #[error("no sampling point for source account {0}")]
    UnknownSamplingPoint(i64),

    #[error("insert rejected by store: {0}")]
    Write(String),
}

/// Reasons a vessel's fetch run stops before completing.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Aborted(#[from] BatchAborted),
}
