//! Data models for the measurement pipeline.
//!
//! Raw types mirror the Labcom GraphQL payloads; normalized types are what the
//! classifier and store writer operate on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use serde_helpers::*;

// ---

/// Raw measurement record as returned by the `Measurements` query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawReading {
    // ---
    /// Source-assigned measurement id, the deduplication key.
    pub id: i64,
    /// Source account the test was taken on (maps to a sampling point).
    pub account_id: i64,
    pub parameter_id: i64,
    #[serde(default)]
    pub parameter: Option<String>,
    /// Value exactly as reported, numbers are rendered to their text form.
    #[serde(default, deserialize_with = "deserialize_value_string")]
    pub value: String,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub unit: Option<String>,
    pub timestamp: RawTimestamp,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub operator_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub device_serial: Option<String>,
    /// Explicit validity marker; absent means valid.
    #[serde(default)]
    pub is_valid: Option<bool>,
}

/// Timestamp as delivered by the source: Unix seconds or free text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Unix(i64),
    Fractional(f64),
    Text(String),
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTimestamp::Unix(secs) => write!(f, "{secs}"),
            RawTimestamp::Fractional(secs) => write!(f, "{secs}"),
            RawTimestamp::Text(text) => f.write_str(text),
        }
    }
}

/// Numeric interpretation of a raw value string.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingValue {
    Parsed(f64),
    Unparsed(String),
}

impl ReadingValue {
    pub fn numeric(&self) -> Option<f64> {
        match self {
            ReadingValue::Parsed(v) => Some(*v),
            ReadingValue::Unparsed(_) => None,
        }
    }
}

/// A reading after normalization, ready for classification and storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    // ---
    pub external_id: i64,
    pub external_parameter_id: i64,
    pub external_account_id: i64,
    pub raw_value: String,
    pub value: ReadingValue,
    pub unit: Option<String>,
    pub measured_at: DateTime<Utc>,
    pub operator_name: Option<String>,
    pub device_serial: Option<String>,
    pub comment: Option<String>,
    pub is_valid: bool,
}

/// Ideal band for a parameter plus optional critical thresholds.
///
/// Any bound may be absent, meaning no limit on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdealRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub critical_low: Option<f64>,
    pub critical_high: Option<f64>,
}

impl IdealRange {
    pub fn new(low: Option<f64>, high: Option<f64>) -> Self {
        Self {
            low,
            high,
            ..Self::default()
        }
    }

    pub fn with_critical(mut self, critical_low: Option<f64>, critical_high: Option<f64>) -> Self {
        self.critical_low = critical_low;
        self.critical_high = critical_high;
        self
    }
}

/// Point-specific override of a parameter's range, optionally time bounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterLimit {
    pub range: IdealRange,
    pub effective_from: Option<DateTime<Utc>>,
    /// Exclusive end; `None` means the limit is still in force.
    pub effective_to: Option<DateTime<Utc>>,
}

impl ParameterLimit {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from.map_or(true, |from| from <= at)
            && self.effective_to.map_or(true, |to| at < to)
    }
}

/// Quality-control status stamped on a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdealStatus {
    Okay,
    TooLow,
    TooHigh,
    Critical,
}

impl IdealStatus {
    /// Text stored in `measurements.ideal_status`; the dashboard matches on these.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdealStatus::Okay => "OKAY",
            IdealStatus::TooLow => "TOO LOW",
            IdealStatus::TooHigh => "TOO HIGH",
            IdealStatus::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for IdealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    TooLow,
    TooHigh,
    OutOfRange,
}

impl AlertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::TooLow => "TOO_LOW",
            AlertReason::TooHigh => "TOO_HIGH",
            AlertReason::OutOfRange => "OUT_OF_RANGE",
        }
    }
}

/// Alert derived from a non-OKAY classification, not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertDraft {
    pub severity: AlertSeverity,
    pub reason: AlertReason,
    pub measured_value: Option<f64>,
    pub expected_low: Option<f64>,
    pub expected_high: Option<f64>,
}

/// Authenticated Labcom cloud account.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudAccount {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A Labcom account; one per sampling point on a vessel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceAccount {
    pub id: i64,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub forename: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub surname: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub pooltext: Option<String>,
}

impl SourceAccount {
    /// Forename and surname joined, falling back to the pool text.
    pub fn display_name(&self) -> String {
        let joined = [self.forename.as_deref(), self.surname.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
        self.pooltext.clone().unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Test parameter definition, flattened from the `Parameters` query.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceParameter {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub limit_min: Option<f64>,
    pub limit_max: Option<f64>,
}

/// Translation wrapper returned by the `Parameters` query.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ParameterTranslation {
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub name_short_i18n: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub name_long_i18n: Option<String>,
    #[serde(rename = "Parameter")]
    pub parameter: ParameterDefinition,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ParameterDefinition {
    pub id: i64,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub name_short: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub name_long: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub limit_min: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub limit_max: Option<f64>,
}

impl From<ParameterTranslation> for SourceParameter {
    fn from(t: ParameterTranslation) -> Self {
        let name = t
            .name_short_i18n
            .or_else(|| t.parameter.name_short.clone())
            .unwrap_or_default();
        SourceParameter {
            id: t.parameter.id,
            symbol: name.clone(),
            name,
            description: t.name_long_i18n.or(t.parameter.name_long),
            unit: t.parameter.unit,
            limit_min: t.parameter.limit_min,
            limit_max: t.parameter.limit_max,
        }
    }
}

/// Custom deserializers for loosely typed source fields
mod serde_helpers {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize_value_string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    pub fn deserialize_trimmed_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        Ok(s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
    }

    pub fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }
}
