//! Ingestion normalizer: raw source readings into typed records.
//!
//! Value parsing is best effort and never fails a record; timestamp parsing
//! is strict and rejects the reading with a [`ParseError`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::errors::ParseError;
use crate::models::{NormalizedReading, RawReading, RawTimestamp, ReadingValue};

// ---

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Normalize one raw reading.
pub fn normalize(raw: &RawReading) -> Result<NormalizedReading, ParseError> {
    // ---
    let measured_at = parse_timestamp(&raw.timestamp)?;

    Ok(NormalizedReading {
        external_id: raw.id,
        external_parameter_id: raw.parameter_id,
        external_account_id: raw.account_id,
        raw_value: raw.value.clone(),
        value: parse_value(&raw.value),
        unit: raw.unit.clone(),
        measured_at,
        operator_name: raw.operator_name.clone(),
        device_serial: raw.device_serial.clone(),
        comment: raw.comment.clone(),
        is_valid: raw.is_valid.unwrap_or(true),
    })
}

/// Parse the leading numeric portion of a raw value.
///
/// `"7.5 ppm"` gives `Parsed(7.5)`; `"<0.1"` or `"n/a"` stay `Unparsed`.
pub fn parse_value(raw: &str) -> ReadingValue {
    // ---
    match leading_number(raw.trim()) {
        Some(v) => ReadingValue::Parsed(v),
        None => ReadingValue::Unparsed(raw.to_string()),
    }
}

fn leading_number(s: &str) -> Option<f64> {
    // ---
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }

    let mut digits = 0;
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => digits += 1,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }

    if digits == 0 {
        return None;
    }
    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a source timestamp into a UTC instant.
///
/// Accepts Unix seconds (numeric or all-digit text), RFC 3339, and naive
/// `YYYY-MM-DD HH:MM:SS` forms which are taken as UTC.
pub fn parse_timestamp(raw: &RawTimestamp) -> Result<DateTime<Utc>, ParseError> {
    // ---
    let invalid = || ParseError::Timestamp(raw.to_string());

    match raw {
        RawTimestamp::Unix(secs) => DateTime::from_timestamp(*secs, 0).ok_or_else(invalid),
        RawTimestamp::Fractional(secs) if secs.is_finite() => {
            DateTime::from_timestamp_millis((secs * 1000.0).round() as i64).ok_or_else(invalid)
        }
        RawTimestamp::Fractional(_) => Err(invalid()),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                return text
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .ok_or_else(invalid);
            }
            parse_datetime_text(text).ok_or_else(invalid)
        }
    }
}

/// RFC 3339, or naive text taken as UTC.
fn parse_datetime_text(text: &str) -> Option<DateTime<Utc>> {
    // ---
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a time read back from the store. Accepts everything the ingestion
/// path writes plus a bare `YYYY-MM-DD` date, taken as midnight UTC.
pub fn parse_stored_time(text: &str) -> Option<DateTime<Utc>> {
    // ---
    let text = text.trim();
    parse_datetime_text(text).or_else(|| {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN).and_utc())
    })
}
